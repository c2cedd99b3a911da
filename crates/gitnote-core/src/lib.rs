//! Core library for gitnote.
//!
//! gitnote saves chat messages as files in a git repository. This crate
//! holds everything that does not depend on the chat platform:
//!
//! - [`config`]: environment configuration
//! - [`access`]: who may write, and access requests
//! - [`router`]: message text to [`router::Action`]
//! - [`notes`]: note file naming and writing
//! - [`sync`]: the working copy and its remote
//! - [`service`]: [`NoteService`], which ties the above together
//!
//! # Example
//!
//! ```no_run
//! use gitnote_core::{BotConfig, IncomingMessage, NoteService};
//!
//! # async fn run() -> gitnote_core::Result<()> {
//! let config = BotConfig::from_env()?;
//! let service = NoteService::from_config(&config)?;
//!
//! let replies = service
//!     .handle(IncomingMessage::new(42, 42, "Alice", "buy milk"))
//!     .await;
//! for reply in replies {
//!     println!("{} <- {}", reply.chat_id, reply.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod config;
pub mod error;
pub mod notes;
pub mod router;
pub mod service;
pub mod sync;

pub use access::{AccessController, AccessRequest, AuthState, Decision, RequestStatus, User};
pub use config::{BotConfig, ConfigError, GitConfig};
pub use error::{AccessError, Error, NoteError, Result, SyncError};
pub use notes::{Note, NoteWriter};
pub use router::{help_text, route, Action, Command};
pub use service::{IncomingMessage, NoteService, Outbound};
pub use sync::{CommitInfo, RepoSync, SyncStatus};
