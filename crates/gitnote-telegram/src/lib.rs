//! Telegram front end for gitnote.
//!
//! Receives messages through a webhook (or long polling), hands them to
//! [`gitnote_core::NoteService`] and sends the replies back.
//!
//! # Environment Variables
//!
//! See [`gitnote_core::config`]. The most important ones:
//! - `BOT_TOKEN`: bot token from @BotFather
//! - `GIT_REPO_URL`: repository that receives the notes
//! - `WEBHOOK_URL`: public URL; without it the bot long-polls
//!
//! # HTTP Routes
//!
//! - `POST /webhook` (or the path of `WEBHOOK_URL`): Telegram updates
//! - `GET /`: service banner
//! - `GET /health`: status, version, uptime and repository state
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gitnote_core::{BotConfig, NoteService};
//! use gitnote_telegram::TelegramBot;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BotConfig::from_env()?;
//!     let bot = TelegramBot::new(config.clone());
//!     let username = bot.get_me().await?;
//!     let service = NoteService::from_config(&config)?.with_bot_username(username);
//!
//!     bot.start_polling(Arc::new(service)).await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod error;
pub mod handlers;
pub mod server;

pub use bot::TelegramBot;
pub use error::{Result, TelegramError};
pub use server::{create_router, AppState, HealthResponse};
