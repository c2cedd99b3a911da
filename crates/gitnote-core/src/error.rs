//! Error types for gitnote.

use std::path::PathBuf;

use gitnote_persistence::PersistenceError;
use thiserror::Error;

use crate::access::{AuthState, RequestStatus};
use crate::config::ConfigError;

/// Errors raised by the access controller.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The user already has an open request.
    #[error("access request #{request_id} is already waiting for review")]
    AlreadyRequested { request_id: u64 },

    /// The user does not need to ask.
    #[error("user is already authorized")]
    AlreadyAuthorized,

    /// The resolver is not a configured admin.
    #[error("user {0} is not an admin")]
    NotAdmin(u64),

    /// No request with this id exists.
    #[error("access request #{0} not found")]
    RequestNotFound(u64),

    /// The request was decided before.
    #[error("access request #{request_id} is already {status}")]
    AlreadyResolved {
        request_id: u64,
        status: RequestStatus,
    },

    /// The user never contacted the bot.
    #[error("unknown user {0}")]
    UnknownUser(u64),

    /// The registry could not be persisted or loaded.
    #[error("access registry: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Errors raised by the repository sync adapter.
#[derive(Debug, Error)]
pub enum SyncError {
    /// `git` is not installed.
    #[error("git executable not found in PATH")]
    GitNotFound,

    /// `git` could not be started.
    #[error("failed to run git {op}: {source}")]
    Spawn {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// `git` ran and exited with an error.
    #[error("git {op} failed: {stderr}")]
    CommandFailed { op: &'static str, stderr: String },

    /// The commit exists locally but the push was rejected twice.
    #[error("commit {commit} saved locally but not pushed: {reason}")]
    NotPushed { commit: String, reason: String },

    /// The working copy directory could not be prepared.
    #[error("failed to prepare working copy {path}: {source}")]
    WorkingCopy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the note writer.
#[derive(Debug, Error)]
pub enum NoteError {
    /// Nothing to save.
    #[error("note is empty")]
    Empty,

    /// The requested file name has nothing usable left after sanitizing.
    #[error("invalid note name '{0}'")]
    InvalidName(String),

    /// Every disambiguated name is taken.
    #[error("no free file name left for '{0}'")]
    NameExhausted(String),

    /// Filesystem failure while writing.
    #[error("failed to write note: {0}")]
    Io(#[from] PersistenceError),
}

/// Top-level error for the message handling path.
#[derive(Debug, Error)]
pub enum Error {
    /// The sender may not write.
    #[error("user {user_id} is not authorized ({state})")]
    AuthorizationDenied { user_id: u64, state: AuthState },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Note(#[from] NoteError),
}

/// Result type for gitnote operations.
pub type Result<T> = std::result::Result<T, Error>;
