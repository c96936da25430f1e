use std::io;

use redcat_gtfobins::{CatalogError, ResolutionError};
use thiserror::Error;

/// Failures surfaced by the session facade.
///
/// Transport errors propagate unchanged inside [`SessionError::Io`];
/// resolution misses are iterated internally and only reach callers once
/// every candidate is exhausted, already mapped to the standard file
/// conditions below.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Transport or protocol failure, fatal to the current operation.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    /// The remote path does not exist (or its parent directory does not).
    #[error("no such file or directory: {0}")]
    NotFound(String),
    /// The remote path exists but the current user may not access it.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The remote path is a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),
    /// Every candidate transfer method was exhausted.
    #[error("no supported transfer method: {0}")]
    NoTransferMethod(String),
    /// The catalog data file could not be loaded.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// sudo prompted for a password but none was supplied.
    #[error("a password is required for {user}")]
    PasswordRequired {
        /// The user the command was to run as.
        user: String,
    },
    /// sudo rejected the supplied password or the user's permissions.
    #[error("sudo authentication failed for {user}")]
    AuthenticationFailed {
        /// The user the command was to run as.
        user: String,
    },
    /// The channel mutex was poisoned by a panic mid-operation; the framing
    /// state of the remote shell can no longer be trusted.
    #[error("session channel poisoned by an earlier panic")]
    ChannelPoisoned,
}

impl From<ResolutionError> for SessionError {
    fn from(err: ResolutionError) -> Self {
        Self::NoTransferMethod(err.to_string())
    }
}
