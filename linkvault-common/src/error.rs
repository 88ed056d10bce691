//! Error taxonomy for Linkvault operations
//!
//! Four classes of failure are distinguished: configuration errors (fatal,
//! detected before any mutation), disc disconnections (recoverable through
//! operator interaction), unexpected I/O failures (fatal for the current
//! attempt, persisted state stays valid), and metadata-store problems
//! (corrupt or incompatible documents). `Interrupted` is not a failure at
//! all: it marks a clean operator-requested pause of a running save.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout linkvault.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors produced by linkvault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Invalid or incomplete configuration. Always raised before any
    /// filesystem mutation takes place.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A registered disc's base path is not present. Recoverable by
    /// connecting the medium and retrying.
    #[error("disc \"{disc}\" is not connected (expected at {base})")]
    DiscDisconnected { disc: String, base: PathBuf },

    /// An unexpected I/O failure. Fatal for the current attempt; state
    /// persisted so far remains valid for resumption.
    #[error("i/o failure during {operation} on {path}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A metadata document could not be read, parsed or validated.
    #[error("metadata error in {path}: {detail}")]
    Meta { path: PathBuf, detail: String },

    /// The operator asked a running save to stop. Progress up to the last
    /// completed unit has been persisted.
    #[error("operation was paused by the operator")]
    Interrupted,
}

impl VaultError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn disconnected(disc: impl Into<String>, base: impl Into<PathBuf>) -> Self {
        Self::DiscDisconnected {
            disc: disc.into(),
            base: base.into(),
        }
    }

    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn meta(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::Meta {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error should terminate the whole save attempt.
    /// Disconnections are handled interactively and interruptions are a
    /// deliberate pause; everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::DiscDisconnected { .. } | Self::Interrupted
        )
    }
}
