// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the display monitor
//!
//! Everything that can go wrong while watching the output topology or while
//! reconfiguring a pipe. Only [`AppError::FatalInit`] and
//! [`AppError::ConnectionLost`] end the process; every other variant is local
//! to the single operation that produced it.

use thiserror::Error;

use crate::monitor::{ModeId, PipeId};

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// The display server connection or the RandR extension is unusable
    #[error("Failed to initialize display monitor: {reason}")]
    FatalInit { reason: String },

    /// The blocking notification read failed, the server is gone
    #[error("Lost connection to the display server: {source}")]
    ConnectionLost {
        #[source]
        source: anyhow::Error,
    },

    /// Every display is dark and none of them resolved as primary
    #[error("No primary display found, cannot restore output")]
    NoPrimaryDisplay,

    /// All pipes are driving other displays
    #[error("No free pipe left for display {display}")]
    NoFreePipe { display: String },

    /// The server refused a pipe configuration command
    #[error("Server rejected configuration of pipe {pipe} for display {display}: {status}")]
    ConfigurationRejected {
        display: String,
        pipe: PipeId,
        status: String,
    },

    /// No connected output carries this name
    #[error("Display {0} not found")]
    DisplayNotFound(String),

    /// The requested mode is not in the display's mode list
    #[error("Display {display} does not support mode {mode}")]
    UnsupportedMode { display: String, mode: ModeId },

    /// The pipe id is not part of the server's pipe pool
    #[error("Pipe {0} is not known to the display server")]
    UnknownPipe(PipeId),

    /// A request to the display server failed
    #[error("Display server request failed: {source}")]
    Protocol {
        #[source]
        source: anyhow::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn protocol(source: anyhow::Error) -> Self {
        AppError::Protocol { source }
    }

    pub fn fatal(reason: impl std::fmt::Display) -> Self {
        AppError::FatalInit {
            reason: reason.to_string(),
        }
    }

    /// Whether the monitor can keep running after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::FatalInit { .. } | AppError::ConnectionLost { .. }
        )
    }
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;
