//! Error Module
//!
//! Protocol-level and session-level failures of the display core.

use thiserror::Error;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

/// A failed X request or a broken connection
#[derive(Debug, Error)]
pub enum XError {
    #[error("X connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("X request failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("X resource allocation failed: {0}")]
    Id(#[from] ReplyOrIdError),

    #[error("I/O error while waiting for the X server: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected a request (BadWindow, BadAccess, ...)
    #[error("{request} on 0x{resource:x} was rejected by the X server")]
    Rejected {
        request: &'static str,
        resource: u32,
    },
}

/// Why a display session could not be opened or a selection not taken
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("Failed to open X Window System display \"{name}\": {source}")]
    Connect {
        name: String,
        #[source]
        source: ConnectError,
    },

    #[error("Screen {number} on display \"{name}\" is invalid")]
    InvalidScreen { number: usize, name: String },

    #[error(
        "Display \"{name}\" already has a window manager; try using the --replace option to replace the current window manager"
    )]
    AlreadyManaged { name: String },

    #[error("Could not acquire selection {selection}")]
    SelectionLost { selection: String },

    #[error("Timed out waiting for {what}")]
    WaitTimeout { what: &'static str },

    #[error("X server doesn't have the {extension} extension, version {required} or newer")]
    MissingExtension {
        extension: &'static str,
        required: &'static str,
    },

    #[error(transparent)]
    X(#[from] XError),
}

impl DisplayError {
    /// Fatal errors mean the process cannot run as a window manager at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DisplayError::Connect { .. } | DisplayError::MissingExtension { .. }
        )
    }
}
