//! Error types for espboot.

use crate::protocol::command::Command;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for espboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for espboot operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Transport failure that is not an I/O error (closed port, line set).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed frame received from the target.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// The target answered a command with something other than success.
    #[error("{command} returned {body:02X?}")]
    Protocol {
        /// Command that was rejected.
        command: Command,
        /// Response body as received.
        body: Vec<u8>,
    },

    /// A request could not be encoded.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The reset/probe cycle budget ran out before lock-on.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The embedding application asked to stop.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Coarse classification used when reporting errors as events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            #[cfg(feature = "native")]
            Self::Serial(_) => ErrorKind::Transport,
            Self::Io(_) | Self::Transport(_) => ErrorKind::Transport,
            Self::Frame(_) => ErrorKind::Frame,
            Self::Protocol { .. } | Self::InvalidRequest(_) => ErrorKind::Protocol,
            Self::Timeout(_) | Self::HandshakeFailed(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Configuration,
        }
    }
}

/// Error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ErrorKind {
    /// Open, write or line-set failure.
    Transport,
    /// Malformed frame (dropped locally).
    Frame,
    /// Unexpected response body.
    Protocol,
    /// No response, or the connect budget ran out.
    Timeout,
    /// Unknown board or flash parameter.
    Configuration,
    /// Interrupted by the embedding application.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transport => "transport",
            Self::Frame => "frame",
            Self::Protocol => "protocol",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Reasons an inbound frame is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer than 8 bytes, so no complete header.
    #[error("missing header ({0} bytes)")]
    ShortHeader(usize),

    /// Direction byte is neither request nor response.
    #[error("invalid direction {0:#04x}")]
    InvalidDirection(u8),

    /// Response direction was expected.
    #[error("not a response")]
    NotAResponse,

    /// Command code is not in the command table.
    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),

    /// Declared size is larger than the bytes that followed.
    #[error("declared {declared} bytes but only {actual} followed")]
    Truncated {
        /// Size field from the header.
        declared: usize,
        /// Bytes present after the header.
        actual: usize,
    },
}
