//! Progress events reported by a session.

use crate::error::{Error, ErrorKind};

/// Something worth telling a front end about.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FlashEvent {
    /// The boot ROM link is locked on.
    Synchronized,
    /// FLASH_BEGIN was acknowledged; the region is being erased.
    EraseBegun {
        /// Region start.
        address: u32,
        /// Region length in bytes.
        size: u32,
        /// Erase size sent to the ROM.
        erase_size: u32,
    },
    /// A block was acknowledged.
    BlockWritten {
        /// Zero-based sequence number.
        seq: u32,
        /// Blocks in the region.
        total: u32,
    },
    /// FLASH_DONE was acknowledged.
    Finished {
        /// Whether the target was asked to reboot.
        reboot: bool,
    },
    /// An operation failed.
    Error {
        /// Classification.
        kind: ErrorKind,
        /// Human-readable detail.
        detail: String,
    },
}

impl FlashEvent {
    /// Event describing `err`.
    pub fn from_error(err: &Error) -> Self {
        Self::Error {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

/// Receiver for [`FlashEvent`]s, injected when a session is built.
pub type EventHandler = Box<dyn FnMut(&FlashEvent) + Send>;
