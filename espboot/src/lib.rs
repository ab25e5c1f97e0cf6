//! # espboot
//!
//! A library for flashing ESP8266-class chips through their serial boot ROM.
//!
//! The crate is layered bottom-up:
//!
//! - [`protocol`]: SLIP framing and the boot ROM command format
//! - [`port`]: the byte channel to the target (native serial by default)
//! - [`target`]: board drivers (reset wiring and flash parameters)
//! - [`session`]: request/response correlation and the SYNC handshake
//! - [`flasher`]: erase and program regions, then leave the boot ROM
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use espboot::{BoardKind, FlashRegion, SerialConfig, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let serial = SerialConfig::new("/dev/ttyUSB0", 115200);
//!     let mut flasher = BoardKind::Esp12.open_flasher(&serial, None, SessionConfig::default(), None)?;
//!
//!     flasher.connect()?;
//!     flasher.flash_regions(
//!         &[
//!             FlashRegion::from_file(0x00000, "0x00000.bin")?,
//!             FlashRegion::from_file(0x40000, "0x40000.bin")?,
//!         ],
//!         true,
//!     )?;
//!     flasher.close()?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod event;
pub mod flasher;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Toggle interruption for the calling test thread only.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::cell::Cell;

    thread_local! {
        static TEST_INTERRUPTED: Cell<bool> = const { Cell::new(false) };
    }

    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| set_interrupt_checker(|| TEST_INTERRUPTED.with(Cell::get)));

    TEST_INTERRUPTED.with(|flag| flag.set(value));
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    error::{Error, ErrorKind, FrameError, Result},
    event::{EventHandler, FlashEvent},
    flasher::Flasher,
    image::{FlashRegion, ImageHeader, parse_address},
    port::{ControlLines, Port, SerialConfig},
    protocol::command::{Command, ResponseFrame},
    session::{LinkState, Session, SessionConfig},
    target::{Board, BoardKind, Esp12, FlashFrequency, FlashMode, FlashParams, FlashSize},
};
