//! Transport abstraction for the boot ROM link.
//!
//! The session only needs a duplex byte channel with a few extra controls:
//!
//! ```text
//! +------------------+
//! |  Session / Sync  |   SLIP frames, command correlation
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |    Port trait    |   read/write, flush input, drain output, RTS/DTR
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | NativePort       |
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use espboot::port::{ControlLines, Port};
//!
//! fn pulse<P: Port>(port: &mut P) -> espboot::Result<()> {
//!     port.set_control_lines(ControlLines { rts: true, dtr: false })?;
//!     port.set_control_lines(ControlLines::default())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use crate::error::Result;
use std::io::{Read, Write};
use std::time::Duration;

/// Default baud rate of the ESP8266 boot ROM.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial port configuration.
///
/// The boot ROM always talks 8N1 without flow control, so only the port,
/// baud rate and read timeout vary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(10),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Modem control line levels.
///
/// On ESP8266 boards RTS drives the reset pin and DTR the boot-mode strap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlLines {
    /// Request To Send.
    pub rts: bool,
    /// Data Terminal Ready.
    pub dtr: bool,
}

/// Duplex byte channel to the target.
///
/// Reads must return `ErrorKind::TimedOut` (or `Ok(0)`) once the configured
/// timeout passes without data; the session polls with short timeouts.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Discard everything received but not yet read.
    fn flush_input(&mut self) -> Result<()>;

    /// Block until everything written has left the host.
    fn drain_output(&mut self) -> Result<()>;

    /// Set RTS and DTR in one call.
    fn set_control_lines(&mut self, lines: ControlLines) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

// Re-export the native implementation
#[cfg(feature = "native")]
pub use native::NativePort;
