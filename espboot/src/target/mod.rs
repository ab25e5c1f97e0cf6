//! Board abstraction.
//!
//! A board knows two things the protocol cannot discover on its own: how
//! its USB-serial bridge wires RTS/DTR to the chip's reset and boot-strap
//! pins, and which SPI flash part sits next to the chip. The latter is
//! encoded into two "flash info" bytes patched into firmware headers.

pub mod esp12;

use crate::error::{Error, Result};
use crate::port::Port;
use std::fmt;
use std::str::FromStr;

pub use esp12::Esp12;

/// SPI flash access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FlashMode {
    /// Quad I/O.
    #[default]
    Qio,
    /// Quad output.
    Qout,
    /// Dual I/O.
    Dio,
    /// Dual output.
    Dout,
}

impl FlashMode {
    /// All modes.
    pub const ALL: [Self; 4] = [Self::Qio, Self::Qout, Self::Dio, Self::Dout];

    /// Header code of the mode.
    pub fn code(self) -> u8 {
        match self {
            Self::Qio => 0,
            Self::Qout => 1,
            Self::Dio => 2,
            Self::Dout => 3,
        }
    }

    /// esptool-style name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Qio => "qio",
            Self::Qout => "qout",
            Self::Dio => "dio",
            Self::Dout => "dout",
        }
    }
}

/// SPI flash size (in megabits, as the ROM names them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FlashSize {
    /// 4 Mbit.
    Mbit4,
    /// 2 Mbit.
    Mbit2,
    /// 8 Mbit.
    Mbit8,
    /// 16 Mbit.
    Mbit16,
    /// 32 Mbit.
    #[default]
    Mbit32,
    /// 16 Mbit, 1024 KB + 1024 KB layout.
    Mbit16C1,
    /// 32 Mbit, 1024 KB + 1024 KB layout.
    Mbit32C1,
    /// 32 Mbit, 2048 KB + 2048 KB layout.
    Mbit32C2,
}

impl FlashSize {
    /// All sizes.
    pub const ALL: [Self; 8] = [
        Self::Mbit4,
        Self::Mbit2,
        Self::Mbit8,
        Self::Mbit16,
        Self::Mbit32,
        Self::Mbit16C1,
        Self::Mbit32C1,
        Self::Mbit32C2,
    ];

    /// Header code (high nibble).
    pub fn code(self) -> u8 {
        match self {
            Self::Mbit4 => 0x00,
            Self::Mbit2 => 0x10,
            Self::Mbit8 => 0x20,
            Self::Mbit16 => 0x30,
            Self::Mbit32 => 0x40,
            Self::Mbit16C1 => 0x50,
            Self::Mbit32C1 => 0x60,
            Self::Mbit32C2 => 0x70,
        }
    }

    /// esptool-style name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mbit4 => "4m",
            Self::Mbit2 => "2m",
            Self::Mbit8 => "8m",
            Self::Mbit16 => "16m",
            Self::Mbit32 => "32m",
            Self::Mbit16C1 => "16m-c1",
            Self::Mbit32C1 => "32m-c1",
            Self::Mbit32C2 => "32m-c2",
        }
    }
}

/// SPI flash clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FlashFrequency {
    /// 40 MHz.
    Mhz40,
    /// 26 MHz.
    Mhz26,
    /// 20 MHz.
    Mhz20,
    /// 80 MHz.
    #[default]
    Mhz80,
}

impl FlashFrequency {
    /// All frequencies.
    pub const ALL: [Self; 4] = [Self::Mhz40, Self::Mhz26, Self::Mhz20, Self::Mhz80];

    /// Header code (low nibble).
    pub fn code(self) -> u8 {
        match self {
            Self::Mhz40 => 0x0,
            Self::Mhz26 => 0x1,
            Self::Mhz20 => 0x2,
            Self::Mhz80 => 0xF,
        }
    }

    /// esptool-style name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mhz40 => "40m",
            Self::Mhz26 => "26m",
            Self::Mhz20 => "20m",
            Self::Mhz80 => "80m",
        }
    }
}

macro_rules! named_param {
    ($ty:ty, $what:literal) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                let wanted = s.trim().to_lowercase();
                Self::ALL
                    .into_iter()
                    .find(|v| v.name() == wanted)
                    .ok_or_else(|| {
                        let known: Vec<_> = Self::ALL.iter().map(|v| v.name()).collect();
                        Error::Config(format!(
                            "unknown flash {} '{s}' (expected one of: {})",
                            $what,
                            known.join(", ")
                        ))
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

named_param!(FlashMode, "mode");
named_param!(FlashSize, "size");
named_param!(FlashFrequency, "frequency");

/// Flash chip parameters of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlashParams {
    /// Access mode.
    pub mode: FlashMode,
    /// Chip size.
    pub size: FlashSize,
    /// Clock.
    pub frequency: FlashFrequency,
}

impl FlashParams {
    /// Create parameters from their parts.
    pub fn new(mode: FlashMode, size: FlashSize, frequency: FlashFrequency) -> Self {
        Self {
            mode,
            size,
            frequency,
        }
    }

    /// Bytes 2 and 3 of a firmware image header.
    pub fn info_bytes(&self) -> [u8; 2] {
        [self.mode.code(), self.size.code() + self.frequency.code()]
    }
}

impl fmt::Display for FlashParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @ {}", self.mode, self.size, self.frequency)
    }
}

/// Capabilities every board variant provides.
pub trait Board: Send {
    /// Which profile this board was built from.
    fn kind(&self) -> BoardKind;

    /// Flash parameters of the board.
    fn flash_params(&self) -> FlashParams;

    /// The 2 flash-info bytes for firmware header patching.
    fn flash_info_bytes(&self) -> [u8; 2] {
        self.flash_params().info_bytes()
    }

    /// Toggle the control lines so the chip restarts into its boot ROM.
    fn reset_into_bootloader(&self, port: &mut dyn Port) -> Result<()>;
}

/// Known board profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum BoardKind {
    /// ESP-12 modules and boards built around them (NodeMCU, Wemos D1).
    #[default]
    Esp12,
}

impl BoardKind {
    /// All profiles.
    pub const ALL: [Self; 1] = [Self::Esp12];

    /// Profile key.
    pub fn name(self) -> &'static str {
        match self {
            Self::Esp12 => "esp12",
        }
    }

    /// Look up a profile by key (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "esp12" | "esp-12" => Some(Self::Esp12),
            _ => None,
        }
    }

    /// Flash parameters the profile uses unless overridden.
    pub fn default_flash_params(self) -> FlashParams {
        match self {
            Self::Esp12 => Esp12::DEFAULT_FLASH,
        }
    }

    /// Build a board driver, optionally overriding its flash parameters.
    pub fn create(self, flash: Option<FlashParams>) -> Box<dyn Board> {
        let flash = flash.unwrap_or_else(|| self.default_flash_params());
        match self {
            Self::Esp12 => Box::new(Esp12::with_flash_params(flash)),
        }
    }

    /// Open a serial port and wrap it in a flasher for this board.
    ///
    /// The port is opened but nothing is sent until
    /// [`Flasher::connect`](crate::flasher::Flasher::connect).
    #[cfg(feature = "native")]
    pub fn open_flasher(
        self,
        serial: &crate::port::SerialConfig,
        flash: Option<FlashParams>,
        config: crate::session::SessionConfig,
        events: Option<crate::event::EventHandler>,
    ) -> Result<Box<dyn crate::flasher::Flasher>> {
        let port = crate::port::NativePort::open(serial)?;
        let mut session = crate::session::Session::new(port, self.create(flash), config);
        if let Some(handler) = events {
            session = session.with_events(handler);
        }
        Ok(Box::new(session))
    }
}

impl FromStr for BoardKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| Error::Config(format!("unknown board '{s}'")))
    }
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve a board key to a driver.
pub fn board_from_name(name: &str, flash: Option<FlashParams>) -> Result<Box<dyn Board>> {
    Ok(name.parse::<BoardKind>()?.create(flash))
}
