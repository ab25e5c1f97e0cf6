//! ESP-12 board support.

use crate::error::Result;
use crate::port::{ControlLines, Port};
use crate::target::{Board, BoardKind, FlashFrequency, FlashMode, FlashParams, FlashSize};
use log::{debug, info};
use std::thread;
use std::time::Duration;

/// How long the chip is held in reset.
const RESET_HOLD: Duration = Duration::from_millis(5);

/// How long the boot strap is held after reset is released.
const BOOT_STRAP_HOLD: Duration = Duration::from_millis(50);

/// ESP-12 module wired the NodeMCU way: RTS -> EN/RST, DTR -> GPIO0.
#[derive(Debug, Clone)]
pub struct Esp12 {
    flash: FlashParams,
}

impl Esp12 {
    /// Flash fitted to stock ESP-12 modules.
    pub const DEFAULT_FLASH: FlashParams = FlashParams {
        mode: FlashMode::Qio,
        size: FlashSize::Mbit32,
        frequency: FlashFrequency::Mhz80,
    };

    /// Board with the stock flash parameters.
    pub fn new() -> Self {
        Self::with_flash_params(Self::DEFAULT_FLASH)
    }

    /// Board with custom flash parameters.
    pub fn with_flash_params(flash: FlashParams) -> Self {
        Self { flash }
    }
}

impl Default for Esp12 {
    fn default() -> Self {
        Self::new()
    }
}

impl Board for Esp12 {
    fn kind(&self) -> BoardKind {
        BoardKind::Esp12
    }

    fn flash_params(&self) -> FlashParams {
        self.flash
    }

    fn reset_into_bootloader(&self, port: &mut dyn Port) -> Result<()> {
        info!("Resetting board into bootloader");

        // Hold reset.
        port.set_control_lines(ControlLines {
            rts: true,
            dtr: false,
        })?;
        thread::sleep(RESET_HOLD);

        // Release reset with GPIO0 pulled low.
        port.set_control_lines(ControlLines {
            rts: false,
            dtr: true,
        })?;
        thread::sleep(BOOT_STRAP_HOLD);

        port.set_control_lines(ControlLines {
            rts: false,
            dtr: false,
        })?;

        debug!("Reset sequence complete");
        Ok(())
    }
}
