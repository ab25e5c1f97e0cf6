//! Erase command implementation.

use anyhow::{Context, Result};
use log::info;

use crate::config::Config;
use crate::{Cli, Target, ensure_not_interrupted, with_flasher};

/// Erase `size` bytes at `address`, leaving the target in the boot ROM.
pub(crate) fn cmd_erase(cli: &Cli, config: &Config, address: u32, size: u32) -> Result<()> {
    let target = Target::resolve(cli, config)?;
    info!(
        "Using {} at {} baud ({} board)",
        target.serial.port_name, target.serial.baud_rate, target.board
    );

    let flasher = target
        .open()
        .with_context(|| format!("Failed to open {}", target.serial.port_name))?;

    with_flasher(flasher, |flasher| {
        ensure_not_interrupted()?;
        flasher.connect()?;
        ensure_not_interrupted()?;
        flasher.erase_region(address, size)?;
        flasher.finish(false)?;
        info!("Erased 0x{address:08X}..0x{:08X}", u64::from(address) + u64::from(size));
        Ok(())
    })
}
