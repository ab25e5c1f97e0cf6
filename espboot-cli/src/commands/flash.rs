//! Flash command implementation.

use anyhow::{Context, Result};
use espboot::FlashRegion;
use log::info;
use std::path::PathBuf;

use crate::config::Config;
use crate::{Cli, Target, ensure_not_interrupted, with_flasher};

/// Load every file, then connect and write them in order.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    regions: &[(u32, PathBuf)],
    no_reboot: bool,
) -> Result<()> {
    let mut loaded = Vec::with_capacity(regions.len());
    for (address, path) in regions {
        let region = FlashRegion::from_file(*address, path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        info!(
            "{} ({} bytes) -> 0x{address:08X}",
            path.display(),
            region.len()
        );
        loaded.push(region);
    }

    let target = Target::resolve(cli, config)?;
    let reboot = !(no_reboot || config.flash.no_reboot);
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
        flasher.flash_regions(&loaded, reboot)?;
        info!("Flashing complete");
        Ok(())
    })
}
