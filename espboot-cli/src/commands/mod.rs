//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod boards;
pub(crate) mod erase;
pub(crate) mod flash;

use espboot::FlashEvent;
use log::{debug, info, warn};

/// Report library progress through the log.
pub(crate) fn log_event(event: &FlashEvent) {
    match event {
        FlashEvent::Synchronized => info!("Connected to boot ROM"),
        FlashEvent::EraseBegun {
            address,
            size,
            erase_size,
        } => debug!("Erasing 0x{address:08X} (+{size} bytes, erase size {erase_size})"),
        FlashEvent::BlockWritten { seq, total } => {
            if seq + 1 == *total {
                info!("Wrote {total} blocks");
            }
        },
        FlashEvent::Finished { reboot: true } => info!("Rebooting into new firmware"),
        FlashEvent::Finished { reboot: false } => debug!("Left flash mode without reboot"),
        FlashEvent::Error { kind, detail } => warn!("{kind} error: {detail}"),
    }
}
