//! Firmware images and flash regions.
//!
//! ## ESP8266 image header
//!
//! ```text
//! +------+----------+------------+-----------------+-------------+
//! |  0   |    1     |     2      |        3        |    4..8     |
//! +------+----------+------------+-----------------+-------------+
//! | E9   | segments | flash mode | size<<4 | freq  | entry (LE)  |
//! +------+----------+------------+-----------------+-------------+
//! ```
//!
//! Bytes 2 and 3 describe the flash chip the image boots from; the flasher
//! rewrites them to match the board when the image goes to address 0.

pub mod region;

pub use region::{FlashRegion, parse_address};

use byteorder::{ByteOrder, LittleEndian};

/// First byte of a bootable image.
pub const ESP_IMAGE_MAGIC: u8 = 0xE9;

/// Length of the fixed image header.
pub const IMAGE_HEADER_LEN: usize = 8;

/// Whether `data` starts like a bootable image.
pub fn has_image_header(data: &[u8]) -> bool {
    data.first() == Some(&ESP_IMAGE_MAGIC)
}

/// Fixed header of a bootable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ImageHeader {
    /// Number of segments that follow.
    pub segment_count: u8,
    /// Flash mode byte.
    pub flash_mode: u8,
    /// Flash size (high nibble) and frequency (low nibble).
    pub flash_size_freq: u8,
    /// Entry point.
    pub entry: u32,
}

impl ImageHeader {
    /// Parse the header at the start of `data`, if there is one.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < IMAGE_HEADER_LEN || !has_image_header(data) {
            return None;
        }
        Some(Self {
            segment_count: data[1],
            flash_mode: data[2],
            flash_size_freq: data[3],
            entry: LittleEndian::read_u32(&data[4..8]),
        })
    }

    /// Bytes 2 and 3 of the header.
    pub fn flash_info_bytes(&self) -> [u8; 2] {
        [self.flash_mode, self.flash_size_freq]
    }
}
