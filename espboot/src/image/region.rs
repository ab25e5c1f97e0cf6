//! Address/payload pairs making up a flash specification.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// One region of a flash specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRegion {
    /// Flash offset the payload is written to.
    pub address: u32,
    /// Bytes to write.
    pub data: Vec<u8>,
}

impl FlashRegion {
    /// Create a region from its parts.
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    /// Create a region from an address string (`0x1000`, `4096`, `0x10_000`).
    pub fn from_spec(address: &str, data: Vec<u8>) -> Result<Self> {
        Ok(Self::new(parse_address(address)?, data))
    }

    /// Read a region's payload from `path`.
    pub fn from_file(address: u32, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Ok(Self::new(address, data))
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Parse a flash address: `0x`-prefixed hex or decimal, `_` separators allowed.
pub fn parse_address(s: &str) -> Result<u32> {
    let cleaned: String = s
        .trim()
        .chars()
        .filter(|&c| c != '_')
        .collect();

    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => cleaned.parse::<u32>(),
    };

    parsed.map_err(|_| Error::Config(format!("invalid flash address '{s}'")))
}
