//! Boot ROM command table and frame header.
//!
//! ## Frame Format
//!
//! Each SLIP frame carries an 8-byte header followed by the payload:
//!
//! ```text
//! +-----------+---------+--------+------------+-------------+
//! | Direction | Command |  Size  |  Checksum  |   Payload   |
//! +-----------+---------+--------+------------+-------------+
//! |  1 byte   | 1 byte  | 2 (LE) |   4 (LE)   |  Size bytes |
//! +-----------+---------+--------+------------+-------------+
//! ```
//!
//! Requests use direction 0, responses direction 1.

use crate::error::{Error, FrameError, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Seed of the payload checksum.
pub const CHECKSUM_SEED: u8 = 0xEF;

/// Body returned by commands that succeed.
pub const SUCCESS: [u8; 2] = [0x00, 0x00];

/// Length of the block sub-header that FLASH_DATA excludes from its checksum.
pub const DATA_SUBHEADER_LEN: usize = 16;

/// SYNC payload: magic followed by 32 bytes of 0x55.
pub const SYNC_PAYLOAD: [u8; 36] = {
    let mut payload = [0x55; 36];
    payload[0] = 0x07;
    payload[1] = 0x07;
    payload[2] = 0x12;
    payload[3] = 0x20;
    payload
};

/// Boot ROM commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum Command {
    /// Reserved (0x00).
    Cmd0 = 0x00,
    /// Reserved (0x01).
    Cmd1 = 0x01,
    /// Erase and announce a flash download (0x02).
    FlashBegin = 0x02,
    /// One block of flash data (0x03).
    FlashData = 0x03,
    /// Leave flash download mode (0x04).
    FlashDone = 0x04,
    /// Announce a RAM download (0x05).
    RamBegin = 0x05,
    /// Finish a RAM download (0x06).
    RamEnd = 0x06,
    /// One block of RAM data (0x07).
    RamData = 0x07,
    /// Synchronize with the ROM (0x08).
    Sync = 0x08,
    /// Write a register (0x09).
    WriteReg = 0x09,
    /// Read a register (0x0A).
    ReadReg = 0x0A,
    /// Configure SPI flash parameters (0x0B).
    SetFlashParams = 0x0B,
    /// No command (0xFF).
    None = 0xFF,
}

impl Command {
    /// Every command in code order.
    pub const ALL: [Self; 13] = [
        Self::Cmd0,
        Self::Cmd1,
        Self::FlashBegin,
        Self::FlashData,
        Self::FlashDone,
        Self::RamBegin,
        Self::RamEnd,
        Self::RamData,
        Self::Sync,
        Self::WriteReg,
        Self::ReadReg,
        Self::SetFlashParams,
        Self::None,
    ];

    /// Wire code of this command.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a command by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.code() == code)
    }

    /// Protocol name of the command.
    pub fn name(self) -> &'static str {
        match self {
            Self::Cmd0 => "CMD0",
            Self::Cmd1 => "CMD1",
            Self::FlashBegin => "FLASH_BEGIN",
            Self::FlashData => "FLASH_DATA",
            Self::FlashDone => "FLASH_DONE",
            Self::RamBegin => "RAM_BEGIN",
            Self::RamEnd => "RAM_END",
            Self::RamData => "RAM_DATA",
            Self::Sync => "SYNC",
            Self::WriteReg => "WRITE_REG",
            Self::ReadReg => "READ_REG",
            Self::SetFlashParams => "SET_FLASH_PARAMS",
            Self::None => "NONE",
        }
    }

    /// Whether a response body must equal [`SUCCESS`].
    pub fn requires_success(self) -> bool {
        matches!(
            self,
            Self::Sync | Self::FlashBegin | Self::FlashData | Self::FlashDone
        )
    }

    /// Part of `payload` covered by the header checksum.
    pub fn checksum_slice(self, payload: &[u8]) -> &[u8] {
        match self {
            Self::FlashData => payload
                .get(DATA_SUBHEADER_LEN..)
                .unwrap_or(&[]),
            Self::FlashDone => &[],
            _ => payload,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// XOR checksum seeded with [`CHECKSUM_SEED`].
pub fn checksum(data: &[u8]) -> u32 {
    u32::from(
        data.iter()
            .fold(CHECKSUM_SEED, |acc, byte| acc ^ byte),
    )
}

/// Frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    /// Host to target.
    Request = 0x00,
    /// Target to host.
    Response = 0x01,
}

impl TryFrom<u8> for Direction {
    type Error = FrameError;

    fn try_from(value: u8) -> std::result::Result<Self, FrameError> {
        match value {
            0x00 => Ok(Self::Request),
            0x01 => Ok(Self::Response),
            other => Err(FrameError::InvalidDirection(other)),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Request or response.
    pub direction: Direction,
    /// Command the frame belongs to.
    pub command: Command,
    /// Payload length.
    pub size: u16,
    /// Checksum for requests, value field for responses.
    pub checksum: u32,
}

impl FrameHeader {
    /// Header for a request carrying `payload`.
    pub fn request(command: Command, payload: &[u8]) -> Result<Self> {
        let size = u16::try_from(payload.len()).map_err(|_| {
            Error::InvalidRequest(format!(
                "{command} payload of {} bytes does not fit a frame",
                payload.len()
            ))
        })?;

        let checksum = match command {
            Command::FlashDone => 0,
            _ => checksum(command.checksum_slice(payload)),
        };

        Ok(Self {
            direction: Direction::Request,
            command,
            size,
            checksum,
        })
    }

    /// Serialize to the 8-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.direction as u8;
        out[1] = self.command.code();
        LittleEndian::write_u16(&mut out[2..4], self.size);
        LittleEndian::write_u32(&mut out[4..HEADER_LEN], self.checksum);
        out
    }

    /// Parse the first [`HEADER_LEN`] bytes of `data`.
    pub fn parse(data: &[u8]) -> std::result::Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::ShortHeader(data.len()));
        }

        let direction = Direction::try_from(data[0])?;
        let command = Command::from_code(data[1]).ok_or(FrameError::UnknownCommand(data[1]))?;
        let size = LittleEndian::read_u16(&data[2..4]);
        let checksum = LittleEndian::read_u32(&data[4..HEADER_LEN]);

        Ok(Self {
            direction,
            command,
            size,
            checksum,
        })
    }
}

/// Build the 8-byte request header for `payload`.
pub fn build_header(command: Command, payload: &[u8]) -> Result<[u8; HEADER_LEN]> {
    Ok(FrameHeader::request(command, payload)?.to_bytes())
}

/// Parse a frame header; see [`FrameHeader::parse`].
pub fn parse_header(data: &[u8]) -> std::result::Result<FrameHeader, FrameError> {
    FrameHeader::parse(data)
}

/// Header followed by payload, ready for SLIP encoding.
pub fn build_request(command: Command, payload: &[u8]) -> Result<Vec<u8>> {
    let header = build_header(command, payload)?;
    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.extend_from_slice(&header);
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// A validated response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Parsed header.
    pub header: FrameHeader,
    /// `size` bytes following the header.
    pub body: Vec<u8>,
}

impl ResponseFrame {
    /// Validate a decoded SLIP frame as a response.
    pub fn parse(frame: &[u8]) -> std::result::Result<Self, FrameError> {
        let header = FrameHeader::parse(frame)?;
        if header.direction != Direction::Response {
            return Err(FrameError::NotAResponse);
        }

        let declared = usize::from(header.size);
        let rest = &frame[HEADER_LEN..];
        let body = rest
            .get(..declared)
            .ok_or(FrameError::Truncated {
                declared,
                actual: rest.len(),
            })?;

        Ok(Self {
            header,
            body: body.to_vec(),
        })
    }

    /// Command this response answers.
    pub fn command(&self) -> Command {
        self.header.command
    }

    /// Whether the body is acceptable for the command.
    pub fn is_success(&self) -> bool {
        !self.command().requires_success() || self.body == SUCCESS
    }
}
