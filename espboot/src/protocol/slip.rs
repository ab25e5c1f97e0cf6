//! SLIP framing used by the boot ROM.
//!
//! Every request and response travels as a SLIP frame:
//!
//! ```text
//! +-----+---------------------------+-----+
//! | END |  payload (byte-stuffed)   | END |
//! +-----+---------------------------+-----+
//! | C0  |  C0 -> DB DC, DB -> DB DD | C0  |
//! +-----+---------------------------+-----+
//! ```
//!
//! The serial link delivers bytes in arbitrary chunks, so [`SlipDecoder`]
//! keeps its reassembly state between calls to [`SlipDecoder::feed`].

use log::{debug, trace};

/// Frame boundary.
pub const END: u8 = 0xC0;

/// Escape marker.
pub const ESC: u8 = 0xDB;

/// Escaped form of [`END`] (follows [`ESC`]).
pub const ESC_END: u8 = 0xDC;

/// Escaped form of [`ESC`] (follows [`ESC`]).
pub const ESC_ESC: u8 = 0xDD;

/// Longest decoded frame: an 8-byte header plus the largest payload its
/// 16-bit size field can describe.
pub const MAX_FRAME_LEN: usize = crate::protocol::command::HEADER_LEN + u16::MAX as usize;

/// Encode `data` as a single SLIP frame, including both delimiters.
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2 + data.len() / 16);
    out.push(END);
    for &byte in data {
        match byte {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            _ => out.push(byte),
        }
    }
    out.push(END);
    out
}

/// Un-escape a complete, in-memory buffer.
///
/// [`END`] bytes are skipped, even right after an [`ESC`], so
/// `decode(&encode(b)) == b` for any `b`.
/// Use [`SlipDecoder`] for data arriving from a port.
pub fn decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter().copied();
    while let Some(byte) = bytes.next() {
        match byte {
            END => {},
            ESC => match bytes.next() {
                Some(ESC_END) => out.push(END),
                Some(ESC_ESC) => out.push(ESC),
                Some(END) | None => {},
                Some(other) => out.push(other),
            },
            _ => out.push(byte),
        }
    }
    out
}

/// Streaming SLIP decoder.
///
/// Bytes before the first [`END`] are line noise (the ROM prints a boot
/// banner at a different baud rate) and are discarded. A frame that grows
/// past [`MAX_FRAME_LEN`] is dropped and the decoder waits for the next
/// [`END`].
#[derive(Debug)]
pub struct SlipDecoder {
    buf: Vec<u8>,
    in_frame: bool,
    escaped: bool,
    min_len: usize,
}

impl Default for SlipDecoder {
    fn default() -> Self {
        Self::new(crate::protocol::command::HEADER_LEN)
    }
}

impl SlipDecoder {
    /// Create a decoder that drops frames shorter than `min_len` bytes.
    pub fn new(min_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            in_frame: false,
            escaped: false,
            min_len,
        }
    }

    /// Feed received bytes, returning every frame they complete.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();

        for &byte in data {
            if byte == END {
                if self.in_frame {
                    self.finish_frame(&mut frames);
                }
                self.in_frame = true;
                continue;
            }

            if !self.in_frame {
                continue;
            }

            let value = if self.escaped {
                self.escaped = false;
                match byte {
                    ESC_END => END,
                    ESC_ESC => ESC,
                    other => {
                        trace!("Invalid SLIP escape 0x{other:02X}, keeping raw byte");
                        other
                    },
                }
            } else if byte == ESC {
                self.escaped = true;
                continue;
            } else {
                byte
            };

            if self.buf.len() >= MAX_FRAME_LEN {
                debug!("Dropping SLIP frame longer than {MAX_FRAME_LEN} bytes");
                self.reset();
                continue;
            }
            self.buf.push(value);
        }

        frames
    }

    /// Number of bytes of the frame currently being reassembled.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Forget any partially received frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.in_frame = false;
        self.escaped = false;
    }

    fn finish_frame(&mut self, frames: &mut Vec<Vec<u8>>) {
        self.escaped = false;
        if self.buf.is_empty() {
            return;
        }
        let frame = std::mem::take(&mut self.buf);
        if frame.len() < self.min_len {
            trace!("Dropping {}-byte SLIP frame (too short)", frame.len());
            return;
        }
        frames.push(frame);
    }
}
