//! Flash programming over a synchronized session.
//!
//! A region is written in three steps:
//!
//! ```text
//! FLASH_BEGIN  erase_size | num_blocks | 1024 | address
//! FLASH_DATA   1024 | seq | 0 | 0 | block (0xFF padded)    x num_blocks
//! FLASH_DONE   0 = reboot, 1 = stay in the boot ROM
//! ```
//!
//! The boot ROM erases while handling FLASH_BEGIN. Its erase routine
//! double-counts the sectors up to the next 64 KiB boundary, so the size
//! sent is reduced to compensate (see [`erase_size`]).

use crate::error::{Error, Result};
use crate::event::FlashEvent;
use crate::image::{ESP_IMAGE_MAGIC, FlashRegion, ImageHeader};
use crate::port::Port;
use crate::protocol::command::{Command, DATA_SUBHEADER_LEN};
use crate::session::{LinkState, Session};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};

/// Size of one FLASH_DATA block.
pub const FLASH_BLOCK_SIZE: u32 = 0x400;

/// Erase granularity of the SPI flash.
pub const FLASH_SECTOR_SIZE: u32 = 0x1000;

/// Sectors per 64 KiB erase block.
pub const FLASH_SECTORS_PER_BLOCK: u32 = 16;

/// Fill byte for the tail of the last block.
pub const PAD_BYTE: u8 = 0xFF;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Number of FLASH_DATA blocks needed for `size` bytes.
pub fn block_count(size: u32) -> u32 {
    size.div_ceil(FLASH_BLOCK_SIZE)
}

/// Erase size to announce in FLASH_BEGIN for a region.
pub fn erase_size(address: u32, size: u32) -> u32 {
    let num_sectors = size.div_ceil(FLASH_SECTOR_SIZE);
    let start_sector = address / FLASH_SECTOR_SIZE;
    let head_sectors =
        num_sectors.min(FLASH_SECTORS_PER_BLOCK - start_sector % FLASH_SECTORS_PER_BLOCK);

    if num_sectors < 2 * head_sectors {
        (num_sectors + 1).div_ceil(2) * FLASH_SECTOR_SIZE
    } else {
        (num_sectors - head_sectors) * FLASH_SECTOR_SIZE
    }
}

/// FLASH_BEGIN payload.
pub fn begin_payload(erase_size: u32, num_blocks: u32, address: u32) -> [u8; 16] {
    let mut payload = [0u8; 16];
    LittleEndian::write_u32_into(
        &[erase_size, num_blocks, FLASH_BLOCK_SIZE, address],
        &mut payload,
    );
    payload
}

/// FLASH_DATA payload for block `seq` of a region starting at `address`.
///
/// `chunk` is padded to a full block. Block 0 of an image written to
/// address 0 gets `flash_info` patched into header bytes 2 and 3.
pub fn data_payload(address: u32, seq: u32, chunk: &[u8], flash_info: [u8; 2]) -> Vec<u8> {
    let block_len = FLASH_BLOCK_SIZE as usize;
    let mut payload = Vec::with_capacity(DATA_SUBHEADER_LEN + block_len);
    payload.resize(DATA_SUBHEADER_LEN, 0);
    LittleEndian::write_u32_into(&[FLASH_BLOCK_SIZE, seq, 0, 0], &mut payload);

    payload.extend_from_slice(chunk);
    payload.resize(DATA_SUBHEADER_LEN + block_len, PAD_BYTE);

    let block = &mut payload[DATA_SUBHEADER_LEN..];
    if address == 0 && seq == 0 && block[0] == ESP_IMAGE_MAGIC {
        block[2..4].copy_from_slice(&flash_info);
    }
    payload
}

/// FLASH_DONE payload. The ROM expects 0 to reboot and 1 to stay.
pub fn done_payload(reboot: bool) -> [u8; 4] {
    u32::from(!reboot).to_le_bytes()
}

fn region_size(data: &[u8]) -> Result<u32> {
    u32::try_from(data.len())
        .map_err(|_| Error::InvalidRequest(format!("{} bytes do not fit in flash", data.len())))
}

impl<P: Port> Session<P> {
    /// Announce a region and let the boot ROM erase it.
    ///
    /// Returns the erase size that was sent.
    pub fn prepare_flash_region(&mut self, address: u32, size: u32) -> Result<u32> {
        let result = self.begin_region(address, size);
        self.report(result)
    }

    /// Erase and program `data` at `address`.
    pub fn write_flash_region(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let result = self.write_region(address, data);
        self.report(result)
    }

    /// Write every region in order, then finish.
    pub fn flash_regions(&mut self, regions: &[FlashRegion], reboot: bool) -> Result<()> {
        for region in regions {
            self.write_flash_region(region.address, &region.data)?;
        }
        self.finish(reboot)
    }

    /// Erase a region without programming it.
    pub fn erase_region(&mut self, address: u32, size: u32) -> Result<()> {
        info!("Erasing {size} bytes at 0x{address:08X}");
        self.prepare_flash_region(address, size)
            .map(|_| ())
    }

    /// End the flashing session; with `reboot` the target runs its firmware.
    pub fn finish(&mut self, reboot: bool) -> Result<()> {
        let result = self.finish_flash(reboot);
        self.report(result)
    }

    /// Close the flash session without rebooting.
    pub(crate) fn leave_bootloader(&mut self) -> Result<()> {
        self.write_flash_region(0, &[])?;
        self.finish(false)
    }

    fn ensure_synchronized(&self) -> Result<()> {
        if self.state() == LinkState::Synchronized {
            Ok(())
        } else {
            Err(Error::InvalidRequest(format!(
                "link is not synchronized ({:?})",
                self.state()
            )))
        }
    }

    fn begin_region(&mut self, address: u32, size: u32) -> Result<u32> {
        self.ensure_synchronized()?;

        let erase = erase_size(address, size);
        let blocks = block_count(size);
        debug!("FLASH_BEGIN 0x{address:08X}: {size} bytes, {blocks} blocks, erase {erase}");

        let erase_budget = self
            .config()
            .erase_timeout_per_mb
            .mul_f64(f64::from(erase) / BYTES_PER_MB);
        let timeout = self.config().response_timeout + erase_budget;
        self.send_command_with_timeout(
            Command::FlashBegin,
            &begin_payload(erase, blocks, address),
            timeout,
        )?;

        self.emit(FlashEvent::EraseBegun {
            address,
            size,
            erase_size: erase,
        });
        Ok(erase)
    }

    fn write_region(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let size = region_size(data)?;
        self.begin_region(address, size)?;

        let total = block_count(size);
        if total == 0 {
            return Ok(());
        }
        info!("Writing {size} bytes at 0x{address:08X} ({total} blocks)");

        let flash_info = self.board().flash_info_bytes();
        if let Some(header) = ImageHeader::parse(data).filter(|_| address == 0) {
            debug!(
                "Image header flash info {:02X?} -> {flash_info:02X?}",
                header.flash_info_bytes()
            );
        }

        for (seq, chunk) in (0u32..).zip(data.chunks(FLASH_BLOCK_SIZE as usize)) {
            let payload = data_payload(address, seq, chunk, flash_info);
            self.send_command(Command::FlashData, &payload)?;
            debug!("Block {}/{total} written", seq + 1);
            self.emit(FlashEvent::BlockWritten { seq, total });
        }
        Ok(())
    }

    fn finish_flash(&mut self, reboot: bool) -> Result<()> {
        self.ensure_synchronized()?;
        self.send_command(Command::FlashDone, &done_payload(reboot))?;
        self.mark_finished();

        if reboot {
            info!("Flash complete, rebooting target");
        } else {
            info!("Flash complete, target stays in the boot ROM");
        }
        self.emit(FlashEvent::Finished { reboot });
        Ok(())
    }
}

/// Flashing operations, independent of the transport behind them.
pub trait Flasher {
    /// Reset the target into its boot ROM and synchronize.
    fn connect(&mut self) -> Result<()>;

    /// Write every region in order, then finish.
    fn flash_regions(&mut self, regions: &[FlashRegion], reboot: bool) -> Result<()>;

    /// Erase a region without programming it.
    fn erase_region(&mut self, address: u32, size: u32) -> Result<()>;

    /// End the flashing session.
    fn finish(&mut self, reboot: bool) -> Result<()>;

    /// Name of the port in use.
    fn port_name(&self) -> &str;

    /// Leave the boot ROM if still in it and release the port.
    ///
    /// Safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

impl<P: Port> Flasher for Session<P> {
    fn connect(&mut self) -> Result<()> {
        self.open()
    }

    fn flash_regions(&mut self, regions: &[FlashRegion], reboot: bool) -> Result<()> {
        Session::flash_regions(self, regions, reboot)
    }

    fn erase_region(&mut self, address: u32, size: u32) -> Result<()> {
        Session::erase_region(self, address, size)
    }

    fn finish(&mut self, reboot: bool) -> Result<()> {
        Session::finish(self, reboot)
    }

    fn port_name(&self) -> &str {
        self.port().name()
    }

    fn close(&mut self) -> Result<()> {
        Session::close(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{MockPort, response};
    use crate::protocol::command::SUCCESS;
    use crate::session::tests::{recorder, session};
    use std::sync::{Arc, Mutex};

    const SECTOR: u32 = FLASH_SECTOR_SIZE;

    fn synchronized(port: MockPort) -> Session<MockPort> {
        let mut session = session(port);
        session.sync().unwrap();
        session
    }

    fn data_blocks(port: &MockPort) -> Vec<&[u8]> {
        port.payloads(Command::FlashData)
    }

    #[test]
    fn test_erase_size_single_sector() {
        assert_eq!(erase_size(0, 4096), 4096);
        assert_eq!(erase_size(0, 1), 4096);
    }

    #[test]
    fn test_erase_size_within_first_block() {
        // 16 sectors from 0: head = 16, 16 < 32 so the halved branch applies.
        assert_eq!(erase_size(0, 16 * SECTOR), 9 * SECTOR);
    }

    #[test]
    fn test_erase_size_spanning_blocks() {
        // 33 sectors from 0: head = 16, 33 >= 32, so 33 - 16 sectors.
        assert_eq!(erase_size(0, 33 * SECTOR), 17 * SECTOR);
        // Starting at sector 14 leaves a head of 2.
        assert_eq!(erase_size(14 * SECTOR, 10 * SECTOR), 8 * SECTOR);
    }

    #[test]
    fn test_erase_size_empty() {
        assert_eq!(erase_size(0, 0), 0);
        assert_eq!(block_count(0), 0);
    }

    #[test]
    fn test_block_count() {
        assert_eq!(block_count(1), 1);
        assert_eq!(block_count(1024), 1);
        assert_eq!(block_count(2500), 3);
    }

    #[test]
    fn test_begin_payload_layout() {
        let payload = begin_payload(0x9000, 3, 0x1000);
        assert_eq!(
            payload,
            [
                0x00, 0x90, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
                0x10, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_done_payload_polarity() {
        assert_eq!(done_payload(true), [0, 0, 0, 0]);
        assert_eq!(done_payload(false), [1, 0, 0, 0]);
    }

    #[test]
    fn test_header_patched_at_address_zero() {
        let image = [0xE9, 0x03, 0x02, 0x20, 0x04, 0x00, 0x10, 0x40];
        let payload = data_payload(0, 0, &image, [0x00, 0x4F]);
        assert_eq!(&payload[16..24], &[0xE9, 0x03, 0x00, 0x4F, 0x04, 0x00, 0x10, 0x40]);
    }

    #[test]
    fn test_header_not_patched_elsewhere() {
        let image = [0xE9, 0x03, 0x02, 0x20];
        let at_offset = data_payload(0x1000, 0, &image, [0x00, 0x4F]);
        assert_eq!(&at_offset[16..20], &image);

        let not_image = [0xEA, 0x03, 0x02, 0x20];
        let payload = data_payload(0, 0, &not_image, [0x00, 0x4F]);
        assert_eq!(&payload[16..20], &not_image);

        let later_block = data_payload(0, 1, &image, [0x00, 0x4F]);
        assert_eq!(&later_block[16..20], &image);
    }

    #[test]
    fn test_short_image_patched_after_padding() {
        let payload = data_payload(0, 0, &[0xE9], [0x02, 0x20]);
        assert_eq!(&payload[16..20], &[0xE9, 0xFF, 0x02, 0x20]);
    }

    #[test]
    fn test_write_region_chunks_and_pads() {
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let mut session = synchronized(MockPort::echo_success());
        session
            .write_flash_region(0x1000, &data)
            .unwrap();

        let begin = session.port().payloads(Command::FlashBegin);
        assert_eq!(begin, vec![&begin_payload(erase_size(0x1000, 2500), 3, 0x1000)[..]]);

        let blocks = data_blocks(session.port());
        assert_eq!(blocks.len(), 3);
        for (seq, block) in (0u32..).zip(&blocks) {
            assert_eq!(block.len(), 16 + 1024);
            assert_eq!(LittleEndian::read_u32(&block[0..4]), 1024);
            assert_eq!(LittleEndian::read_u32(&block[4..8]), seq);
            assert_eq!(&block[8..16], &[0; 8]);
        }
        assert_eq!(&blocks[2][16..16 + 452], &data[2048..]);
        assert!(blocks[2][16 + 452..].iter().all(|&b| b == PAD_BYTE));
    }

    #[test]
    fn test_write_region_events() {
        let (mut session, events) = recorder(synchronized(MockPort::echo_success()));
        session
            .write_flash_region(0, &[0u8; 2048])
            .unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                FlashEvent::EraseBegun {
                    address: 0,
                    size: 2048,
                    erase_size: 4096
                },
                FlashEvent::BlockWritten { seq: 0, total: 2 },
                FlashEvent::BlockWritten { seq: 1, total: 2 },
            ]
        );
    }

    #[test]
    fn test_failed_block_stops_transfer() {
        let port = MockPort::new(|command, _| match command {
            Command::FlashData => vec![response(command, &[0x01, 0x06])],
            _ => vec![response(command, &SUCCESS)],
        });
        let (mut session, events) = recorder(synchronized(port));

        let err = session
            .write_flash_region(0x2000, &[0u8; 2048])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol {
                command: Command::FlashData,
                ..
            }
        ));
        assert_eq!(data_blocks(session.port()).len(), 1);
        assert!(matches!(
            events.lock().unwrap().last(),
            Some(FlashEvent::Error {
                kind: crate::error::ErrorKind::Protocol,
                ..
            })
        ));
    }

    #[test]
    fn test_failed_begin_sends_no_data() {
        let port = MockPort::new(|command, _| match command {
            Command::FlashBegin => vec![response(command, &[0x01, 0x05])],
            _ => vec![response(command, &SUCCESS)],
        });
        let mut session = synchronized(port);
        assert!(session.write_flash_region(0, &[0u8; 16]).is_err());
        assert!(data_blocks(session.port()).is_empty());
    }

    #[test]
    fn test_write_requires_sync() {
        let mut session = session(MockPort::echo_success());
        assert!(matches!(
            session.write_flash_region(0, &[0u8; 16]),
            Err(Error::InvalidRequest(_))
        ));
        assert!(session.port().requests.is_empty());
    }

    #[test]
    fn test_flash_regions_in_order_then_finish() {
        let mut session = synchronized(MockPort::echo_success());
        let regions = [
            FlashRegion::new(0x0, vec![0xE9, 0, 0, 0]),
            FlashRegion::new(0x40000, vec![0xAA; 1500]),
        ];
        session
            .flash_regions(&regions, true)
            .unwrap();

        assert_eq!(
            session.port().commands(),
            vec![
                Command::Sync,
                Command::FlashBegin,
                Command::FlashData,
                Command::FlashBegin,
                Command::FlashData,
                Command::FlashData,
                Command::FlashDone,
            ]
        );
        assert_eq!(session.port().payloads(Command::FlashDone), vec![&[0u8, 0, 0, 0][..]]);
        assert_eq!(
            &data_blocks(session.port())[0][16..20],
            &[0xE9, 0x00, 0x00, 0x4F]
        );
        assert!(!session.is_synchronized());
    }

    #[test]
    fn test_erase_region_only_begins() {
        let mut session = synchronized(MockPort::echo_success());
        session
            .erase_region(0x10000, 0x20000)
            .unwrap();
        assert_eq!(session.port().commands(), vec![Command::Sync, Command::FlashBegin]);
    }

    #[test]
    fn test_close_leaves_bootloader() {
        let mut session = synchronized(MockPort::echo_success());
        session.close().unwrap();

        assert_eq!(
            session.port().commands(),
            vec![Command::Sync, Command::FlashBegin, Command::FlashDone]
        );
        assert_eq!(
            session.port().payloads(Command::FlashBegin),
            vec![&begin_payload(0, 0, 0)[..]]
        );
        assert_eq!(session.port().payloads(Command::FlashDone), vec![&[1u8, 0, 0, 0][..]]);
        assert!(session.port().closed);
    }

    #[test]
    fn test_close_after_finish_only_releases() {
        let mut session = synchronized(MockPort::echo_success());
        session.finish(false).unwrap();
        session.close().unwrap();
        assert_eq!(
            session.port().commands(),
            vec![Command::Sync, Command::FlashDone]
        );
    }

    #[test]
    fn test_close_releases_port_on_failure() {
        let port = MockPort::new(|command, _| match command {
            Command::FlashDone => vec![response(command, &[0x01, 0x07])],
            _ => vec![response(command, &SUCCESS)],
        });
        let mut session = synchronized(port);
        assert!(session.close().is_err());
        assert!(session.port().closed);
    }

    #[test]
    fn test_flasher_trait_object() {
        let finished = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&finished);
        let session = synchronized(MockPort::echo_success()).with_events(move |event| {
            if matches!(event, FlashEvent::Finished { reboot: false }) {
                *flag.lock().unwrap() = true;
            }
        });

        let mut flasher: Box<dyn Flasher> = Box::new(session);
        assert_eq!(flasher.port_name(), "mock");
        flasher.finish(false).unwrap();
        flasher.close().unwrap();
        assert!(*finished.lock().unwrap());
    }
}
