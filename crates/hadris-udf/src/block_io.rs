//! Block-addressed I/O over a backing device, with a packet cache for
//! rewritable packet-written (CD-RW-class) media.
//!
//! Grounded on `hadris-iso`'s `IsoImage<T: Read + Write + Seek>` pattern:
//! the engine is generic over any backing store that implements the
//! `hadris_io` I/O traits, so it works the same over a `File` or an
//! in-memory `Vec<u8>`-backed cursor in tests.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use hadris_io::{Read, Seek, SeekFrom, Write};

use crate::error::UdfError;
use crate::sparing::SparingEngine;
use crate::types::DescriptorTag;

/// Partition block addressing is relative to `PARTITION_START + offset`;
/// this sentinel selects absolute volume-space addressing instead.
pub const ABSOLUTE: u32 = u32::MAX;

/// Anything `hadris-udf` can treat as a block device: a seekable byte
/// stream the engine owns exclusively for the duration of a session.
pub trait BlockDevice: Read + Write + Seek {}
impl<T: Read + Write + Seek> BlockDevice for T {}

const PACKET_BLOCKS: u32 = 32;
const PACKET_POOL_SIZE: usize = 4;

#[derive(Debug, Clone)]
struct PacketBuffer {
    packet_start: u32,
    data: Vec<u8>,
    /// Per-block hold counters; a block cannot be evicted while held.
    holds: [u32; PACKET_BLOCKS as usize],
    dirty: [bool; PACKET_BLOCKS as usize],
}

impl PacketBuffer {
    fn is_evictable(&self) -> bool {
        self.holds.iter().all(|&h| h == 0)
    }

    fn is_dirty(&self) -> bool {
        self.dirty.iter().any(|&d| d)
    }
}

/// Block-addressed I/O. Provides direct (unbuffered) access for most media
/// and, for packet-written rewritable optical media, a small fixed pool of
/// 32-block packet buffers with verify-and-spare on write.
pub struct DirectBlockIo<T: BlockDevice> {
    device: T,
    block_size: u32,
    /// Caller-visible toggle for the drive's error-recovery mode; set
    /// during verify-after-write so failures surface instead of being
    /// silently corrected.
    pub strict_read: bool,
    packet_pool: Vec<PacketBuffer>,
    packets_enabled: bool,
    dirty_blocks: BTreeMap<u32, ()>,
    sparing: Option<SparingEngine>,
}

impl<T: BlockDevice> DirectBlockIo<T> {
    pub fn new(device: T, block_size: u32) -> Self {
        Self {
            device,
            block_size,
            strict_read: false,
            packet_pool: Vec::with_capacity(PACKET_POOL_SIZE),
            packets_enabled: false,
            dirty_blocks: BTreeMap::new(),
            sparing: None,
        }
    }

    /// Attach a sparing table so packet write failures can be remapped
    /// instead of surfacing as a hard error (CD-RW-class media).
    pub fn with_sparing(mut self, sparing: SparingEngine) -> Self {
        self.sparing = Some(sparing);
        self
    }

    /// Enables the packet-buffer pool for packet-written rewritable media.
    pub fn with_packet_cache(mut self, enabled: bool) -> Self {
        self.packets_enabled = enabled;
        self
    }

    pub fn sparing(&self) -> Option<&SparingEngine> {
        self.sparing.as_ref()
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Where a logical packet actually lives on the medium right now,
    /// after any prior remaps.
    fn physical_packet_start(&self, packet_start: u32) -> u32 {
        self.sparing.as_ref().map(|s| s.lookup(packet_start)).unwrap_or(packet_start)
    }

    fn resolve(&self, lbn: u32, partition_start: u32) -> u64 {
        let absolute_block = if partition_start == ABSOLUTE {
            lbn
        } else {
            partition_start + lbn
        };
        absolute_block as u64 * self.block_size as u64
    }

    /// Reads one logical block, transparently satisfied from the packet
    /// cache when packet mode is enabled and the block falls in a cached
    /// packet.
    pub fn read_block(&mut self, lbn: u32, partition_start: u32) -> Result<Vec<u8>, UdfError> {
        if self.packets_enabled && partition_start != ABSOLUTE {
            return self.read_block_packeted(lbn, partition_start);
        }
        let offset = self.resolve(lbn, partition_start);
        self.device.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; self.block_size as usize];
        self.device.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn write_block(&mut self, lbn: u32, partition_start: u32, src: &[u8]) -> Result<(), UdfError> {
        debug_assert_eq!(src.len(), self.block_size as usize);
        if self.packets_enabled && partition_start != ABSOLUTE {
            return self.write_block_packeted(lbn, partition_start, src);
        }
        let offset = self.resolve(lbn, partition_start);
        self.device.seek(SeekFrom::Start(offset))?;
        self.device.write_all(src)?;
        self.dirty_blocks.insert(lbn, ());
        Ok(())
    }

    /// Reads a block, verifies its descriptor tag and CRC, and returns the
    /// tag plus the full block payload.
    pub fn read_tagged(&mut self, lbn: u32, partition_start: u32) -> Result<(DescriptorTag, Vec<u8>), UdfError> {
        let block = self.read_block(lbn, partition_start)?;
        if block.len() < 16 {
            return Err(UdfError::TagInvalid { location: lbn, reason: "block shorter than tag" });
        }
        let tag: DescriptorTag = *bytemuck::from_bytes(&block[..16]);
        tag.verify(&block[16..], lbn)?;
        Ok((tag, block))
    }

    pub fn dirty(&mut self, lbn: u32, _partition_start: u32) {
        self.dirty_blocks.insert(lbn, ());
    }

    pub fn free_hold(&mut self, lbn: u32, partition_start: u32) {
        if !self.packets_enabled || partition_start == ABSOLUTE {
            return;
        }
        let absolute = partition_start + lbn;
        let packet_start = absolute - (absolute % PACKET_BLOCKS);
        let block_idx = (absolute - packet_start) as usize;
        if let Some(buf) = self.packet_pool.iter_mut().find(|b| b.packet_start == packet_start) {
            if buf.holds[block_idx] > 0 {
                buf.holds[block_idx] -= 1;
            }
        }
    }

    pub fn sync(&mut self) -> Result<(), UdfError> {
        if self.packets_enabled {
            let dirty_starts: Vec<u32> = self
                .packet_pool
                .iter()
                .filter(|b| b.is_dirty())
                .map(|b| b.packet_start)
                .collect();
            for start in dirty_starts {
                self.flush_packet(start)?;
            }
        }
        self.device.flush()?;
        self.dirty_blocks.clear();
        Ok(())
    }

    fn packet_index(&mut self, packet_start: u32) -> Result<usize, UdfError> {
        if let Some(idx) = self.packet_pool.iter().position(|b| b.packet_start == packet_start) {
            return Ok(idx);
        }
        if self.packet_pool.len() >= PACKET_POOL_SIZE {
            self.evict_one()?;
        }
        let mut data = vec![0u8; (PACKET_BLOCKS * self.block_size) as usize];
        let physical = self.physical_packet_start(packet_start);
        self.device.seek(SeekFrom::Start(physical as u64 * self.block_size as u64))?;
        // Best effort: a not-yet-written packet may be short or absent.
        let _ = self.device.read_exact(&mut data);
        self.packet_pool.push(PacketBuffer {
            packet_start,
            data,
            holds: [0; PACKET_BLOCKS as usize],
            dirty: [false; PACKET_BLOCKS as usize],
        });
        Ok(self.packet_pool.len() - 1)
    }

    fn evict_one(&mut self) -> Result<(), UdfError> {
        let candidate = self
            .packet_pool
            .iter()
            .position(|b| b.is_evictable() && !b.is_dirty())
            .or_else(|| self.packet_pool.iter().position(|b| b.is_evictable()));
        match candidate {
            Some(idx) => {
                if self.packet_pool[idx].is_dirty() {
                    let start = self.packet_pool[idx].packet_start;
                    self.flush_packet(start)?;
                }
                self.packet_pool.remove(idx);
                Ok(())
            }
            None => Err(UdfError::NoSpace { blocks: PACKET_BLOCKS }),
        }
    }

    /// Writes a cached packet back to the medium. When strict-read
    /// verification is on and the write-back doesn't read back clean, the
    /// packet is remapped to a spare location (if a sparing table is
    /// attached) and retried, bounded by the table's spare capacity.
    fn flush_packet(&mut self, packet_start: u32) -> Result<(), UdfError> {
        let idx = self
            .packet_pool
            .iter()
            .position(|b| b.packet_start == packet_start)
            .expect("flush_packet called on uncached packet");
        let data = self.packet_pool[idx].data.clone();
        let max_attempts = self.sparing.as_ref().map(|s| s.capacity() as u32).unwrap_or(0) + 1;
        let mut attempt = 0;
        loop {
            let physical = self.physical_packet_start(packet_start);
            self.device.seek(SeekFrom::Start(physical as u64 * self.block_size as u64))?;
            self.device.write_all(&data)?;
            if !self.strict_read {
                break;
            }
            self.device.seek(SeekFrom::Start(physical as u64 * self.block_size as u64))?;
            let mut check = vec![0u8; data.len()];
            self.device.read_exact(&mut check)?;
            if check == data {
                break;
            }
            attempt += 1;
            log::warn!("packet at logical block {packet_start} (physical {physical}) failed verify, attempt {attempt}/{max_attempts}");
            if attempt >= max_attempts {
                return Err(UdfError::TagInvalid { location: packet_start, reason: "packet verify failed after write" });
            }
            let Some(sparing) = self.sparing.as_mut() else {
                return Err(UdfError::TagInvalid { location: packet_start, reason: "packet verify failed after write" });
            };
            let remapped = sparing.remap(packet_start)?;
            log::debug!("remapped packet {packet_start} to spare block {remapped}");
        }
        self.packet_pool[idx].dirty = [false; PACKET_BLOCKS as usize];
        Ok(())
    }

    fn read_block_packeted(&mut self, lbn: u32, partition_start: u32) -> Result<Vec<u8>, UdfError> {
        let absolute = partition_start + lbn;
        let packet_start = absolute - (absolute % PACKET_BLOCKS);
        let block_idx = (absolute - packet_start) as usize;
        let idx = self.packet_index(packet_start)?;
        let bs = self.block_size as usize;
        self.packet_pool[idx].holds[block_idx] += 1;
        let buf = &self.packet_pool[idx];
        let slice = &buf.data[block_idx * bs..(block_idx + 1) * bs];
        Ok(slice.to_vec())
    }

    fn write_block_packeted(&mut self, lbn: u32, partition_start: u32, src: &[u8]) -> Result<(), UdfError> {
        let absolute = partition_start + lbn;
        let packet_start = absolute - (absolute % PACKET_BLOCKS);
        let block_idx = (absolute - packet_start) as usize;
        let idx = self.packet_index(packet_start)?;
        let bs = self.block_size as usize;
        self.packet_pool[idx].data[block_idx * bs..(block_idx + 1) * bs].copy_from_slice(src);
        self.packet_pool[idx].dirty[block_idx] = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn device(blocks: u32, block_size: u32) -> Cursor<Vec<u8>> {
        Cursor::new(vec![0u8; (blocks * block_size) as usize])
    }

    /// A `Cursor`-backed device that silently drops the first write to a
    /// chosen byte offset, simulating a defective packet on write-back.
    struct FlakyDevice {
        inner: Cursor<Vec<u8>>,
        fail_at_offset: u64,
        failed_once: bool,
    }

    impl std::io::Read for FlakyDevice {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            std::io::Read::read(&mut self.inner, buf)
        }
    }

    impl std::io::Write for FlakyDevice {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.failed_once && self.inner.position() == self.fail_at_offset {
                self.failed_once = true;
                // Pretend the write happened, but leave the medium unchanged.
                return Ok(buf.len());
            }
            std::io::Write::write(&mut self.inner, buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            std::io::Write::flush(&mut self.inner)
        }
    }

    impl std::io::Seek for FlakyDevice {
        fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
            std::io::Seek::seek(&mut self.inner, pos)
        }
    }

    #[test]
    fn direct_read_write_round_trips() {
        let mut io = DirectBlockIo::new(device(64, 2048), 2048);
        let payload = vec![0xABu8; 2048];
        io.write_block(10, 0, &payload).unwrap();
        let back = io.read_block(10, 0).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn absolute_addressing_ignores_partition_start() {
        let mut io = DirectBlockIo::new(device(64, 2048), 2048);
        let payload = vec![0x11u8; 2048];
        io.write_block(5, ABSOLUTE, &payload).unwrap();
        assert_eq!(io.read_block(5, ABSOLUTE).unwrap(), payload);
    }

    #[test]
    fn packet_cache_holds_across_read_and_write() {
        let mut io = DirectBlockIo::new(device(128, 2048), 2048).with_packet_cache(true);
        let a = vec![1u8; 2048];
        io.write_block(0, 0, &a).unwrap();
        io.write_block(1, 0, &a).unwrap();
        io.sync().unwrap();
        let back = io.read_block(0, 0).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn flush_packet_remaps_on_verify_failure() {
        let block_size = 2048u32;
        let device = FlakyDevice {
            inner: Cursor::new(vec![0u8; (128 * block_size) as usize]),
            fail_at_offset: 0,
            failed_once: false,
        };
        let sparing = SparingEngine::new(&[100]);
        let mut io = DirectBlockIo::new(device, block_size).with_packet_cache(true).with_sparing(sparing);
        io.strict_read = true;
        let payload = vec![0x42u8; block_size as usize];
        io.write_block(0, 0, &payload).unwrap();
        io.sync().unwrap();
        assert_eq!(io.sparing().unwrap().sequence_num(), 1);
        assert_eq!(io.read_block(0, 0).unwrap(), payload);
    }

    #[test]
    fn flush_packet_fails_without_sparing_on_verify_failure() {
        let block_size = 2048u32;
        let device = FlakyDevice {
            inner: Cursor::new(vec![0u8; (128 * block_size) as usize]),
            fail_at_offset: 0,
            failed_once: false,
        };
        let mut io = DirectBlockIo::new(device, block_size).with_packet_cache(true);
        io.strict_read = true;
        let payload = vec![0x42u8; block_size as usize];
        io.write_block(0, 0, &payload).unwrap();
        assert!(io.sync().is_err());
    }

    #[test]
    fn read_tagged_rejects_bad_checksum() {
        let mut io = DirectBlockIo::new(device(16, 2048), 2048);
        let mut block = vec![0u8; 2048];
        let tag = DescriptorTag::new(crate::types::tag_id::PVD, 2, 0, 0);
        block[..16].copy_from_slice(bytemuck::bytes_of(&tag));
        io.write_block(0, 0, &block).unwrap();
        assert!(io.read_tagged(0, 0).is_err());
    }
}
