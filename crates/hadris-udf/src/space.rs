//! Space allocation within a partition: a bitmap variant (one bit per
//! block, stored as a Space Bitmap Descriptor) and a table variant (a
//! sequence of free-run `short_ad`s, stored as an Unallocated Space Entry).
//!
//! Grounded on `libudffs`'s `udf_space` allocator (bitmap walk with
//! alignment skip, the free-short_ad-list scan-and-split for table mode).

use alloc::vec;
use alloc::vec::Vec;

use crate::error::UdfError;
use crate::types::{AllocType, DescriptorTag, ShortAd, tag_id};
use crate::vat::{VatEngine, VatFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    Bitmap,
    Table,
}

/// A contiguous free run, used by the table variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRun {
    start: u32,
    blocks: u32,
}

/// Append-only media: no free list at all, just a cursor tracking the next
/// unused physical block plus the VAT that records virtual-to-physical
/// translations as they're handed out.
pub struct VatSpace {
    pub vat: VatEngine,
    next_physical: u32,
}

pub enum SpaceManager {
    Bitmap(BitmapSpace),
    Table(TableSpace),
    Vat(VatSpace),
}

impl SpaceManager {
    pub fn new_bitmap(total_blocks: u32, alignment: u32) -> Self {
        Self::Bitmap(BitmapSpace::new(total_blocks, alignment))
    }

    pub fn new_table(total_blocks: u32, alignment: u32) -> Self {
        Self::Table(TableSpace::new(total_blocks, alignment))
    }

    /// `previous` carries a prior session's VAT contents plus its own ICB
    /// location, for continuing a multi-session append-only recording.
    pub fn new_vat(format: VatFormat, previous: Option<(Vec<u32>, u32)>, start_physical: u32) -> Self {
        Self::Vat(VatSpace { vat: VatEngine::new(format, previous), next_physical: start_physical })
    }

    pub fn kind(&self) -> Option<SpaceKind> {
        match self {
            Self::Bitmap(_) => Some(SpaceKind::Bitmap),
            Self::Table(_) => Some(SpaceKind::Table),
            Self::Vat(_) => None,
        }
    }

    pub fn free_blocks(&self) -> u32 {
        match self {
            Self::Bitmap(b) => b.free_blocks,
            Self::Table(t) => t.free_blocks,
            Self::Vat(_) => 0,
        }
    }

    /// On bitmap/table media this is a real free-space search; on VAT
    /// media every allocation is a fresh virtual block number handed out
    /// at the current write cursor, which then advances past it.
    pub fn alloc_blocks(&mut self, start_hint: u32, n: u32) -> Result<u32, UdfError> {
        match self {
            Self::Bitmap(b) => b.alloc_blocks(start_hint, n),
            Self::Table(t) => t.alloc_blocks(start_hint, n),
            Self::Vat(v) => {
                if n == 0 {
                    return Err(UdfError::BadArgument("allocation of zero blocks"));
                }
                let physical = v.next_physical;
                let vbn = v.vat.alloc_vbn(physical)?;
                v.next_physical = v
                    .next_physical
                    .checked_add(n)
                    .ok_or(UdfError::NoSpace { blocks: n })?;
                Ok(vbn)
            }
        }
    }

    pub fn free_blocks_range(&mut self, lbn: u32, n: u32) -> Result<(), UdfError> {
        match self {
            Self::Bitmap(b) => b.free_blocks_range(lbn, n),
            Self::Table(t) => t.free_blocks_range(lbn, n),
            // Append-only media never reclaims physical space; unmapping a
            // virtual block number just drops it from the live VAT.
            Self::Vat(v) => {
                let _ = n;
                v.vat.unmap(lbn);
                Ok(())
            }
        }
    }

    /// Pre-reserves a range as permanently allocated (structural blocks:
    /// VDS, LVID, sparing table, partition header) without touching the
    /// free-space counter's logical meaning beyond the initial mark.
    pub fn reserve(&mut self, lbn: u32, n: u32) {
        match self {
            Self::Bitmap(b) => b.reserve(lbn, n),
            Self::Table(t) => t.reserve(lbn, n),
            Self::Vat(v) => v.next_physical = v.next_physical.max(lbn + n),
        }
    }

    pub fn vat(&self) -> Option<&VatEngine> {
        match self {
            Self::Vat(v) => Some(&v.vat),
            _ => None,
        }
    }
}

/// One bit per partition block; `1` = free, `0` = allocated.
pub struct BitmapSpace {
    bits: Vec<bool>,
    alignment: u32,
    free_blocks: u32,
}

impl BitmapSpace {
    fn new(total_blocks: u32, alignment: u32) -> Self {
        Self {
            bits: vec![true; total_blocks as usize],
            alignment: alignment.max(1),
            free_blocks: total_blocks,
        }
    }

    fn reserve(&mut self, lbn: u32, n: u32) {
        for i in lbn..lbn + n {
            if let Some(bit) = self.bits.get_mut(i as usize) {
                if *bit {
                    *bit = false;
                    self.free_blocks -= 1;
                }
            }
        }
    }

    fn align_up(&self, pos: u32) -> u32 {
        let rem = pos % self.alignment;
        if rem == 0 {
            pos
        } else {
            pos + (self.alignment - rem)
        }
    }

    fn alloc_blocks(&mut self, start_hint: u32, n: u32) -> Result<u32, UdfError> {
        if n == 0 {
            return Err(UdfError::BadArgument("allocation of zero blocks"));
        }
        let total = self.bits.len() as u32;
        let mut pos = self.align_up(start_hint.min(total));
        while pos + n <= total {
            if self.bits[pos as usize..(pos + n) as usize].iter().all(|&b| b) {
                for bit in &mut self.bits[pos as usize..(pos + n) as usize] {
                    *bit = false;
                }
                self.free_blocks -= n;
                return Ok(pos);
            }
            // Skip past the first allocated bit found, then realign.
            let blocked_at = self.bits[pos as usize..]
                .iter()
                .position(|&b| !b)
                .map(|off| pos + off as u32)
                .unwrap_or(total);
            pos = self.align_up(blocked_at + 1);
        }
        Err(UdfError::NoSpace { blocks: n })
    }

    fn free_blocks_range(&mut self, lbn: u32, n: u32) -> Result<(), UdfError> {
        for i in lbn..lbn + n {
            let bit = self.bits.get_mut(i as usize).ok_or(UdfError::BadArgument("free() out of range"))?;
            if !*bit {
                *bit = true;
                self.free_blocks += 1;
            }
        }
        Ok(())
    }

    /// Renders the bitmap as an on-disc Space Bitmap Descriptor (ECMA-167
    /// 4/14.12): tag, bit/byte counts, then one bit per block, `1` meaning
    /// free (the same sense this engine's in-memory `bits` vector uses).
    pub fn to_descriptor_bytes(&self, location: u32) -> Vec<u8> {
        let num_of_bits = self.bits.len() as u32;
        let num_of_bytes = num_of_bits.div_ceil(8);
        let mut payload = vec![0u8; 8 + num_of_bytes as usize];
        payload[0..4].copy_from_slice(&num_of_bits.to_le_bytes());
        payload[4..8].copy_from_slice(&num_of_bytes.to_le_bytes());
        for (i, &free) in self.bits.iter().enumerate() {
            if free {
                payload[8 + i / 8] |= 1 << (i % 8);
            }
        }
        let mut tag = DescriptorTag::new(tag_id::SBD, 3, 0, location);
        tag.stamp(&payload);
        let mut out = Vec::with_capacity(16 + payload.len());
        out.extend_from_slice(bytemuck::bytes_of(&tag));
        out.extend_from_slice(&payload);
        out
    }
}

/// Unallocated Space Entry variant: a sequence of free `short_ad` runs.
pub struct TableSpace {
    runs: Vec<FreeRun>,
    alignment: u32,
    free_blocks: u32,
}

impl TableSpace {
    fn new(total_blocks: u32, alignment: u32) -> Self {
        Self {
            runs: vec![FreeRun { start: 0, blocks: total_blocks }],
            alignment: alignment.max(1),
            free_blocks: total_blocks,
        }
    }

    fn reserve(&mut self, lbn: u32, n: u32) {
        let _ = self.carve(lbn, n);
    }

    fn align_up(&self, pos: u32) -> u32 {
        let rem = pos % self.alignment;
        if rem == 0 { pos } else { pos + (self.alignment - rem) }
    }

    fn alloc_blocks(&mut self, start_hint: u32, n: u32) -> Result<u32, UdfError> {
        if n == 0 {
            return Err(UdfError::BadArgument("allocation of zero blocks"));
        }
        for i in 0..self.runs.len() {
            let run = self.runs[i];
            let aligned_start = self.align_up(run.start.max(start_hint));
            let end = run.start + run.blocks;
            if aligned_start < end && end - aligned_start >= n {
                self.carve(aligned_start, n);
                self.free_blocks -= n;
                return Ok(aligned_start);
            }
        }
        Err(UdfError::NoSpace { blocks: n })
    }

    /// Removes `[start, start+n)` from whichever free run contains it,
    /// splitting the run into zero, one, or two remaining pieces.
    fn carve(&mut self, start: u32, n: u32) -> bool {
        for i in 0..self.runs.len() {
            let run = self.runs[i];
            let run_end = run.start + run.blocks;
            let carve_end = start + n;
            if run.start <= start && carve_end <= run_end {
                self.runs.remove(i);
                if run.start < start {
                    self.runs.insert(i, FreeRun { start: run.start, blocks: start - run.start });
                }
                if carve_end < run_end {
                    let insert_at = if run.start < start { i + 1 } else { i };
                    self.runs.insert(insert_at, FreeRun { start: carve_end, blocks: run_end - carve_end });
                }
                return true;
            }
        }
        false
    }

    /// Returns `[lbn, lbn+n)` to the free list, coalescing with adjacent
    /// runs by rewriting the list in start order.
    fn free_blocks_range(&mut self, lbn: u32, n: u32) -> Result<(), UdfError> {
        self.runs.push(FreeRun { start: lbn, blocks: n });
        self.runs.sort_by_key(|r| r.start);
        let mut merged: Vec<FreeRun> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.start + last.blocks == run.start {
                    last.blocks += run.blocks;
                    continue;
                }
            }
            merged.push(run);
        }
        self.runs = merged;
        self.free_blocks += n;
        Ok(())
    }

    /// Renders the free list as `short_ad`s for persisting an Unallocated
    /// Space Entry.
    pub fn to_short_ads(&self) -> Vec<ShortAd> {
        self.runs
            .iter()
            .map(|r| ShortAd::new(r.blocks * 2048, AllocType::RecordedAllocated, r.start))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_allocates_and_frees() {
        let mut space = BitmapSpace::new(1000, 1);
        let lbn = space.alloc_blocks(0, 10).unwrap();
        assert_eq!(lbn, 0);
        assert_eq!(space.free_blocks, 990);
        space.free_blocks_range(lbn, 10).unwrap();
        assert_eq!(space.free_blocks, 1000);
    }

    #[test]
    fn bitmap_respects_alignment() {
        let mut space = BitmapSpace::new(1000, 32);
        space.reserve(0, 5);
        let lbn = space.alloc_blocks(0, 10).unwrap();
        assert_eq!(lbn % 32, 0);
        assert!(lbn >= 32);
    }

    #[test]
    fn bitmap_skips_allocated_region() {
        let mut space = BitmapSpace::new(100, 1);
        space.reserve(10, 10);
        let lbn = space.alloc_blocks(5, 10).unwrap();
        assert_eq!(lbn, 20);
    }

    #[test]
    fn bitmap_fails_when_full() {
        let mut space = BitmapSpace::new(10, 1);
        assert!(space.alloc_blocks(0, 11).is_err());
    }

    #[test]
    fn table_splits_and_coalesces() {
        let mut table = TableSpace::new(1000, 1);
        let a = table.alloc_blocks(0, 100).unwrap();
        assert_eq!(a, 0);
        assert_eq!(table.runs.len(), 1);
        assert_eq!(table.runs[0].start, 100);

        table.free_blocks_range(a, 100).unwrap();
        assert_eq!(table.runs.len(), 1);
        assert_eq!(table.runs[0].start, 0);
        assert_eq!(table.runs[0].blocks, 1000);
    }

    #[test]
    fn bitmap_descriptor_bytes_stamp_a_verifiable_tag() {
        let mut space = BitmapSpace::new(64, 1);
        space.reserve(0, 10);
        let bytes = space.to_descriptor_bytes(7);
        let tag: DescriptorTag = *bytemuck::from_bytes(&bytes[..16]);
        assert_eq!(tag.identifier.get(), tag_id::SBD);
        assert!(tag.verify(&bytes[16..], 7).is_ok());
    }

    #[test]
    fn vat_space_allocates_sequentially_and_never_runs_out_of_free_blocks() {
        let mut space = SpaceManager::new_vat(VatFormat::V200, None, 0);
        let a = space.alloc_blocks(0, 1).unwrap();
        let b = space.alloc_blocks(0, 1).unwrap();
        assert_ne!(a, b);
        assert!(space.vat().unwrap().len() >= 2);
    }

    #[test]
    fn vat_space_reserve_does_not_error_on_already_used_physical_range() {
        let mut space = SpaceManager::new_vat(VatFormat::V200, None, 0);
        space.reserve(0, 2);
        assert!(space.alloc_blocks(0, 1).is_ok());
    }

    #[test]
    fn table_interior_free_splits_run() {
        let mut table = TableSpace::new(1000, 1);
        table.reserve(0, 1000);
        assert!(table.runs.is_empty());
        table.free_blocks_range(100, 50).unwrap();
        assert_eq!(table.runs.len(), 1);
        assert_eq!(table.runs[0], FreeRun { start: 100, blocks: 50 });
    }
}
