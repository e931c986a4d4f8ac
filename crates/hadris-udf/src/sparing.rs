//! The sparing engine: a sorted remap table for defective packets on
//! CD-RW-class media, grounded on `cdrwtool`'s sparing table maintenance
//! and `pktsetup`'s packet-defect bookkeeping.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::UdfError;
use crate::types::Regid;

/// Sentinel marking a spare entry that is itself already a remap target,
/// to prevent remapping a remap.
const RECURSIVE_SPARE: u32 = 0xFFFF_FFF0;
const UNUSED: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparingEntry {
    pub orig_location: u32,
    pub mapped_location: u32,
}

/// In-memory sparing table: `capacity` total entries, pre-populated with
/// unused slots mapped to pre-allocated spare packets in SSPACE.
pub struct SparingEngine {
    entries: Vec<SparingEntry>,
    used: usize,
    sequence_num: u32,
    dirty: bool,
}

impl SparingEngine {
    /// `spare_packets` lists the pre-allocated spare packet locations; the
    /// table starts fully unused with each entry pointing at one spare.
    pub fn new(spare_packets: &[u32]) -> Self {
        let entries = spare_packets
            .iter()
            .map(|&mapped| SparingEntry { orig_location: UNUSED, mapped_location: mapped })
            .collect();
        Self { entries, used: 0, sequence_num: 0, dirty: false }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn sequence_num(&self) -> u32 {
        self.sequence_num
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Binary-searches used entries (sorted by `orig_location`, wildcards
    /// last); returns `orig` unchanged if not remapped.
    fn used_entries(&self) -> &[SparingEntry] {
        &self.entries[..self.used]
    }

    pub fn lookup(&self, orig: u32) -> u32 {
        match self.used_entries().binary_search_by_key(&orig, |e| e.orig_location) {
            Ok(idx) => self.entries[idx].mapped_location,
            Err(_) => orig,
        }
    }

    /// Remaps `orig` to the next unused spare entry, keeping the table
    /// sorted by `orig_location` with unused (wildcard) entries last.
    pub fn remap(&mut self, orig: u32) -> Result<u32, UdfError> {
        if self.used >= self.entries.len() {
            return Err(UdfError::SparingExhausted { capacity: self.entries.len() });
        }
        let mapped = self.entries[self.used].mapped_location;

        // If the packet being remapped is itself a spare packet already in
        // use as a remap target, mark it recursive instead of chaining.
        let orig = if self.used_entries().iter().any(|e| e.mapped_location == orig) {
            RECURSIVE_SPARE
        } else {
            orig
        };

        self.entries[self.used].orig_location = orig;
        self.used += 1;
        self.entries[..self.used].sort_by_key(|e| e.orig_location);
        self.sequence_num = self.sequence_num.wrapping_add(1);
        self.dirty = true;
        Ok(mapped)
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn entries(&self) -> &[SparingEntry] {
        &self.entries
    }

    /// Renders the table to its on-disc form (ECMA-167 2.2.11): untagged,
    /// identified only by a leading regid, `entries.len()` fixed-size map
    /// entries following the header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let regid = Regid::new("*UDF Sparing Table", 0);
        let mut out = vec![0u8; 40 + self.entries.len() * 8];
        out[0..32].copy_from_slice(bytemuck::bytes_of(&regid));
        out[32..34].copy_from_slice(&(self.entries.len() as u16).to_le_bytes());
        out[36..40].copy_from_slice(&self.sequence_num.to_le_bytes());
        for (i, entry) in self.entries.iter().enumerate() {
            let off = 40 + i * 8;
            out[off..off + 4].copy_from_slice(&entry.orig_location.to_le_bytes());
            out[off + 4..off + 8].copy_from_slice(&entry.mapped_location.to_le_bytes());
        }
        out
    }

    /// Reverse of `to_bytes`; does not validate the leading regid beyond
    /// its presence, matching how partition maps already just read past
    /// unrecognised implementation identifiers.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, UdfError> {
        if buf.len() < 40 {
            return Err(UdfError::BadArgument("sparing table shorter than its header"));
        }
        let num_entries = u16::from_le_bytes(buf[32..34].try_into().unwrap()) as usize;
        let sequence_num = u32::from_le_bytes(buf[36..40].try_into().unwrap());
        if buf.len() < 40 + num_entries * 8 {
            return Err(UdfError::BadArgument("sparing table shorter than its entry count implies"));
        }
        let mut entries = Vec::with_capacity(num_entries);
        let mut used = 0;
        for i in 0..num_entries {
            let off = 40 + i * 8;
            let orig_location = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
            let mapped_location = u32::from_le_bytes(buf[off + 4..off + 8].try_into().unwrap());
            if orig_location != UNUSED {
                used += 1;
            }
            entries.push(SparingEntry { orig_location, mapped_location });
        }
        entries.sort_by_key(|e| e.orig_location);
        Ok(Self { entries, used, sequence_num, dirty: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_orig_when_not_remapped() {
        let table = SparingEngine::new(&[100, 200, 300]);
        assert_eq!(table.lookup(0x820), 0x820);
    }

    #[test]
    fn remap_uses_next_spare_and_sorts() {
        let mut table = SparingEngine::new(&[100, 200, 300]);
        let mapped = table.remap(0x820).unwrap();
        assert_eq!(mapped, 100);
        assert_eq!(table.lookup(0x820), 100);
        assert_eq!(table.sequence_num(), 1);

        let mapped2 = table.remap(0x10).unwrap();
        assert_eq!(mapped2, 200);
        assert_eq!(table.lookup(0x10), 200);
        assert_eq!(table.lookup(0x820), 100);
        assert_eq!(table.sequence_num(), 2);
    }

    #[test]
    fn remap_fails_when_table_full() {
        let mut table = SparingEngine::new(&[100]);
        table.remap(0x820).unwrap();
        assert!(matches!(table.remap(0x900), Err(UdfError::SparingExhausted { capacity: 1 })));
    }

    #[test]
    fn to_bytes_round_trips_through_from_bytes() {
        let mut table = SparingEngine::new(&[100, 200, 300]);
        table.remap(0x820).unwrap();
        table.remap(0x10).unwrap();

        let bytes = table.to_bytes();
        assert_eq!(bytes.len(), 40 + 3 * 8);
        let decoded = SparingEngine::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.capacity(), table.capacity());
        assert_eq!(decoded.sequence_num(), table.sequence_num());
        assert_eq!(decoded.lookup(0x820), 100);
        assert_eq!(decoded.lookup(0x10), 200);
        assert_eq!(decoded.lookup(0x900), 0x900);
    }

    #[test]
    fn sequence_monotonically_increases() {
        let mut table = SparingEngine::new(&[1, 2, 3]);
        let mut last = 0;
        for orig in [10, 20, 30] {
            table.remap(orig).unwrap();
            assert!(table.sequence_num() > last);
            last = table.sequence_num();
        }
    }
}
