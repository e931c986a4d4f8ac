//! File Entry (FE) and Extended File Entry (EFE) engine: ICB metadata,
//! allocation-descriptor kind selection, and the embedded/short/long
//! allocation strategies.
//!
//! Grounded on `libudffs/file.c`'s `udf_create` (unique-ID allocation with
//! the +16 overflow-alignment bump) and ECMA-167 part 4 §14.9/14.17.

use alloc::vec::Vec;

use crate::error::UdfError;
use crate::types::{DescriptorTag, LongAd, Regid, ShortAd, Timestamp, tag_id};

/// ICB allocation-descriptor kind, the low bits of the ICB tag's flags
/// field.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdKind {
    InIcb = 0,
    Short = 1,
    Long = 2,
    Extended = 3,
}

/// ICB Tag: strategy type, number of entries, file type, and flags
/// (including the AD kind and the stream bit).
#[derive(Debug, Clone, Copy)]
pub struct IcbTag {
    pub strategy_type: u16,
    pub num_entries: u16,
    pub file_type: u8,
    pub flags: u16,
}

impl IcbTag {
    pub fn ad_kind(&self) -> AdKind {
        match self.flags & 0x7 {
            0 => AdKind::InIcb,
            1 => AdKind::Short,
            2 => AdKind::Long,
            _ => AdKind::Extended,
        }
    }

    pub fn set_ad_kind(&mut self, kind: AdKind) {
        self.flags = (self.flags & !0x7) | (kind as u16);
    }

    pub fn is_stream(&self) -> bool {
        self.flags & 0x10 != 0
    }
}

pub mod file_type {
    pub const UNDEF: u8 = 0;
    pub const DIRECTORY: u8 = 4;
    pub const REGULAR: u8 = 5;
    pub const STREAM_DIR: u8 = 14;
    pub const VAT20: u8 = 248;
}

/// The allocation-descriptor area's content: this is the Rust-native
/// replacement for type-punning through a raw byte buffer read by the AD
/// kind flag. Transitions consume the old strategy and produce the new
/// one so an ICB is never observed half-migrated.
#[derive(Debug, Clone)]
pub enum AllocStrategy {
    Embedded(Vec<u8>),
    Short(Vec<ShortAd>),
    Long(Vec<LongAd>),
}

impl AllocStrategy {
    pub fn kind(&self) -> AdKind {
        match self {
            Self::Embedded(_) => AdKind::InIcb,
            Self::Short(_) => AdKind::Short,
            Self::Long(_) => AdKind::Long,
        }
    }

    /// Converts an embedded strategy that no longer fits into extent-based
    /// storage. `extents` is the caller-supplied allocation covering the
    /// (now-external) content; `same_partition` selects short vs long ADs.
    pub fn grow_from_embedded(self, short_or_long: Vec<ShortAd>, long: Option<Vec<LongAd>>) -> Self {
        match self {
            Self::Embedded(_) => match long {
                Some(l) => Self::Long(l),
                None => Self::Short(short_or_long),
            },
            other => other,
        }
    }
}

/// Shared attribute set between FE and EFE (the EFE adds create time and
/// object size on top of these).
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub icb_tag: IcbTag,
    pub permissions: u32,
    pub link_count: u16,
    pub information_length: u64,
    pub logical_blocks_recorded: u64,
    pub access_time: Timestamp,
    pub modification_time: Timestamp,
    pub attribute_time: Timestamp,
    pub unique_id: u64,
    pub length_extended_attr: u32,
    pub alloc: AllocStrategy,
}

/// EFE adds a distinct creation timestamp and an object size (which, for
/// files with holes, may exceed `information_length`'s allocated bytes).
#[derive(Debug, Clone)]
pub struct ExtendedFileEntry {
    pub base: FileEntry,
    pub create_time: Timestamp,
    pub object_size: u64,
}

const FE_HEADER_SIZE: usize = 176;

impl FileEntry {
    pub fn new_embedded(file_type: u8, now: Timestamp, unique_id: u64) -> Self {
        Self {
            icb_tag: IcbTag { strategy_type: 4, num_entries: 1, file_type, flags: AdKind::InIcb as u16 },
            permissions: 0o644,
            link_count: 0,
            information_length: 0,
            logical_blocks_recorded: 0,
            access_time: now,
            modification_time: now,
            attribute_time: now,
            unique_id,
            length_extended_attr: 0,
            alloc: AllocStrategy::Embedded(Vec::new()),
        }
    }

    /// Chooses embedded vs short/long storage for `content_len` bytes,
    /// per §4.G: embed if it fits in `blocksize - header - ext_attrs`.
    pub fn choose_ad_kind(block_size: u32, length_extended_attr: u32, content_len: u64) -> AdKind {
        let capacity = block_size as u64 - FE_HEADER_SIZE as u64 - length_extended_attr as u64;
        if content_len <= capacity {
            AdKind::InIcb
        } else {
            AdKind::Short
        }
    }

    pub fn embedded_capacity(block_size: u32, length_extended_attr: u32) -> u64 {
        block_size as u64 - FE_HEADER_SIZE as u64 - length_extended_attr as u64
    }

    /// Writes `data` into the FE, embedding it if it fits, else requesting
    /// extents through `alloc` and converting the strategy.
    pub fn set_content(
        &mut self,
        data: &[u8],
        block_size: u32,
        mut alloc: impl FnMut(u32) -> Result<Vec<ShortAd>, UdfError>,
    ) -> Result<(), UdfError> {
        let capacity = Self::embedded_capacity(block_size, self.length_extended_attr);
        if (data.len() as u64) <= capacity {
            self.alloc = AllocStrategy::Embedded(data.to_vec());
            self.information_length = data.len() as u64;
            self.logical_blocks_recorded = 0;
            return Ok(());
        }
        let blocks_needed = (data.len() as u64).div_ceil(block_size as u64) as u32;
        let ads = alloc(blocks_needed)?;
        self.alloc = AllocStrategy::Short(ads);
        self.information_length = data.len() as u64;
        self.logical_blocks_recorded = blocks_needed as u64;
        self.icb_tag.set_ad_kind(self.alloc.kind());
        Ok(())
    }

    /// Encodes this File Entry to its on-disc bytes (ECMA-167 4/14.9),
    /// stamping the tag with `location` as the recorded block. The
    /// allocation-descriptor/embedded-content area follows the fixed
    /// header directly, matching `FE_HEADER_SIZE`.
    pub fn to_bytes(&self, location: u32, udf_revision: u16) -> Vec<u8> {
        let tail: Vec<u8> = match &self.alloc {
            AllocStrategy::Embedded(data) => data.clone(),
            AllocStrategy::Short(ads) => ads.iter().flat_map(|a| bytemuck::bytes_of(a).to_vec()).collect(),
            AllocStrategy::Long(ads) => ads.iter().flat_map(|a| bytemuck::bytes_of(a).to_vec()).collect(),
        };
        let mut buf = alloc::vec![0u8; FE_HEADER_SIZE + tail.len()];

        buf[20..22].copy_from_slice(&self.icb_tag.strategy_type.to_le_bytes());
        buf[24..26].copy_from_slice(&self.icb_tag.num_entries.to_le_bytes());
        buf[27] = self.icb_tag.file_type;
        buf[34..36].copy_from_slice(&self.icb_tag.flags.to_le_bytes());
        // icb_tag occupies 16..36 (20 bytes): the leading 4 (prior recorded
        // direct entries), the parent ICB location (28..34) and the
        // reserved byte (26) stay zero — this engine never builds ICB
        // hierarchies deeper than a single direct entry.

        buf[44..48].copy_from_slice(&self.permissions.to_le_bytes());
        buf[48..50].copy_from_slice(&self.link_count.to_le_bytes());
        buf[56..64].copy_from_slice(&self.information_length.to_le_bytes());
        buf[64..72].copy_from_slice(&self.logical_blocks_recorded.to_le_bytes());
        buf[72..84].copy_from_slice(bytemuck::bytes_of(&self.access_time));
        buf[84..96].copy_from_slice(bytemuck::bytes_of(&self.modification_time));
        buf[96..108].copy_from_slice(bytemuck::bytes_of(&self.attribute_time));
        buf[128..160].copy_from_slice(bytemuck::bytes_of(&Regid::domain_identifier(udf_revision)));
        buf[160..168].copy_from_slice(&self.unique_id.to_le_bytes());
        buf[168..172].copy_from_slice(&self.length_extended_attr.to_le_bytes());
        buf[172..176].copy_from_slice(&(tail.len() as u32).to_le_bytes());
        buf[176..].copy_from_slice(&tail);

        let mut tag = DescriptorTag::new(tag_id::FE, 3, 0, location);
        tag.stamp(&buf[16..]);
        buf[0..16].copy_from_slice(bytemuck::bytes_of(&tag));
        buf
    }

    /// Decodes a File Entry from its on-disc bytes (the reverse of
    /// `to_bytes`), verifying the tag against `location` first. The
    /// allocation-descriptor area is interpreted per the ICB tag's AD kind.
    pub fn from_bytes(buf: &[u8], location: u32) -> Result<Self, UdfError> {
        if buf.len() < FE_HEADER_SIZE {
            return Err(UdfError::TagInvalid { location, reason: "file entry shorter than its header" });
        }
        let tag: DescriptorTag = *bytemuck::from_bytes(&buf[..16]);
        tag.verify(&buf[16..], location)?;

        let strategy_type = u16::from_le_bytes(buf[20..22].try_into().unwrap());
        let num_entries = u16::from_le_bytes(buf[24..26].try_into().unwrap());
        let file_type = buf[27];
        let flags = u16::from_le_bytes(buf[34..36].try_into().unwrap());
        let icb_tag = IcbTag { strategy_type, num_entries, file_type, flags };

        let permissions = u32::from_le_bytes(buf[44..48].try_into().unwrap());
        let link_count = u16::from_le_bytes(buf[48..50].try_into().unwrap());
        let information_length = u64::from_le_bytes(buf[56..64].try_into().unwrap());
        let logical_blocks_recorded = u64::from_le_bytes(buf[64..72].try_into().unwrap());
        let access_time: Timestamp = *bytemuck::from_bytes(&buf[72..84]);
        let modification_time: Timestamp = *bytemuck::from_bytes(&buf[84..96]);
        let attribute_time: Timestamp = *bytemuck::from_bytes(&buf[96..108]);
        let unique_id = u64::from_le_bytes(buf[160..168].try_into().unwrap());
        let length_extended_attr = u32::from_le_bytes(buf[168..172].try_into().unwrap());
        let alloc_descs_len = u32::from_le_bytes(buf[172..176].try_into().unwrap()) as usize;
        let tail = &buf[176..176 + alloc_descs_len];

        let alloc = match icb_tag.ad_kind() {
            AdKind::InIcb => AllocStrategy::Embedded(tail.to_vec()),
            AdKind::Short => AllocStrategy::Short(tail.chunks_exact(8).map(|c| *bytemuck::from_bytes(c)).collect()),
            AdKind::Long | AdKind::Extended => AllocStrategy::Long(tail.chunks_exact(16).map(|c| *bytemuck::from_bytes(c)).collect()),
        };

        Ok(Self {
            icb_tag,
            permissions,
            link_count,
            information_length,
            logical_blocks_recorded,
            access_time,
            modification_time,
            attribute_time,
            unique_id,
            length_extended_attr,
            alloc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ad_kind_round_trips_through_flags() {
        let mut icb = IcbTag { strategy_type: 4, num_entries: 1, file_type: file_type::REGULAR, flags: 0 };
        icb.set_ad_kind(AdKind::Long);
        assert_eq!(icb.ad_kind(), AdKind::Long);
        icb.set_ad_kind(AdKind::InIcb);
        assert_eq!(icb.ad_kind(), AdKind::InIcb);
    }

    #[test]
    fn content_exactly_at_capacity_embeds() {
        let block_size = 2048u32;
        let capacity = FileEntry::embedded_capacity(block_size, 0);
        assert_eq!(FileEntry::choose_ad_kind(block_size, 0, capacity), AdKind::InIcb);
        assert_eq!(FileEntry::choose_ad_kind(block_size, 0, capacity + 1), AdKind::Short);
    }

    #[test]
    fn set_content_embeds_small_file() {
        let mut fe = FileEntry::new_embedded(file_type::REGULAR, Timestamp::zero(), 16);
        fe.set_content(b"hello", 2048, |_| unreachable!()).unwrap();
        assert!(matches!(fe.alloc, AllocStrategy::Embedded(ref b) if b == b"hello"));
        assert_eq!(fe.information_length, 5);
        assert_eq!(fe.logical_blocks_recorded, 0);
    }

    #[test]
    fn set_content_spills_to_extents_when_oversized() {
        let mut fe = FileEntry::new_embedded(file_type::REGULAR, Timestamp::zero(), 16);
        let big = alloc::vec![0u8; 4096];
        fe.set_content(&big, 2048, |n| Ok(alloc::vec![ShortAd::new(n * 2048, crate::types::AllocType::RecordedAllocated, 10)])).unwrap();
        assert!(matches!(fe.alloc, AllocStrategy::Short(_)));
        assert_eq!(fe.logical_blocks_recorded, 2);
    }

    #[test]
    fn set_content_flips_icb_tag_ad_kind_on_spill() {
        let mut fe = FileEntry::new_embedded(file_type::REGULAR, Timestamp::zero(), 16);
        assert_eq!(fe.icb_tag.ad_kind(), AdKind::InIcb);
        let big = alloc::vec![0u8; 4096];
        fe.set_content(&big, 2048, |n| Ok(alloc::vec![ShortAd::new(n * 2048, crate::types::AllocType::RecordedAllocated, 10)])).unwrap();
        assert_eq!(fe.icb_tag.ad_kind(), AdKind::Short);
    }

    #[test]
    fn to_bytes_stamps_a_verifiable_tag() {
        let mut fe = FileEntry::new_embedded(file_type::REGULAR, Timestamp::zero(), 16);
        fe.set_content(b"hello", 2048, |_| unreachable!()).unwrap();
        let bytes = fe.to_bytes(42, 0x0201);
        let tag: DescriptorTag = *bytemuck::from_bytes(&bytes[..16]);
        assert_eq!(tag.identifier.get(), tag_id::FE);
        assert!(tag.verify(&bytes[16..], 42).is_ok());
        assert_eq!(bytes.len(), FE_HEADER_SIZE + 5);
    }
}
