//! In-memory canonical forms of the ECMA-167 / OSTA-UDF volume descriptors:
//! PVD, LVD, PD, USD, IUVD, LVID, FSD, anchors, the VDS terminator, the
//! sparing table descriptor and the three partition map kinds.
//!
//! Grounded on `mkudffs/defaults.c`'s binary descriptor templates and
//! ECMA-167 part 3 (volume structure) / part 4 (file structure).

use alloc::vec::Vec;

use crate::error::UdfError;
use crate::types::{DescriptorTag, ExtentAd, Regid, ShortAd, Timestamp, U16Le, U32Le, tag_id};
use hadris_common::types::endian::Endian;

/// Anchor Volume Descriptor Pointer: points at the Main and Reserve VDS
/// extents. Written at fixed positions (256, N-256, N-1).
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct AnchorVolumeDescriptorPointer {
    pub tag: DescriptorTag,
    pub main_vds: ExtentAd,
    pub reserve_vds: ExtentAd,
    pub reserved: [u8; 480],
}

static_assertions::assert_eq_size!(AnchorVolumeDescriptorPointer, [u8; 512]);

impl AnchorVolumeDescriptorPointer {
    pub fn new(location: u32, main_vds: ExtentAd, reserve_vds: ExtentAd) -> Self {
        let mut avdp = Self {
            tag: DescriptorTag::new(tag_id::AVDP, 2, 0, location),
            main_vds,
            reserve_vds,
            reserved: [0; 480],
        };
        avdp.restamp();
        avdp
    }

    pub fn restamp(&mut self) {
        let payload_len = core::mem::size_of::<Self>() - 16;
        let bytes = bytemuck::bytes_of(self)[16..16 + payload_len].to_vec();
        self.tag.stamp(&bytes);
    }
}

/// Volume Structure Descriptor (ECMA-167 2/9.1): the fixed-size records
/// making up the Volume Recognition Sequence at byte offset 32768 — one
/// BEA01, one NSR02, one TEA01, each a full 2048-byte sector and untagged
/// (no `DescriptorTag`; that's a part-3/4 concept, not part 2's).
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct VolumeStructureDescriptor {
    pub structure_type: u8,
    pub standard_ident: [u8; 5],
    pub structure_version: u8,
    pub structure_data: [u8; 2041],
}

static_assertions::assert_eq_size!(VolumeStructureDescriptor, [u8; 2048]);

impl VolumeStructureDescriptor {
    pub const BEA01: &'static [u8; 5] = b"BEA01";
    pub const NSR02: &'static [u8; 5] = b"NSR02";
    pub const NSR03: &'static [u8; 5] = b"NSR03";
    pub const TEA01: &'static [u8; 5] = b"TEA01";

    pub fn new(structure_type: u8, standard_ident: &[u8; 5]) -> Self {
        Self { structure_type, standard_ident: *standard_ident, structure_version: 1, structure_data: [0; 2041] }
    }

    pub fn beginning_extended_area() -> Self {
        Self::new(0, Self::BEA01)
    }

    pub fn nsr(udf_revision: u16) -> Self {
        Self::new(0, if udf_revision >= 0x0200 { Self::NSR03 } else { Self::NSR02 })
    }

    pub fn terminating_extended_area() -> Self {
        Self::new(0, Self::TEA01)
    }
}

/// Primary Volume Descriptor.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct PrimaryVolumeDescriptor {
    pub tag: DescriptorTag,
    pub vol_desc_seq_num: U32Le,
    pub primary_vol_desc_num: U32Le,
    pub vol_ident: [u8; 32],
    pub vol_seq_num: U16Le,
    pub max_vol_seq_num: U16Le,
    pub interchange_level: U16Le,
    pub max_interchange_level: U16Le,
    pub char_set_list: U32Le,
    pub max_char_set_list: U32Le,
    pub vol_set_ident: [u8; 128],
    pub desc_char_set: [u8; 64],
    pub explanatory_char_set: [u8; 64],
    pub vol_abstract: ExtentAd,
    pub vol_copyright_notice: ExtentAd,
    pub application_ident: Regid,
    pub recording_date_time: Timestamp,
    pub implementation_ident: Regid,
    pub implementation_use: [u8; 64],
    pub predecessor_vds_location: U32Le,
    pub flags: U16Le,
    pub reserved: [u8; 22],
}

static_assertions::assert_eq_size!(PrimaryVolumeDescriptor, [u8; 512]);

impl PrimaryVolumeDescriptor {
    pub fn new(location: u32, seq_num: u32, vol_ident: &crate::types::DString, now: Timestamp, udf_revision: u16) -> Self {
        let mut pvd = Self {
            tag: DescriptorTag::new(tag_id::PVD, 2, 0, location),
            vol_desc_seq_num: U32Le::new(seq_num),
            primary_vol_desc_num: U32Le::new(0),
            vol_ident: vol_ident.to_field(32).try_into().unwrap_or([0; 32]),
            vol_seq_num: U16Le::new(1),
            max_vol_seq_num: U16Le::new(1),
            interchange_level: U16Le::new(3),
            max_interchange_level: U16Le::new(3),
            char_set_list: U32Le::new(1),
            max_char_set_list: U32Le::new(1),
            vol_set_ident: [0; 128],
            desc_char_set: cs0_charspec(),
            explanatory_char_set: cs0_charspec(),
            vol_abstract: ExtentAd::default(),
            vol_copyright_notice: ExtentAd::default(),
            application_ident: Regid::new("*OSTA UDF Compliant", udf_revision),
            recording_date_time: now,
            implementation_ident: Regid::domain_identifier(udf_revision),
            implementation_use: [0; 64],
            predecessor_vds_location: U32Le::new(0),
            flags: U16Le::new(0),
            reserved: [0; 22],
        };
        pvd.restamp();
        pvd
    }

    pub fn restamp(&mut self) {
        let payload_len = core::mem::size_of::<Self>() - 16;
        let bytes = bytemuck::bytes_of(self)[16..16 + payload_len].to_vec();
        self.tag.stamp(&bytes);
    }
}

fn cs0_charspec() -> [u8; 64] {
    let mut spec = [0u8; 64];
    spec[0] = 0; // CS0
    let ident = b"OSTA Compressed Unicode";
    spec[1..1 + ident.len()].copy_from_slice(ident);
    spec
}

/// Partition Descriptor.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct PartitionDescriptor {
    pub tag: DescriptorTag,
    pub vol_desc_seq_num: U32Le,
    pub partition_flags: U16Le,
    pub partition_number: U16Le,
    pub partition_contents: Regid,
    pub partition_contents_use: [u8; 128],
    pub access_type: U32Le,
    pub partition_starting_location: U32Le,
    pub partition_length: U32Le,
    pub implementation_ident: Regid,
    pub implementation_use: [u8; 128],
    pub reserved: [u8; 156],
}

static_assertions::assert_eq_size!(PartitionDescriptor, [u8; 512]);

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    NotSpecified = 0,
    Overwritable = 1,
    Rewritable = 2,
    WriteOnce = 3,
    ReadOnly = 4,
    Pseudo = 5,
}

impl PartitionDescriptor {
    pub fn new(location: u32, seq_num: u32, partition_number: u16, start: u32, length: u32, access: AccessType, udf_revision: u16) -> Self {
        let mut pd = Self {
            tag: DescriptorTag::new(tag_id::PD, 2, 0, location),
            vol_desc_seq_num: U32Le::new(seq_num),
            partition_flags: U16Le::new(1), // allocated
            partition_number: U16Le::new(partition_number),
            partition_contents: Regid::new("+NSR02", 0),
            partition_contents_use: [0; 128],
            access_type: U32Le::new(access as u32),
            partition_starting_location: U32Le::new(start),
            partition_length: U32Le::new(length),
            implementation_ident: Regid::domain_identifier(udf_revision),
            implementation_use: [0; 128],
            reserved: [0; 156],
        };
        pd.restamp();
        pd
    }

    pub fn restamp(&mut self) {
        let payload_len = core::mem::size_of::<Self>() - 16;
        let bytes = bytemuck::bytes_of(self)[16..16 + payload_len].to_vec();
        self.tag.stamp(&bytes);
    }
}

/// Logical Volume Descriptor. `partition_maps` is a variable-length area
/// stored separately since its length (`map_table_length`) varies by the
/// partition map types present.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct LogicalVolumeDescriptorHeader {
    pub tag: DescriptorTag,
    pub vol_desc_seq_num: U32Le,
    pub desc_char_set: [u8; 64],
    pub logical_vol_ident: [u8; 128],
    pub logical_block_size: U32Le,
    pub domain_ident: Regid,
    pub logical_vol_contents_use: [u8; 16],
    pub map_table_length: U32Le,
    pub num_partition_maps: U32Le,
    pub implementation_ident: Regid,
    pub implementation_use: [u8; 128],
    pub integrity_seq_extent: ExtentAd,
}

static_assertions::assert_eq_size!(LogicalVolumeDescriptorHeader, [u8; 440]);

impl LogicalVolumeDescriptorHeader {
    pub fn new(location: u32, seq_num: u32, block_size: u32, vol_ident: &crate::types::DString, map_table_length: u32, num_partition_maps: u32, udf_revision: u16) -> Self {
        let mut header = Self {
            tag: DescriptorTag::new(tag_id::LVD, 2, 0, location),
            vol_desc_seq_num: U32Le::new(seq_num),
            desc_char_set: cs0_charspec(),
            logical_vol_ident: vol_ident.to_field(128).try_into().unwrap_or([0; 128]),
            logical_block_size: U32Le::new(block_size),
            domain_ident: Regid::domain_identifier(udf_revision),
            logical_vol_contents_use: [0; 16],
            map_table_length: U32Le::new(map_table_length),
            num_partition_maps: U32Le::new(num_partition_maps),
            implementation_ident: Regid::domain_identifier(udf_revision),
            implementation_use: [0; 128],
            integrity_seq_extent: ExtentAd::default(),
        };
        header.restamp();
        header
    }

    pub fn restamp(&mut self) {
        let payload_len = core::mem::size_of::<Self>() - 16;
        let bytes = bytemuck::bytes_of(self)[16..16 + payload_len].to_vec();
        self.tag.stamp(&bytes);
    }

    /// Records the File Set Descriptor's extent in `logical_vol_contents_use`
    /// (ECMA-167 3/10.6.12: a long_ad pointing at the FSD).
    pub fn set_fsd_location(&mut self, fsd_icb: crate::types::LongAd) {
        self.logical_vol_contents_use[..16].copy_from_slice(bytemuck::bytes_of(&fsd_icb));
        self.restamp();
    }

    pub fn integrity_seq_extent(&self) -> ExtentAd {
        self.integrity_seq_extent
    }

    pub fn set_integrity_seq_extent(&mut self, extent: ExtentAd) {
        self.integrity_seq_extent = extent;
        self.restamp();
    }
}

/// Logical Volume Descriptor: the fixed header plus the variable-length
/// partition map table that immediately follows it on disc.
#[derive(Debug, Clone)]
pub struct LogicalVolumeDescriptor {
    pub header: LogicalVolumeDescriptorHeader,
    pub partition_maps: Vec<PartitionMap>,
}

impl LogicalVolumeDescriptor {
    pub fn new(location: u32, seq_num: u32, block_size: u32, vol_ident: &crate::types::DString, partition_maps: Vec<PartitionMap>, udf_revision: u16) -> Self {
        let map_table_length: usize = partition_maps.iter().map(PartitionMap::byte_len).sum();
        let header = LogicalVolumeDescriptorHeader::new(
            location,
            seq_num,
            block_size,
            vol_ident,
            map_table_length as u32,
            partition_maps.len() as u32,
            udf_revision,
        );
        Self { header, partition_maps }
    }

    /// Serializes the header followed by the packed partition map table.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = bytemuck::bytes_of(&self.header).to_vec();
        for map in &self.partition_maps {
            out.extend(map.to_bytes());
        }
        out
    }
}

/// Partition map kinds: type-1 (normal), or type-2 sparable/virtual,
/// identified by their leading regid signature.
#[derive(Debug, Clone)]
pub enum PartitionMap {
    Type1 { volume_seq_num: u16, partition_number: u16 },
    Sparable { packet_length: u16, num_sparing_tables: u8, size_of_sparing_table: u32, partition_number: u16, locations: Vec<u32> },
    Virtual { volume_seq_num: u16, partition_number: u16 },
}

impl PartitionMap {
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Type1 { .. } => 6,
            Self::Sparable { locations, .. } => 64 + locations.len() * 4,
            Self::Virtual { .. } => 64,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = alloc::vec![0u8; self.byte_len()];
        match self {
            Self::Type1 { volume_seq_num, partition_number } => {
                out[0] = 1;
                out[1] = 6;
                out[2..4].copy_from_slice(&volume_seq_num.to_le_bytes());
                out[4..6].copy_from_slice(&partition_number.to_le_bytes());
            }
            Self::Sparable { packet_length, num_sparing_tables, size_of_sparing_table, partition_number, locations } => {
                out[0] = 2;
                out[1] = self.byte_len() as u8;
                let regid = Regid::new("*UDF Sparable Partition", 0);
                out[4..36].copy_from_slice(bytemuck::bytes_of(&regid));
                out[36..38].copy_from_slice(&partition_number.to_le_bytes());
                out[38..40].copy_from_slice(&packet_length.to_le_bytes());
                out[40] = *num_sparing_tables;
                out[44..48].copy_from_slice(&size_of_sparing_table.to_le_bytes());
                for (i, loc) in locations.iter().enumerate() {
                    let off = 48 + i * 4;
                    out[off..off + 4].copy_from_slice(&loc.to_le_bytes());
                }
            }
            Self::Virtual { volume_seq_num, partition_number } => {
                out[0] = 2;
                out[1] = self.byte_len() as u8;
                let regid = Regid::new("*UDF Virtual Partition", 0);
                out[4..36].copy_from_slice(bytemuck::bytes_of(&regid));
                out[36..38].copy_from_slice(&volume_seq_num.to_le_bytes());
                out[38..40].copy_from_slice(&partition_number.to_le_bytes());
            }
        }
        out
    }

    /// Reverse of `to_bytes`: parses one partition map entry off the front
    /// of `buf` and returns it alongside the number of bytes it occupied.
    /// Type-2 maps are told apart by their regid suffix at byte 4.
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, usize), UdfError> {
        if buf.len() < 6 {
            return Err(UdfError::BadArgument("partition map entry shorter than its header"));
        }
        let len = buf[1] as usize;
        if buf.len() < len || len < 6 {
            return Err(UdfError::BadArgument("partition map entry length out of range"));
        }
        match buf[0] {
            1 => {
                let volume_seq_num = u16::from_le_bytes(buf[2..4].try_into().unwrap());
                let partition_number = u16::from_le_bytes(buf[4..6].try_into().unwrap());
                Ok((Self::Type1 { volume_seq_num, partition_number }, len))
            }
            2 => {
                let ident = &buf[5..28.min(len)];
                if ident.starts_with(b"*UDF Sparable Partition") {
                    let partition_number = u16::from_le_bytes(buf[36..38].try_into().unwrap());
                    let packet_length = u16::from_le_bytes(buf[38..40].try_into().unwrap());
                    let num_sparing_tables = buf[40];
                    let size_of_sparing_table = u32::from_le_bytes(buf[44..48].try_into().unwrap());
                    let mut locations = Vec::new();
                    let mut off = 48;
                    while off + 4 <= len {
                        locations.push(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()));
                        off += 4;
                    }
                    Ok((Self::Sparable { packet_length, num_sparing_tables, size_of_sparing_table, partition_number, locations }, len))
                } else {
                    let volume_seq_num = u16::from_le_bytes(buf[36..38].try_into().unwrap());
                    let partition_number = u16::from_le_bytes(buf[38..40].try_into().unwrap());
                    Ok((Self::Virtual { volume_seq_num, partition_number }, len))
                }
            }
            _ => Err(UdfError::BadArgument("unrecognised partition map type")),
        }
    }
}

/// Unallocated Space Descriptor (volume-space-level free extent list).
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct UnallocatedSpaceDescriptorHeader {
    pub tag: DescriptorTag,
    pub vol_desc_seq_num: U32Le,
    pub num_alloc_descs: U32Le,
}

static_assertions::assert_eq_size!(UnallocatedSpaceDescriptorHeader, [u8; 24]);

impl UnallocatedSpaceDescriptorHeader {
    pub fn new(location: u32, seq_num: u32, num_alloc_descs: u32) -> Self {
        let mut header = Self {
            tag: DescriptorTag::new(tag_id::USD, 2, 0, location),
            vol_desc_seq_num: U32Le::new(seq_num),
            num_alloc_descs: U32Le::new(num_alloc_descs),
        };
        header.restamp(&[]);
        header
    }

    pub fn restamp(&mut self, alloc_descs: &[u8]) {
        let payload_len = core::mem::size_of::<Self>() - 16;
        let mut bytes = bytemuck::bytes_of(self)[16..16 + payload_len].to_vec();
        bytes.extend_from_slice(alloc_descs);
        self.tag.stamp(&bytes);
    }
}

/// Unallocated Space Descriptor: the fixed header plus the free-extent
/// list (`ShortAd`s) it claims; unlike the LVD's partition maps, UDF
/// allows this area to be empty on a fully-allocated volume.
#[derive(Debug, Clone)]
pub struct UnallocatedSpaceDescriptor {
    pub header: UnallocatedSpaceDescriptorHeader,
    pub alloc_descs: Vec<ShortAd>,
}

impl UnallocatedSpaceDescriptor {
    pub fn new(location: u32, seq_num: u32, alloc_descs: Vec<ShortAd>) -> Self {
        let mut usd = Self { header: UnallocatedSpaceDescriptorHeader::new(location, seq_num, alloc_descs.len() as u32), alloc_descs };
        usd.restamp();
        usd
    }

    pub fn restamp(&mut self) {
        let mut bytes = Vec::with_capacity(self.alloc_descs.len() * 8);
        for ad in &self.alloc_descs {
            bytes.extend_from_slice(bytemuck::bytes_of(ad));
        }
        self.header.restamp(&bytes);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = bytemuck::bytes_of(&self.header).to_vec();
        for ad in &self.alloc_descs {
            out.extend_from_slice(bytemuck::bytes_of(ad));
        }
        out
    }
}

/// Implementation Use Volume Descriptor.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct ImplementationUseVolumeDescriptor {
    pub tag: DescriptorTag,
    pub vol_desc_seq_num: U32Le,
    pub impl_ident: Regid,
    pub log_vol_ident: [u8; 128],
    pub lv_info1: [u8; 36],
    pub lv_info2: [u8; 36],
    pub lv_info3: [u8; 36],
    pub impl_ident2: Regid,
    pub impl_use: [u8; 128],
}

static_assertions::assert_eq_size!(ImplementationUseVolumeDescriptor, [u8; 512]);

impl ImplementationUseVolumeDescriptor {
    pub fn new(location: u32, seq_num: u32, vol_ident: &crate::types::DString, udf_revision: u16) -> Self {
        let mut iuvd = Self {
            tag: DescriptorTag::new(tag_id::IUVD, 2, 0, location),
            vol_desc_seq_num: U32Le::new(seq_num),
            impl_ident: Regid::new("*UDF LV Info", udf_revision),
            log_vol_ident: vol_ident.to_field(128).try_into().unwrap_or([0; 128]),
            lv_info1: [0; 36],
            lv_info2: [0; 36],
            lv_info3: [0; 36],
            impl_ident2: Regid::domain_identifier(udf_revision),
            impl_use: [0; 128],
        };
        iuvd.restamp();
        iuvd
    }

    pub fn restamp(&mut self) {
        let payload_len = core::mem::size_of::<Self>() - 16;
        let bytes = bytemuck::bytes_of(self)[16..16 + payload_len].to_vec();
        self.tag.stamp(&bytes);
    }
}

/// Volume Descriptor Sequence terminator.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct Terminator {
    pub tag: DescriptorTag,
    pub reserved: [u8; 496],
}

static_assertions::assert_eq_size!(Terminator, [u8; 512]);

impl Terminator {
    pub fn new(location: u32) -> Self {
        let mut t = Self { tag: DescriptorTag::new(tag_id::TD, 2, 0, location), reserved: [0; 496] };
        t.tag.stamp(&[0; 496]);
        t
    }
}

/// File Set Descriptor. Sits at partition-relative block 0 of the FSD
/// extent recorded in the LVD's `logical_vol_contents_use`.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct FileSetDescriptor {
    pub tag: DescriptorTag,
    pub recording_date_time: Timestamp,
    pub interchange_level: U16Le,
    pub max_interchange_level: U16Le,
    pub char_set_list: U32Le,
    pub max_char_set_list: U32Le,
    pub file_set_number: U32Le,
    pub file_set_desc_number: U32Le,
    pub log_vol_ident_char_set: [u8; 64],
    pub log_vol_ident: [u8; 128],
    pub file_set_char_set: [u8; 64],
    pub file_set_ident: [u8; 32],
    pub copyright_file_ident: [u8; 32],
    pub abstract_file_ident: [u8; 32],
    pub root_dir_icb: crate::types::LongAd,
    pub domain_ident: Regid,
    pub next_ext: crate::types::LongAd,
    pub stream_dir_icb: crate::types::LongAd,
    pub reserved: [u8; 32],
}

static_assertions::assert_eq_size!(FileSetDescriptor, [u8; 512]);

/// Per-partition free/size entries embedded in the LVID's fixed part.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionIntegrity {
    pub free_space_table: u32,
    pub size_table: u32,
}

/// Logical Volume Integrity Descriptor. The fixed header; the
/// per-partition tables and the implementation-use area (file/dir counts,
/// revision window) are variable-length and modelled separately.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct LogicalVolumeIntegrityDescriptorHeader {
    pub tag: DescriptorTag,
    pub recording_date_time: Timestamp,
    pub integrity_type: U32Le,
    pub next_integrity_extent: ExtentAd,
    pub logical_volume_contents_use: [u8; 8], // first 8 bytes hold the 64-bit unique ID counter (split lo/hi elsewhere)
    pub num_partitions: U32Le,
    pub length_of_impl_use: U32Le,
}

static_assertions::assert_eq_size!(LogicalVolumeIntegrityDescriptorHeader, [u8; 80]);

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityType {
    Open = 0,
    Closed = 1,
}

/// In-memory LVID: header plus the variable per-partition tables and the
/// `{file count, dir count, min/max revision}` implementation-use block.
#[derive(Debug, Clone)]
pub struct LogicalVolumeIntegrity {
    pub integrity_type: IntegrityType,
    pub recording_date_time: Timestamp,
    pub unique_id: u64,
    pub partitions: Vec<PartitionIntegrity>,
    pub file_count: u32,
    pub dir_count: u32,
    pub min_udf_read_revision: u16,
    pub min_udf_write_revision: u16,
    pub max_udf_write_revision: u16,
}

impl LogicalVolumeIntegrity {
    pub fn new_open(now: Timestamp, num_partitions: usize, udf_revision: u16) -> Self {
        Self {
            integrity_type: IntegrityType::Open,
            recording_date_time: now,
            unique_id: 16, // first 16 IDs are reserved (0 = root dir sentinel per ECMA-167 conventions)
            partitions: alloc::vec![PartitionIntegrity::default(); num_partitions],
            file_count: 0,
            dir_count: 0,
            min_udf_read_revision: udf_revision,
            min_udf_write_revision: udf_revision,
            max_udf_write_revision: udf_revision,
        }
    }

    /// Advances the unique-ID counter per 4.G.4: +1 normally, +16 when the
    /// previous allocation landed on a 32-bit-overflow-alignment boundary.
    pub fn next_unique_id(&mut self) -> u32 {
        let id = self.unique_id as u32;
        let overflow_aligned = id == u32::MAX - (u32::MAX % 16);
        self.unique_id += if overflow_aligned { 16 } else { 1 };
        id
    }

    pub fn close(&mut self) {
        self.integrity_type = IntegrityType::Closed;
    }

    pub fn is_open(&self) -> bool {
        self.integrity_type == IntegrityType::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avdp_round_trips_restamp() {
        let avdp = AnchorVolumeDescriptorPointer::new(256, ExtentAd::new(16, 32), ExtentAd::new(16, 48));
        let bytes = bytemuck::bytes_of(&avdp);
        let tag: DescriptorTag = *bytemuck::from_bytes(&bytes[..16]);
        assert!(tag.verify(&bytes[16..], 256).is_ok());
    }

    #[test]
    fn pvd_stamps_identifier_and_location() {
        let now = Timestamp::zero();
        let pvd = PrimaryVolumeDescriptor::new(32, 1, &crate::types::DString::from_str("LinuxUDF"), now, 0x0201);
        let bytes = bytemuck::bytes_of(&pvd);
        let tag: DescriptorTag = *bytemuck::from_bytes(&bytes[..16]);
        assert_eq!(tag.identifier.get(), tag_id::PVD);
        assert!(tag.verify(&bytes[16..], 32).is_ok());
    }

    #[test]
    fn partition_map_type1_serialises_to_6_bytes() {
        let map = PartitionMap::Type1 { volume_seq_num: 1, partition_number: 0 };
        assert_eq!(map.to_bytes().len(), 6);
    }

    #[test]
    fn lvid_unique_id_advances_by_one_normally() {
        let mut lvid = LogicalVolumeIntegrity::new_open(Timestamp::zero(), 1, 0x0201);
        let first = lvid.next_unique_id();
        let second = lvid.next_unique_id();
        assert_eq!(second, first + 1);
    }

    #[test]
    fn lvd_serializes_header_then_partition_maps() {
        let maps = alloc::vec![PartitionMap::Type1 { volume_seq_num: 1, partition_number: 0 }];
        let lvd = LogicalVolumeDescriptor::new(33, 2, 2048, &crate::types::DString::from_str("vol"), maps, 0x0201);
        let bytes = lvd.to_bytes();
        assert_eq!(bytes.len(), 440 + 6);
        let tag: DescriptorTag = *bytemuck::from_bytes(&bytes[..16]);
        assert_eq!(tag.identifier.get(), tag_id::LVD);
    }

    #[test]
    fn usd_with_no_free_extents_still_stamps_clean() {
        let usd = UnallocatedSpaceDescriptor::new(34, 2, Vec::new());
        let bytes = usd.to_bytes();
        assert_eq!(bytes.len(), 24);
        let tag: DescriptorTag = *bytemuck::from_bytes(&bytes[..16]);
        assert!(tag.verify(&bytes[16..], 34).is_ok());
    }

    #[test]
    fn iuvd_carries_the_lv_info_identifier() {
        let iuvd = ImplementationUseVolumeDescriptor::new(35, 2, &crate::types::DString::from_str("vol"), 0x0201);
        assert_eq!(iuvd.tag.identifier.get(), tag_id::IUVD);
    }

    #[test]
    fn vrs_entries_use_the_right_standard_identifiers() {
        assert_eq!(&VolumeStructureDescriptor::beginning_extended_area().standard_ident, b"BEA01");
        assert_eq!(&VolumeStructureDescriptor::nsr(0x0201).standard_ident, b"NSR02");
        assert_eq!(&VolumeStructureDescriptor::terminating_extended_area().standard_ident, b"TEA01");
    }

    #[test]
    fn lvid_starts_open_and_can_close() {
        let mut lvid = LogicalVolumeIntegrity::new_open(Timestamp::zero(), 1, 0x0201);
        assert!(lvid.is_open());
        lvid.close();
        assert!(!lvid.is_open());
    }
}
