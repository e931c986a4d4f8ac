//! Volume: the in-memory model of a UDF volume, and the builder that lays
//! a fresh one onto a blank image.
//!
//! Grounded on `mkudffs`'s `udf_disc` / `udf_create_disc` layout algorithm
//! (reserved area, VRS, anchors, VDS placement, partition sizing) and
//! `hadris-iso`'s `FormatOption` builder for the options-struct shape.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::block_io::{ABSOLUTE, BlockDevice, DirectBlockIo};
use crate::descriptors::{
    AccessType, AnchorVolumeDescriptorPointer, FileSetDescriptor, ImplementationUseVolumeDescriptor,
    IntegrityType, LogicalVolumeDescriptor, LogicalVolumeDescriptorHeader, LogicalVolumeIntegrity,
    LogicalVolumeIntegrityDescriptorHeader, PartitionDescriptor, PartitionIntegrity, PartitionMap,
    PrimaryVolumeDescriptor, Terminator, UnallocatedSpaceDescriptor, VolumeStructureDescriptor,
};
use crate::directory::{Directory, DirectoryArena, DirectoryId, Fid, FidCharacteristics};
use crate::error::UdfError;
use crate::file_entry::{AllocStrategy, FileEntry, file_type};
use crate::media::{MediaType, SizeClass};
use crate::space::SpaceManager;
use crate::types::{AllocType, DString, DescriptorTag, ExtentAd, LongAd, Regid, ShortAd, Timestamp, U32Le, tag_id};
use crate::vat::VatFormat;
use crate::{BlockSize, UdfRevision};
use hadris_common::types::endian::Endian;

/// Byte offset of the Volume Recognition Sequence, fixed regardless of
/// block size.
pub const VRS_BYTE_OFFSET: u64 = 32768;
/// Block at which the first Anchor Volume Descriptor Pointer is written.
pub const FIRST_ANCHOR_BLOCK: u32 = 256;

/// Builder-pattern options for `Volume::format`, mirroring the chainable
/// `with_*` style used across the workspace's other format-option types.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub media_type: MediaType,
    pub block_size: BlockSize,
    pub total_blocks: u32,
    pub udf_revision: UdfRevision,
    pub label: String,
    pub use_efe: bool,
    pub closed: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            media_type: MediaType::Hd,
            block_size: BlockSize::default(),
            total_blocks: 0,
            udf_revision: UdfRevision::V201,
            label: String::new(),
            use_efe: true,
            closed: true,
        }
    }
}

impl FormatOptions {
    pub fn new(media_type: MediaType, total_blocks: u32) -> Self {
        Self { media_type, total_blocks, ..Self::default() }
    }

    pub fn with_block_size(mut self, block_size: BlockSize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_udf_revision(mut self, revision: UdfRevision) -> Self {
        self.udf_revision = revision;
        self.use_efe = revision.prefers_efe();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_closed(mut self, closed: bool) -> Self {
        self.closed = closed;
        self
    }
}

/// A non-overlapping region of the disc; the extent list partitions
/// `[0, total_blocks)` with no gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceType {
    Reserved,
    Vrs,
    Anchor,
    Pvds,
    Rvds,
    Lvid,
    Stable,
    Sspace,
    Pspace,
    Uspace,
    Bad,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtentEntry {
    pub start: u32,
    pub blocks: u32,
    pub space_type: SpaceType,
}

/// Start-sorted, gap-free, overlap-free partition of `[0, total_blocks)`.
#[derive(Debug, Clone)]
pub struct ExtentList {
    entries: Vec<ExtentEntry>,
}

impl ExtentList {
    fn new(total_blocks: u32) -> Self {
        Self { entries: alloc::vec![ExtentEntry { start: 0, blocks: total_blocks, space_type: SpaceType::Uspace }] }
    }

    /// Inserts a new non-USPACE extent, splitting the USPACE region it
    /// sits inside.
    pub fn set_extent(&mut self, start: u32, blocks: u32, space_type: SpaceType) -> Result<(), UdfError> {
        let end = start + blocks;
        let idx = self
            .entries
            .iter()
            .position(|e| e.space_type == SpaceType::Uspace && e.start <= start && end <= e.start + e.blocks)
            .ok_or(UdfError::BadArgument("set_extent target region is not free USPACE"))?;
        let region = self.entries[idx];
        self.entries.remove(idx);
        let mut insert_at = idx;
        if region.start < start {
            self.entries.insert(insert_at, ExtentEntry { start: region.start, blocks: start - region.start, space_type: SpaceType::Uspace });
            insert_at += 1;
        }
        self.entries.insert(insert_at, ExtentEntry { start, blocks, space_type });
        insert_at += 1;
        if end < region.start + region.blocks {
            self.entries.insert(insert_at, ExtentEntry { start: end, blocks: region.start + region.blocks - end, space_type: SpaceType::Uspace });
        }
        Ok(())
    }

    /// Finds the next USPACE region of at least `size` blocks, aligned,
    /// scanning forward from `from`.
    pub fn next_extent_size(&self, from: u32, size: u32, alignment: u32) -> Result<u32, UdfError> {
        let alignment = alignment.max(1);
        for e in &self.entries {
            if e.space_type != SpaceType::Uspace || e.start + e.blocks <= from {
                continue;
            }
            let candidate_start = e.start.max(from);
            let aligned = align_up(candidate_start, alignment);
            if aligned + size <= e.start + e.blocks {
                return Ok(aligned);
            }
        }
        Err(UdfError::NoSpace { blocks: size })
    }

    /// Finds the last USPACE region of at least `size` blocks, scanning
    /// backward from the tail.
    pub fn prev_extent_size(&self, size: u32, alignment: u32) -> Result<u32, UdfError> {
        let alignment = alignment.max(1);
        for e in self.entries.iter().rev() {
            if e.space_type != SpaceType::Uspace {
                continue;
            }
            let candidate_end = e.start + e.blocks;
            let aligned_start = align_down(candidate_end.saturating_sub(size), alignment);
            if aligned_start >= e.start && aligned_start + size <= candidate_end {
                return Ok(aligned_start);
            }
        }
        Err(UdfError::NoSpace { blocks: size })
    }

    pub fn entries(&self) -> &[ExtentEntry] {
        &self.entries
    }

    pub fn find_extent(&self, blkno: u32) -> Option<&ExtentEntry> {
        self.entries.iter().find(|e| e.start <= blkno && blkno < e.start + e.blocks)
    }
}

fn align_up(pos: u32, alignment: u32) -> u32 {
    let rem = pos % alignment;
    if rem == 0 { pos } else { pos + (alignment - rem) }
}

fn align_down(pos: u32, alignment: u32) -> u32 {
    pos - (pos % alignment)
}

/// The in-memory volume: extent list, descriptor set, space map and
/// directory tree, tied together as the single owner of all of it.
pub struct Volume {
    pub media_type: MediaType,
    pub block_size: BlockSize,
    pub total_blocks: u32,
    pub udf_revision: UdfRevision,
    pub extents: ExtentList,
    pub pvd: PrimaryVolumeDescriptor,
    pub pd: PartitionDescriptor,
    pub partition_maps: Vec<PartitionMap>,
    pub fsd: FileSetDescriptor,
    pub lvid: LogicalVolumeIntegrity,
    pub space: SpaceManager,
    pub directories: DirectoryArena,
    pub root_id: DirectoryId,
    /// File Entries indexed by the partition-relative block they're
    /// recorded at; directories and regular files share this table.
    pub files: BTreeMap<u32, FileEntry>,
    /// Raw content for File Entries whose data spilled out of the ICB
    /// (entries using `AllocStrategy::Embedded` keep their bytes inline and
    /// never appear here). Keyed the same way as `files`.
    pub content_blocks: BTreeMap<u32, Vec<u8>>,
}

impl Volume {
    /// Lays out and initialises a fresh volume per §4.I's algorithm.
    pub fn format(options: FormatOptions) -> Result<Self, UdfError> {
        let total_blocks = options.total_blocks;
        let block_size = options.block_size.get();
        if total_blocks == 0 {
            return Err(UdfError::BadArgument("total_blocks must be non-zero"));
        }
        let now = now_or_zero();
        let alignment = options.media_type.alignment();

        let mut extents = ExtentList::new(total_blocks);
        let reserved_blocks = (VRS_BYTE_OFFSET / block_size as u64) as u32;
        extents.set_extent(0, reserved_blocks, SpaceType::Reserved)?;
        extents.set_extent(reserved_blocks, 1, SpaceType::Vrs)?;
        extents.set_extent(FIRST_ANCHOR_BLOCK, 1, SpaceType::Anchor)?;
        if options.closed {
            extents.set_extent(total_blocks - 1, 1, SpaceType::Anchor)?;
        }

        let vds_size = options.media_type.sizing(SizeClass::Vds).size_for(total_blocks as u64);
        let lvid_size = options.media_type.sizing(SizeClass::Lvid).size_for(total_blocks as u64);

        let pvds_start = extents.next_extent_size(FIRST_ANCHOR_BLOCK + 1, vds_size, alignment)?;
        extents.set_extent(pvds_start, vds_size, SpaceType::Pvds)?;
        let rvds_start = extents.next_extent_size(pvds_start + vds_size, vds_size, alignment)?;
        extents.set_extent(rvds_start, vds_size, SpaceType::Rvds)?;
        let lvid_start = extents.next_extent_size(rvds_start + vds_size, lvid_size, alignment)?;
        extents.set_extent(lvid_start, lvid_size, SpaceType::Lvid)?;

        // Partition space fills the remaining aligned USPACE.
        let pspace_size = extents
            .entries()
            .iter()
            .filter(|e| e.space_type == SpaceType::Uspace)
            .map(|e| e.blocks)
            .max()
            .ok_or(UdfError::NoSpace { blocks: 1 })?;
        let pspace_start = extents.next_extent_size(lvid_start + lvid_size, pspace_size, alignment)?;
        extents.set_extent(pspace_start, pspace_size, SpaceType::Pspace)?;

        let space = match options.media_type.write_strategy() {
            crate::media::WriteStrategy::RewritableRandom | crate::media::WriteStrategy::Packet32Sparing => {
                SpaceManager::new_bitmap(pspace_size, alignment)
            }
            _ => SpaceManager::new_vat(vat_format_for(options.udf_revision), None, pspace_start),
        };

        let vol_ident = DString::from_str(&options.label);
        let pvd = PrimaryVolumeDescriptor::new(pvds_start, 1, &vol_ident, now, options.udf_revision.as_u16());
        let pd = PartitionDescriptor::new(
            pvds_start + 2,
            2,
            0,
            pspace_start,
            pspace_size,
            AccessType::Overwritable,
            options.udf_revision.as_u16(),
        );
        let partition_maps = alloc::vec![PartitionMap::Type1 { volume_seq_num: 1, partition_number: 0 }];

        let mut lvid = LogicalVolumeIntegrity::new_open(now, 1, options.udf_revision.as_u16());
        let root_unique_id = lvid.next_unique_id();
        lvid.dir_count = 1;

        let root_icb = LongAd::new(block_size, AllocType::RecordedAllocated, 1, 0).with_unique_id(root_unique_id);
        let fsd = build_fsd(root_icb, options.udf_revision.as_u16(), now);

        let mut directories = DirectoryArena::new();
        let root = Directory::new_root(root_icb);
        let root_id = directories.insert_root(root);

        let mut root_fe = FileEntry::new_embedded(file_type::DIRECTORY, now, root_unique_id as u64);
        root_fe.link_count = 1;
        let mut files = BTreeMap::new();
        files.insert(1u32, root_fe);

        let mut volume = Self {
            media_type: options.media_type,
            block_size: options.block_size,
            total_blocks,
            udf_revision: options.udf_revision,
            extents,
            pvd,
            pd,
            partition_maps,
            fsd,
            lvid,
            space,
            directories,
            root_id,
            files,
            content_blocks: BTreeMap::new(),
        };
        volume.space.reserve(0, 1); // partition block 0 holds the FSD
        volume.space.reserve(1, 1); // partition block 1 holds the root FE
        volume.sync_directory_content(root_id)?;
        volume.sync_lvid_free_space();
        log::debug!(
            "formatted {:?} volume: {} blocks, partition space {}..{}",
            options.media_type,
            total_blocks,
            pspace_start,
            pspace_start + pspace_size
        );
        Ok(volume)
    }

    pub fn root(&self) -> &Directory {
        self.directories.get(self.root_id)
    }

    pub fn root_mut(&mut self) -> &mut Directory {
        self.directories.get_mut(self.root_id)
    }

    /// Rewrites the LVID as CLOSED; called once at teardown after all
    /// descriptors have been flushed.
    pub fn close(&mut self) {
        self.lvid.close();
    }

    pub fn anchor(&self, location: u32) -> AnchorVolumeDescriptorPointer {
        let pvds = self.extents.entries().iter().find(|e| e.space_type == SpaceType::Pvds).unwrap();
        let rvds = self.extents.entries().iter().find(|e| e.space_type == SpaceType::Rvds).unwrap();
        AnchorVolumeDescriptorPointer::new(
            location,
            ExtentAd::new(pvds.blocks * self.block_size.get(), pvds.start),
            ExtentAd::new(rvds.blocks * self.block_size.get(), rvds.start),
        )
    }

    pub fn terminator(&self, location: u32) -> Terminator {
        Terminator::new(location)
    }

    /// Builds a Logical Volume Descriptor for the VDS copy at `location`,
    /// carrying the current partition map table and pointing its integrity
    /// sequence extent at the recorded LVID.
    pub fn lvd(&self, location: u32) -> LogicalVolumeDescriptor {
        let vol_ident = DString::from_field(&self.pvd.vol_ident);
        let mut lvd = LogicalVolumeDescriptor::new(
            location,
            self.pvd.vol_desc_seq_num.get(),
            self.block_size.get(),
            &vol_ident,
            self.partition_maps.clone(),
            self.udf_revision.as_u16(),
        );
        lvd.header.set_fsd_location(LongAd::new(self.block_size.get(), AllocType::RecordedAllocated, 0, 0));
        if let Some(lvid_extent) = self.extents.entries().iter().find(|e| e.space_type == SpaceType::Lvid) {
            lvd.header.set_integrity_seq_extent(ExtentAd::new(lvid_extent.blocks * self.block_size.get(), lvid_extent.start));
        }
        lvd
    }

    /// Builds an Unallocated Space Descriptor for the VDS copy at
    /// `location`. Only table-based space managers carry a free-extent
    /// list worth publishing here; bitmap/VAT media report an empty one.
    pub fn usd(&self, location: u32) -> UnallocatedSpaceDescriptor {
        let alloc_descs = match &self.space {
            SpaceManager::Table(t) => t.to_short_ads(),
            _ => Vec::new(),
        };
        UnallocatedSpaceDescriptor::new(location, self.pvd.vol_desc_seq_num.get(), alloc_descs)
    }

    pub fn iuvd(&self, location: u32) -> ImplementationUseVolumeDescriptor {
        let vol_ident = DString::from_field(&self.pvd.vol_ident);
        ImplementationUseVolumeDescriptor::new(location, self.pvd.vol_desc_seq_num.get(), &vol_ident, self.udf_revision.as_u16())
    }

    /// Encodes the Logical Volume Integrity Descriptor: the fixed header
    /// plus the per-partition free/size tables and the implementation-use
    /// tail (domain regid, file/dir counts, revision window).
    fn lvid_bytes(&self, location: u32) -> Vec<u8> {
        let num_partitions = self.lvid.partitions.len() as u32;
        let mut tables = Vec::with_capacity(self.lvid.partitions.len() * 8);
        for p in &self.lvid.partitions {
            tables.extend_from_slice(&p.free_space_table.to_le_bytes());
        }
        for p in &self.lvid.partitions {
            tables.extend_from_slice(&p.size_table.to_le_bytes());
        }

        let mut impl_use = Vec::with_capacity(48);
        impl_use.extend_from_slice(bytemuck::bytes_of(&Regid::domain_identifier(self.udf_revision.as_u16())));
        impl_use.extend_from_slice(&self.lvid.file_count.to_le_bytes());
        impl_use.extend_from_slice(&self.lvid.dir_count.to_le_bytes());
        impl_use.extend_from_slice(&self.lvid.min_udf_read_revision.to_le_bytes());
        impl_use.extend_from_slice(&self.lvid.min_udf_write_revision.to_le_bytes());
        impl_use.extend_from_slice(&self.lvid.max_udf_write_revision.to_le_bytes());
        impl_use.extend_from_slice(&[0u8; 2]);

        let mut contents_use = [0u8; 8];
        contents_use.copy_from_slice(&self.lvid.unique_id.to_le_bytes());

        let mut header = LogicalVolumeIntegrityDescriptorHeader {
            tag: DescriptorTag::new(tag_id::LVID, 2, 0, location),
            recording_date_time: self.lvid.recording_date_time,
            integrity_type: U32Le::new(self.lvid.integrity_type as u32),
            next_integrity_extent: ExtentAd::default(),
            logical_volume_contents_use: contents_use,
            num_partitions: U32Le::new(num_partitions),
            length_of_impl_use: U32Le::new(impl_use.len() as u32),
        };

        let mut tail = tables;
        tail.extend_from_slice(&impl_use);

        let payload_len = core::mem::size_of::<LogicalVolumeIntegrityDescriptorHeader>() - 16;
        let mut payload = bytemuck::bytes_of(&header)[16..16 + payload_len].to_vec();
        payload.extend_from_slice(&tail);
        header.tag.stamp(&payload);

        let mut out = bytemuck::bytes_of(&header).to_vec();
        out.extend_from_slice(&tail);
        out
    }

    /// Refreshes the per-partition free-block count the LVID reports;
    /// called after every allocation/free so a checker reading the LVID
    /// alone sees a number that matches the space map.
    pub fn sync_lvid_free_space(&mut self) {
        if let Some(p) = self.lvid.partitions.get_mut(0) {
            p.free_space_table = self.space.free_blocks();
        }
    }

    /// Writes `data` into the File Entry recorded at `fe_block`, embedding
    /// it or spilling to newly-allocated extents as `FileEntry::set_content`
    /// decides, and keeps `content_blocks` in sync with whichever strategy
    /// won (external content is kept here since `AllocStrategy` only stores
    /// allocation descriptors, not the bytes they point at).
    fn set_entry_content(&mut self, fe_block: u32, data: Vec<u8>) -> Result<(), UdfError> {
        let block_size = self.block_size.get();
        let Self { files, space, content_blocks, .. } = self;
        let fe = files.get_mut(&fe_block).ok_or(UdfError::BadArgument("no file entry at that block"))?;
        fe.set_content(&data, block_size, |n| {
            let start = space.alloc_blocks(0, n)?;
            Ok(vec![ShortAd::new(n * block_size, AllocType::RecordedAllocated, start)])
        })?;
        match &fe.alloc {
            AllocStrategy::Embedded(_) => {
                content_blocks.remove(&fe_block);
            }
            _ => {
                content_blocks.insert(fe_block, data);
            }
        }
        Ok(())
    }

    /// Sets a regular file's content, called from `cp`.
    pub fn set_file_content(&mut self, fe_block: u32, data: &[u8]) -> Result<(), UdfError> {
        self.set_entry_content(fe_block, data.to_vec())
    }

    /// Re-serializes a directory's FID stream and writes it into its own
    /// File Entry, stamping every FID with the block its bytes now start
    /// in.
    pub fn sync_directory_content(&mut self, dir_id: DirectoryId) -> Result<(), UdfError> {
        let fe_block = self.directories.get(dir_id).icb.block_number.get();
        let block_size = self.block_size.get();
        let content = self.directories.get_mut(dir_id).stamp_content(block_size, fe_block);
        self.set_entry_content(fe_block, content)
    }

    /// Writes the complete on-disc image: VRS, both anchors, both VDS
    /// copies (PVD/LVD/PD/USD/IUVD/terminator), the LVID, then the FSD and
    /// every File Entry (plus their external content) in partition space.
    pub fn write_to<T: BlockDevice>(&mut self, io: &mut DirectBlockIo<T>) -> Result<(), UdfError> {
        let block_size = self.block_size.get();
        log::info!("writing volume image: {} blocks, {} byte blocks", self.total_blocks, block_size);

        let vrs_start = (VRS_BYTE_OFFSET / block_size as u64) as u32;
        let vrs_stride = 2048u32.div_ceil(block_size).max(1);
        write_chunked(io, vrs_start, ABSOLUTE, bytemuck::bytes_of(&VolumeStructureDescriptor::beginning_extended_area()), block_size)?;
        write_chunked(io, vrs_start + vrs_stride, ABSOLUTE, bytemuck::bytes_of(&VolumeStructureDescriptor::nsr(self.udf_revision.as_u16())), block_size)?;
        write_chunked(io, vrs_start + vrs_stride * 2, ABSOLUTE, bytemuck::bytes_of(&VolumeStructureDescriptor::terminating_extended_area()), block_size)?;

        let avdp = self.anchor(FIRST_ANCHOR_BLOCK);
        write_chunked(io, FIRST_ANCHOR_BLOCK, ABSOLUTE, bytemuck::bytes_of(&avdp), block_size)?;
        if let Some(tail) = self.extents.entries().iter().find(|e| e.space_type == SpaceType::Anchor && e.start != FIRST_ANCHOR_BLOCK) {
            let avdp_tail = self.anchor(tail.start);
            write_chunked(io, tail.start, ABSOLUTE, bytemuck::bytes_of(&avdp_tail), block_size)?;
        }

        let pvds = self.extents.entries().iter().find(|e| e.space_type == SpaceType::Pvds).copied();
        let rvds = self.extents.entries().iter().find(|e| e.space_type == SpaceType::Rvds).copied();
        for vds in pvds.into_iter().chain(rvds) {
            self.write_vds_copy(io, vds.start)?;
        }

        if let Some(lvid_extent) = self.extents.entries().iter().find(|e| e.space_type == SpaceType::Lvid).copied() {
            let bytes = self.lvid_bytes(lvid_extent.start);
            write_chunked(io, lvid_extent.start, ABSOLUTE, &bytes, block_size)?;
        }

        if let Some(pspace) = self.extents.entries().iter().find(|e| e.space_type == SpaceType::Pspace).copied() {
            let partition_start = pspace.start;
            write_chunked(io, 0, partition_start, bytemuck::bytes_of(&self.fsd), block_size)?;

            for (&fe_block, fe) in &self.files {
                let bytes = fe.to_bytes(fe_block, self.udf_revision.as_u16());
                write_chunked(io, fe_block, partition_start, &bytes, block_size)?;
                if let (AllocStrategy::Short(ads), Some(content)) = (&fe.alloc, self.content_blocks.get(&fe_block)) {
                    let mut offset = 0usize;
                    for ad in ads {
                        let ad_blocks = ad.length().div_ceil(block_size).max(1) as usize;
                        let ad_bytes = ad_blocks * block_size as usize;
                        let end = (offset + ad_bytes).min(content.len());
                        write_chunked(io, ad.block_number.get(), partition_start, &content[offset..end], block_size)?;
                        offset = end;
                    }
                }
            }
            log::debug!("wrote {} file entries to partition space", self.files.len());
        }

        io.sync()?;
        Ok(())
    }

    fn write_vds_copy<T: BlockDevice>(&self, io: &mut DirectBlockIo<T>, vds_start: u32) -> Result<(), UdfError> {
        let block_size = self.block_size.get();
        let seq_num = self.pvd.vol_desc_seq_num.get();
        let vol_ident = DString::from_field(&self.pvd.vol_ident);

        let pvd = PrimaryVolumeDescriptor::new(vds_start, seq_num, &vol_ident, self.pvd.recording_date_time, self.udf_revision.as_u16());
        write_chunked(io, vds_start, ABSOLUTE, bytemuck::bytes_of(&pvd), block_size)?;

        let lvd = self.lvd(vds_start + 1);
        write_chunked(io, vds_start + 1, ABSOLUTE, &lvd.to_bytes(), block_size)?;

        let pd = PartitionDescriptor::new(
            vds_start + 2,
            self.pd.vol_desc_seq_num.get(),
            self.pd.partition_number.get(),
            self.pd.partition_starting_location.get(),
            self.pd.partition_length.get(),
            access_type_from_u32(self.pd.access_type.get()),
            self.udf_revision.as_u16(),
        );
        write_chunked(io, vds_start + 2, ABSOLUTE, bytemuck::bytes_of(&pd), block_size)?;

        let usd = self.usd(vds_start + 3);
        write_chunked(io, vds_start + 3, ABSOLUTE, &usd.to_bytes(), block_size)?;

        let iuvd = self.iuvd(vds_start + 4);
        write_chunked(io, vds_start + 4, ABSOLUTE, bytemuck::bytes_of(&iuvd), block_size)?;

        let terminator = self.terminator(vds_start + 5);
        write_chunked(io, vds_start + 5, ABSOLUTE, bytemuck::bytes_of(&terminator), block_size)?;

        log::trace!("wrote VDS copy at block {vds_start}");
        Ok(())
    }

    /// Reconstructs a `Volume` by reading a previously-written image back
    /// off `io`, following the anchor → VDS → LVID → FSD chain the same way
    /// a real driver mounts one, rather than fabricating fresh descriptors.
    /// `media_type` and `block_size` are caller-supplied since neither is
    /// recoverable from the image alone (the UDF revision is, from the
    /// PVD's application identifier suffix).
    pub fn read_from<T: BlockDevice>(io: &mut DirectBlockIo<T>, media_type: MediaType, block_size: BlockSize, total_blocks: u32) -> Result<Self, UdfError> {
        let bs = block_size.get();

        let (_, anchor_block) = io.read_tagged(FIRST_ANCHOR_BLOCK, ABSOLUTE)?;
        let avdp: AnchorVolumeDescriptorPointer = *bytemuck::from_bytes(&anchor_block[..core::mem::size_of::<AnchorVolumeDescriptorPointer>()]);
        let main_vds = avdp.main_vds;
        let reserve_vds = avdp.reserve_vds;

        let (_, pvd_block) = io.read_tagged(main_vds.location.get(), ABSOLUTE)?;
        let pvd: PrimaryVolumeDescriptor = *bytemuck::from_bytes(&pvd_block[..core::mem::size_of::<PrimaryVolumeDescriptor>()]);
        let udf_revision = UdfRevision::from_u16(u16::from_le_bytes([
            pvd.application_ident.identifier_suffix[0],
            pvd.application_ident.identifier_suffix[1],
        ]))
        .unwrap_or(UdfRevision::V201);

        let (_, pd_block) = io.read_tagged(main_vds.location.get() + 2, ABSOLUTE)?;
        let pd: PartitionDescriptor = *bytemuck::from_bytes(&pd_block[..core::mem::size_of::<PartitionDescriptor>()]);
        let partition_start = pd.partition_starting_location.get();
        let partition_length = pd.partition_length.get();

        let (_, lvd_block) = io.read_tagged(main_vds.location.get() + 1, ABSOLUTE)?;
        let lvd_header_size = core::mem::size_of::<LogicalVolumeDescriptorHeader>();
        let lvd_header: LogicalVolumeDescriptorHeader = *bytemuck::from_bytes(&lvd_block[..lvd_header_size]);
        let map_table = &lvd_block[lvd_header_size..lvd_header_size + lvd_header.map_table_length.get() as usize];
        let mut partition_maps = Vec::with_capacity(lvd_header.num_partition_maps.get() as usize);
        let mut map_off = 0;
        for _ in 0..lvd_header.num_partition_maps.get() {
            let (map, len) = PartitionMap::from_bytes(&map_table[map_off..])?;
            partition_maps.push(map);
            map_off += len;
        }
        let integrity_extent = lvd_header.integrity_seq_extent();

        let (_, lvid_block) = io.read_tagged(integrity_extent.location.get(), ABSOLUTE)?;
        let lvid_header_size = core::mem::size_of::<LogicalVolumeIntegrityDescriptorHeader>();
        let lvid_header: LogicalVolumeIntegrityDescriptorHeader = *bytemuck::from_bytes(&lvid_block[..lvid_header_size]);
        let num_partitions = lvid_header.num_partitions.get() as usize;
        let mut partitions = alloc::vec![PartitionIntegrity::default(); num_partitions];
        for (i, p) in partitions.iter_mut().enumerate() {
            p.free_space_table = u32::from_le_bytes(lvid_block[lvid_header_size + i * 4..lvid_header_size + i * 4 + 4].try_into().unwrap());
        }
        for (i, p) in partitions.iter_mut().enumerate() {
            let off = lvid_header_size + num_partitions * 4 + i * 4;
            p.size_table = u32::from_le_bytes(lvid_block[off..off + 4].try_into().unwrap());
        }
        let impl_use = &lvid_block[lvid_header_size + num_partitions * 8..];
        let lvid = LogicalVolumeIntegrity {
            integrity_type: if lvid_header.integrity_type.get() == 1 { IntegrityType::Closed } else { IntegrityType::Open },
            recording_date_time: lvid_header.recording_date_time,
            unique_id: u64::from_le_bytes(lvid_header.logical_volume_contents_use[..8].try_into().unwrap()),
            partitions,
            file_count: u32::from_le_bytes(impl_use[32..36].try_into().unwrap()),
            dir_count: u32::from_le_bytes(impl_use[36..40].try_into().unwrap()),
            min_udf_read_revision: u16::from_le_bytes(impl_use[40..42].try_into().unwrap()),
            min_udf_write_revision: u16::from_le_bytes(impl_use[42..44].try_into().unwrap()),
            max_udf_write_revision: u16::from_le_bytes(impl_use[44..46].try_into().unwrap()),
        };

        let mut extents = ExtentList::new(total_blocks);
        let reserved_blocks = (VRS_BYTE_OFFSET / bs as u64) as u32;
        extents.set_extent(0, reserved_blocks, SpaceType::Reserved)?;
        extents.set_extent(reserved_blocks, 1, SpaceType::Vrs)?;
        extents.set_extent(FIRST_ANCHOR_BLOCK, 1, SpaceType::Anchor)?;
        if total_blocks > 0 && io.read_tagged(total_blocks - 1, ABSOLUTE).is_ok() {
            extents.set_extent(total_blocks - 1, 1, SpaceType::Anchor)?;
        }
        extents.set_extent(main_vds.location.get(), main_vds.length.get() / bs, SpaceType::Pvds)?;
        extents.set_extent(reserve_vds.location.get(), reserve_vds.length.get() / bs, SpaceType::Rvds)?;
        extents.set_extent(integrity_extent.location.get(), integrity_extent.length.get() / bs, SpaceType::Lvid)?;
        extents.set_extent(partition_start, partition_length, SpaceType::Pspace)?;

        // The exact occupancy bitmap isn't re-derived from the file entries
        // on disc, only the aggregate free count the LVID reports; good
        // enough for the checker's space-map invariant, not for resuming
        // allocation against a byte-accurate map.
        let free_blocks = lvid.partitions.first().map(|p| p.free_space_table).unwrap_or(partition_length);
        let mut space = SpaceManager::new_bitmap(partition_length, media_type.alignment());
        space.reserve(0, partition_length.saturating_sub(free_blocks));

        let (_, fsd_block) = io.read_tagged(0, partition_start)?;
        let fsd: FileSetDescriptor = *bytemuck::from_bytes(&fsd_block[..core::mem::size_of::<FileSetDescriptor>()]);
        let root_icb = fsd.root_dir_icb;

        let mut files = BTreeMap::new();
        let mut content_blocks = BTreeMap::new();
        let mut directories = DirectoryArena::new();

        let root_block = root_icb.block_number.get();
        let (root_fe, root_content) = read_entry(io, partition_start, bs, root_block)?;
        let mut root_dir = Directory::new_root(root_icb);
        root_dir.fids = parse_fids(&root_content)?;
        root_dir.dirty = false;
        if matches!(root_fe.alloc, AllocStrategy::Short(_)) {
            content_blocks.insert(root_block, root_content);
        }
        files.insert(root_block, root_fe);
        let root_id = directories.insert_root(root_dir);

        let mut stack = vec![root_id];
        while let Some(id) = stack.pop() {
            let fids = directories.get(id).fids.clone();
            for fid in fids {
                if fid.characteristics.contains(FidCharacteristics::PARENT) || fid.characteristics.contains(FidCharacteristics::DELETED) {
                    continue;
                }
                let block = fid.icb.block_number.get();
                let (fe, content) = read_entry(io, partition_start, bs, block)?;
                let is_external = matches!(fe.alloc, AllocStrategy::Short(_));
                if fid.characteristics.contains(FidCharacteristics::DIRECTORY) {
                    let mut dir = Directory::new_root(fid.icb);
                    dir.name = fid.name.clone();
                    dir.fids = parse_fids(&content)?;
                    dir.dirty = false;
                    if is_external {
                        content_blocks.insert(block, content);
                    }
                    files.insert(block, fe);
                    let child_id = directories.insert_child(id, dir);
                    stack.push(child_id);
                } else {
                    if is_external {
                        content_blocks.insert(block, content);
                    }
                    files.insert(block, fe);
                }
            }
        }

        log::info!("read volume image: {total_blocks} blocks, partition space {partition_start}..{}", partition_start + partition_length);
        Ok(Self {
            media_type,
            block_size,
            total_blocks,
            udf_revision,
            extents,
            pvd,
            pd,
            partition_maps,
            fsd,
            lvid,
            space,
            directories,
            root_id,
            files,
            content_blocks,
        })
    }
}

fn read_entry<T: BlockDevice>(io: &mut DirectBlockIo<T>, partition_start: u32, block_size: u32, block: u32) -> Result<(FileEntry, Vec<u8>), UdfError> {
    let (_, bytes) = io.read_tagged(block, partition_start)?;
    let fe = FileEntry::from_bytes(&bytes, block)?;
    let content = read_entry_content(io, partition_start, block_size, &fe)?;
    Ok((fe, content))
}

fn read_entry_content<T: BlockDevice>(io: &mut DirectBlockIo<T>, partition_start: u32, block_size: u32, fe: &FileEntry) -> Result<Vec<u8>, UdfError> {
    match &fe.alloc {
        AllocStrategy::Embedded(data) => Ok(data.clone()),
        AllocStrategy::Short(ads) => {
            let mut out = Vec::with_capacity(fe.information_length as usize);
            for ad in ads {
                let blocks = ad.length().div_ceil(block_size).max(1);
                for i in 0..blocks {
                    out.extend_from_slice(&io.read_block(ad.block_number.get() + i, partition_start)?);
                }
            }
            out.truncate(fe.information_length as usize);
            Ok(out)
        }
        AllocStrategy::Long(_) => Ok(Vec::new()),
    }
}

fn parse_fids(buf: &[u8]) -> Result<Vec<Fid>, UdfError> {
    let mut fids = Vec::new();
    let mut off = 0;
    while off < buf.len() {
        let (fid, len) = Fid::from_bytes(&buf[off..])?;
        fids.push(fid);
        off += len;
    }
    Ok(fids)
}

fn vat_format_for(revision: UdfRevision) -> VatFormat {
    if revision >= UdfRevision::V200 { VatFormat::V200 } else { VatFormat::V150 }
}

fn access_type_from_u32(v: u32) -> AccessType {
    match v {
        1 => AccessType::Overwritable,
        2 => AccessType::Rewritable,
        3 => AccessType::WriteOnce,
        4 => AccessType::ReadOnly,
        5 => AccessType::Pseudo,
        _ => AccessType::NotSpecified,
    }
}

/// Splits `data` into `block_size`-sized, zero-padded chunks and writes
/// them starting at `start_lbn`. Every on-disc descriptor and every run of
/// file content goes through here so partial, short writes never happen.
fn write_chunked<T: BlockDevice>(io: &mut DirectBlockIo<T>, start_lbn: u32, partition_start: u32, data: &[u8], block_size: u32) -> Result<(), UdfError> {
    let bs = block_size as usize;
    let num_blocks = data.len().div_ceil(bs).max(1);
    for i in 0..num_blocks {
        let mut buf = vec![0u8; bs];
        let begin = i * bs;
        let end = (begin + bs).min(data.len());
        buf[..end - begin].copy_from_slice(&data[begin..end]);
        io.write_block(start_lbn + i as u32, partition_start, &buf)?;
    }
    Ok(())
}

fn build_fsd(root_icb: LongAd, udf_revision: u16, now: Timestamp) -> FileSetDescriptor {
    use crate::types::tag_id;
    let mut fsd = FileSetDescriptor {
        tag: crate::types::DescriptorTag::new(tag_id::FSD, 3, 0, 0),
        recording_date_time: now,
        interchange_level: crate::types::U16Le::new(3),
        max_interchange_level: crate::types::U16Le::new(3),
        char_set_list: crate::types::U32Le::new(1),
        max_char_set_list: crate::types::U32Le::new(1),
        file_set_number: crate::types::U32Le::new(0),
        file_set_desc_number: crate::types::U32Le::new(0),
        log_vol_ident_char_set: [0; 64],
        log_vol_ident: [0; 128],
        file_set_char_set: [0; 64],
        file_set_ident: [0; 32],
        copyright_file_ident: [0; 32],
        abstract_file_ident: [0; 32],
        root_dir_icb: root_icb,
        domain_ident: crate::types::Regid::domain_identifier(udf_revision),
        next_ext: LongAd::new(0, crate::types::AllocType::RecordedAllocated, 0, 0),
        stream_dir_icb: LongAd::new(0, crate::types::AllocType::RecordedAllocated, 0, 0),
        reserved: [0; 32],
    };
    let payload_len = core::mem::size_of::<FileSetDescriptor>() - 16;
    let bytes = bytemuck::bytes_of(&fsd)[16..16 + payload_len].to_vec();
    fsd.tag.stamp(&bytes);
    fsd
}

#[cfg(feature = "std")]
pub(crate) fn now_or_zero() -> Timestamp {
    Timestamp::now()
}

#[cfg(not(feature = "std"))]
pub(crate) fn now_or_zero() -> Timestamp {
    Timestamp::zero()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_list_starts_fully_uspace() {
        let list = ExtentList::new(1000);
        assert_eq!(list.entries().len(), 1);
        assert_eq!(list.entries()[0].space_type, SpaceType::Uspace);
    }

    #[test]
    fn set_extent_splits_uspace() {
        let mut list = ExtentList::new(1000);
        list.set_extent(100, 50, SpaceType::Anchor).unwrap();
        assert_eq!(list.entries().len(), 3);
        assert_eq!(list.entries()[1].space_type, SpaceType::Anchor);
        assert_eq!(list.entries()[1].start, 100);
    }

    #[test]
    fn next_extent_size_respects_alignment() {
        let mut list = ExtentList::new(1000);
        list.set_extent(0, 10, SpaceType::Reserved).unwrap();
        let start = list.next_extent_size(0, 16, 32).unwrap();
        assert_eq!(start % 32, 0);
        assert!(start >= 10);
    }

    #[test]
    fn format_hd_image_lays_out_structures() {
        let options = FormatOptions::new(MediaType::Hd, 100_000)
            .with_block_size(BlockSize::new(512).unwrap())
            .with_label("LinuxUDF");
        let volume = Volume::format(options).unwrap();
        assert!(volume.extents.entries().iter().any(|e| e.space_type == SpaceType::Pspace));
        assert_eq!(volume.root().fids.len(), 1);
        assert_eq!(volume.lvid.dir_count, 1);
    }

    #[test]
    fn closed_volume_reserves_tail_anchor() {
        let options = FormatOptions::new(MediaType::Hd, 100_000)
            .with_block_size(BlockSize::new(512).unwrap())
            .with_closed(true);
        let volume = Volume::format(options).unwrap();
        let anchors: Vec<_> = volume.extents.entries().iter().filter(|e| e.space_type == SpaceType::Anchor).collect();
        assert_eq!(anchors.len(), 2);
    }
}
