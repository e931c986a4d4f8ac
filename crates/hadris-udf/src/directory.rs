//! Directory engine: directories as a flattened sequence of File
//! Identifier Descriptors, plus the arena-indexed in-memory tree.
//!
//! Grounded on `wrudf`'s directory-walk code and spec's own design note
//! for cyclic parent/child references: an arena owning `Vec<Directory>`
//! with `Option<DirectoryId>` indices instead of `Rc<RefCell<_>>` cycles.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::UdfError;
use crate::types::{tag_id, DescriptorTag, LongAd};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FidCharacteristics: u8 {
        const HIDDEN = 1 << 0;
        const DIRECTORY = 1 << 1;
        const DELETED = 1 << 2;
        const PARENT = 1 << 3;
        const METADATA = 1 << 4;
    }
}

/// File Identifier Descriptor: one directory entry.
#[derive(Debug, Clone)]
pub struct Fid {
    pub file_version: u16,
    pub characteristics: FidCharacteristics,
    pub icb: LongAd,
    pub name: String,
    /// Stamped tag (identifier `tag_id::FID`, CRC + checksum over the
    /// encoded body, location the absolute block the FID last serialized
    /// into). Zeroed until the owning directory is persisted.
    pub tag: DescriptorTag,
}

impl Fid {
    pub fn parent(icb: LongAd) -> Self {
        Self {
            file_version: 1,
            characteristics: FidCharacteristics::PARENT,
            icb,
            name: String::new(),
            tag: DescriptorTag::new(tag_id::FID, 3, 0, 0),
        }
    }

    pub fn new(name: &str, icb: LongAd, is_dir: bool) -> Self {
        let mut characteristics = FidCharacteristics::empty();
        if is_dir {
            characteristics |= FidCharacteristics::DIRECTORY;
        }
        Self {
            file_version: 1,
            characteristics,
            icb,
            name: String::from(name),
            tag: DescriptorTag::new(tag_id::FID, 3, 0, 0),
        }
    }

    /// `(base + lengthOfImpUse + lengthFileIdent + 3) & ~3`; impl-use here
    /// is a fixed 0-length area (no vendor extension recorded).
    pub fn padded_len(&self) -> usize {
        const BASE: usize = 38; // tag(16) + version(2) + chars(1) + ident_len(1) + icb(16) + impl_use_len(2)
        let name_len = self.name.len();
        (BASE + name_len + 3) & !3
    }

    /// The absolute block this FID is currently recorded at, per its last
    /// stamped tag. `0` until `stamp` has been called once.
    pub fn tag_location(&self) -> u32 {
        self.tag.location()
    }

    /// Encodes this FID to its on-disc bytes and stamps `tag` with `block`
    /// as the recorded location, matching ECMA-167 4/14.4.
    pub fn stamp(&mut self, block: u32) -> Vec<u8> {
        let padded = self.padded_len();
        let mut body = vec![0u8; padded - 16];
        body[0..2].copy_from_slice(&self.file_version.to_le_bytes());
        body[2] = self.characteristics.bits();
        body[3] = self.name.len() as u8;
        body[4..20].copy_from_slice(bytemuck::bytes_of(&self.icb));
        body[20..22].copy_from_slice(&0u16.to_le_bytes());
        body[22..22 + self.name.len()].copy_from_slice(self.name.as_bytes());

        let mut tag = DescriptorTag::new(tag_id::FID, 3, 0, block);
        tag.stamp(&body);
        self.tag = tag;

        let mut out = Vec::with_capacity(padded);
        out.extend_from_slice(bytemuck::bytes_of(&tag));
        out.extend_from_slice(&body);
        out
    }

    /// Decodes one FID off the front of `buf`, verifying its tag, and
    /// returns it alongside its padded on-disc length (the reverse of
    /// `stamp`). Assumes a zero-length impl-use area, as `stamp` always
    /// writes.
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, usize), UdfError> {
        if buf.len() < 38 {
            return Err(UdfError::TagInvalid { location: 0, reason: "FID shorter than its fixed header" });
        }
        let tag: DescriptorTag = *bytemuck::from_bytes(&buf[..16]);
        let file_version = u16::from_le_bytes(buf[16..18].try_into().unwrap());
        let characteristics = FidCharacteristics::from_bits_truncate(buf[18]);
        let name_len = buf[19] as usize;
        let icb: LongAd = *bytemuck::from_bytes(&buf[20..36]);
        let padded = (38 + name_len + 3) & !3;
        if buf.len() < padded {
            return Err(UdfError::TagInvalid { location: tag.location(), reason: "FID name runs past its buffer" });
        }
        let name = String::from(core::str::from_utf8(&buf[38..38 + name_len]).unwrap_or(""));
        tag.verify(&buf[16..padded], tag.location())?;
        Ok((Self { file_version, characteristics, icb, name, tag }, padded))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryId(pub usize);

/// In-memory directory: its flattened FID stream regardless of whether it
/// is currently stored embedded in the FE or in external extents.
#[derive(Debug, Clone)]
pub struct Directory {
    pub parent: Option<DirectoryId>,
    pub children: Vec<DirectoryId>,
    pub name: String,
    pub icb: LongAd,
    pub fids: Vec<Fid>,
    pub dirty: bool,
}

impl Directory {
    pub fn new_root(icb: LongAd) -> Self {
        let mut dir = Self { parent: None, children: Vec::new(), name: String::new(), icb, fids: Vec::new(), dirty: true };
        dir.fids.push(Fid::parent(icb));
        dir
    }

    pub fn data_size(&self) -> usize {
        self.fids.iter().map(Fid::padded_len).sum()
    }

    /// Linear scan skipping parent entries, matching by name bytes/length
    /// only (no collation).
    pub fn find(&self, name: &str) -> Option<&Fid> {
        self.fids
            .iter()
            .find(|f| !f.characteristics.contains(FidCharacteristics::PARENT) && f.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Fid> {
        self.fids
            .iter_mut()
            .find(|f| !f.characteristics.contains(FidCharacteristics::PARENT) && f.name == name)
    }

    pub fn insert(&mut self, fid: Fid) {
        self.fids.push(fid);
        self.dirty = true;
    }

    /// Serializes every FID in order, stamping each with the absolute
    /// block its bytes start in (`content_start_block` plus however many
    /// whole blocks precede it), and returns the concatenated content.
    /// Matches testable property 6: a FID's tag location tracks wherever
    /// the directory's content actually lives.
    pub fn stamp_content(&mut self, block_size: u32, content_start_block: u32) -> Vec<u8> {
        let mut out = Vec::new();
        for fid in &mut self.fids {
            let block = content_start_block + (out.len() as u32) / block_size;
            out.extend(fid.stamp(block));
        }
        self.dirty = false;
        out
    }

    /// Physical removal: drops the FID entirely, shrinking the directory's
    /// recorded content. Used only once a deleted FID's target FE has hit
    /// a zero link count and been fully reclaimed.
    pub fn remove(&mut self, name: &str) -> Result<(), UdfError> {
        let idx = self
            .fids
            .iter()
            .position(|f| !f.characteristics.contains(FidCharacteristics::PARENT) && f.name == name)
            .ok_or_else(|| UdfError::NotFound(String::from(name)))?;
        self.fids.remove(idx);
        self.dirty = true;
        Ok(())
    }

    /// User-visible deletion: marks the FID deleted without removing it.
    /// The caller is responsible for decrementing the target FE's link
    /// count and reclaiming its blocks once that count hits zero.
    pub fn mark_deleted(&mut self, name: &str) -> Result<(), UdfError> {
        let fid = self.find_mut(name).ok_or_else(|| UdfError::NotFound(String::from(name)))?;
        fid.characteristics |= FidCharacteristics::DELETED;
        self.dirty = true;
        Ok(())
    }

    pub fn is_empty_except_parent(&self) -> bool {
        self.fids
            .iter()
            .all(|f| f.characteristics.intersects(FidCharacteristics::PARENT | FidCharacteristics::DELETED))
    }
}

/// Arena owning the directory tree; directories reference each other only
/// through `DirectoryId` indices, so the tree has no ownership cycles.
#[derive(Debug, Default)]
pub struct DirectoryArena {
    directories: Vec<Directory>,
}

impl DirectoryArena {
    pub fn new() -> Self {
        Self { directories: Vec::new() }
    }

    pub fn insert_root(&mut self, root: Directory) -> DirectoryId {
        self.directories.push(root);
        DirectoryId(self.directories.len() - 1)
    }

    pub fn insert_child(&mut self, parent: DirectoryId, mut dir: Directory) -> DirectoryId {
        dir.parent = Some(parent);
        self.directories.push(dir);
        let id = DirectoryId(self.directories.len() - 1);
        self.directories[parent.0].children.push(id);
        id
    }

    pub fn get(&self, id: DirectoryId) -> &Directory {
        &self.directories[id.0]
    }

    pub fn get_mut(&mut self, id: DirectoryId) -> &mut Directory {
        &mut self.directories[id.0]
    }

    pub fn len(&self) -> usize {
        self.directories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty()
    }

    pub fn child_named(&self, parent: DirectoryId, name: &str) -> Option<DirectoryId> {
        self.directories[parent.0]
            .children
            .iter()
            .copied()
            .find(|&c| self.directories[c.0].name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AllocType;

    fn icb(block: u32) -> LongAd {
        LongAd::new(2048, AllocType::RecordedAllocated, block, 0)
    }

    #[test]
    fn new_root_contains_single_parent_fid() {
        let root = Directory::new_root(icb(0));
        assert_eq!(root.fids.len(), 1);
        assert!(root.fids[0].characteristics.contains(FidCharacteristics::PARENT));
        assert!(root.find("anything").is_none());
    }

    #[test]
    fn insert_and_find_skip_parent_entries() {
        let mut root = Directory::new_root(icb(0));
        root.insert(Fid::new("f000", icb(10), false));
        assert!(root.find("f000").is_some());
        assert!(root.find("nope").is_none());
    }

    #[test]
    fn padded_len_is_multiple_of_four() {
        let fid = Fid::new("abcde", icb(1), false);
        assert_eq!(fid.padded_len() % 4, 0);
        assert!(fid.padded_len() >= 38 + 5);
    }

    #[test]
    fn mark_deleted_keeps_entry_but_flags_it() {
        let mut root = Directory::new_root(icb(0));
        root.insert(Fid::new("f100", icb(20), false));
        root.mark_deleted("f100").unwrap();
        let fid = root.fids.iter().find(|f| f.name == "f100").unwrap();
        assert!(fid.characteristics.contains(FidCharacteristics::DELETED));
        assert_eq!(root.fids.len(), 2);
    }

    #[test]
    fn directory_empty_except_parent_and_deleted() {
        let mut root = Directory::new_root(icb(0));
        assert!(root.is_empty_except_parent());
        root.insert(Fid::new("f0", icb(1), false));
        assert!(!root.is_empty_except_parent());
        root.mark_deleted("f0").unwrap();
        assert!(root.is_empty_except_parent());
    }

    #[test]
    fn arena_tracks_parent_child() {
        let mut arena = DirectoryArena::new();
        let root_id = arena.insert_root(Directory::new_root(icb(0)));
        let mut sub = Directory::new_root(icb(5));
        sub.name = String::from("sub");
        let sub_id = arena.insert_child(root_id, sub);
        assert_eq!(arena.get(sub_id).parent, Some(root_id));
        assert_eq!(arena.child_named(root_id, "sub"), Some(sub_id));
    }
}
