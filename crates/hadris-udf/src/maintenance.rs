//! Maintenance engine: interactive file/directory operations translated
//! into directory + file-entry + space-manager calls.
//!
//! Grounded on `wrudf`'s command dispatch (`cp`, `rm`, `mkdir`, `rmdir`,
//! `ls`, change-directory) and its path-resolution walk.

use alloc::string::String;
use alloc::vec::Vec;

use crate::directory::{Directory, DirectoryId, Fid};
use crate::error::UdfError;
use crate::file_entry::{AllocStrategy, FileEntry, file_type};
use crate::types::{AllocType, LongAd, ShortAd};
use crate::volume::Volume;
use hadris_common::types::endian::Endian;

/// The state a path resolution can land on for its last component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    DirInvalid,
    DoesNotExist,
    ExistingFile,
    ExistingDir,
    DeletedFile,
    DeletedDir,
}

/// Drives maintenance commands against a [`Volume`], tracking a current
/// working directory the way the interactive REPL does.
pub struct MaintenanceEngine {
    cur_dir: DirectoryId,
}

impl MaintenanceEngine {
    pub fn new(root: DirectoryId) -> Self {
        Self { cur_dir: root }
    }

    pub fn cur_dir(&self) -> DirectoryId {
        self.cur_dir
    }

    /// Splits `path` on `/` and walks components left to right, following
    /// only directory FIDs whose DELETED bit is clear.
    fn resolve_dir(&self, volume: &Volume, path: &str) -> Result<DirectoryId, UdfError> {
        let mut dir = if path.starts_with('/') { volume.root_id } else { self.cur_dir };
        for component in path.trim_start_matches('/').split('/') {
            if component.is_empty() || component == "." {
                continue;
            }
            dir = volume
                .directories
                .child_named(dir, component)
                .ok_or_else(|| UdfError::NotFound(String::from(component)))?;
        }
        Ok(dir)
    }

    /// Resolves `path` to `(parent_dir, last_component, state)` without
    /// requiring the last component to already exist.
    pub fn resolve(&self, volume: &Volume, path: &str) -> Result<(DirectoryId, String, EntryState), UdfError> {
        let (parent_path, name) = match path.rfind('/') {
            Some(idx) => (&path[..idx.max(1)], &path[idx + 1..]),
            None => ("", path),
        };
        let parent = if parent_path.is_empty() { self.cur_dir } else { self.resolve_dir(volume, parent_path)? };
        let parent_dir = volume.directories.get(parent);
        let state = match parent_dir.find(name) {
            None => EntryState::DoesNotExist,
            Some(fid) => {
                use crate::directory::FidCharacteristics as C;
                match (fid.characteristics.contains(C::DIRECTORY), fid.characteristics.contains(C::DELETED)) {
                    (true, false) => EntryState::ExistingDir,
                    (false, false) => EntryState::ExistingFile,
                    (true, true) => EntryState::DeletedDir,
                    (false, true) => EntryState::DeletedFile,
                }
            }
        };
        Ok((parent, String::from(name), state))
    }

    pub fn change_dir(&mut self, volume: &Volume, path: &str) -> Result<(), UdfError> {
        self.cur_dir = self.resolve_dir(volume, path)?;
        Ok(())
    }

    pub fn ls(&self, volume: &Volume, path: Option<&str>) -> Result<Vec<String>, UdfError> {
        let dir_id = match path {
            Some(p) => self.resolve_dir(volume, p)?,
            None => self.cur_dir,
        };
        let dir = volume.directories.get(dir_id);
        Ok(dir.fids.iter().filter(|f| !f.name.is_empty()).map(|f| f.name.clone()).collect())
    }

    pub fn mkdir(&mut self, volume: &mut Volume, path: &str) -> Result<(), UdfError> {
        let (parent, name, state) = self.resolve(volume, path)?;
        if matches!(state, EntryState::ExistingDir | EntryState::ExistingFile) {
            return Err(UdfError::AlreadyExists(name));
        }
        let block = volume.space.alloc_blocks(0, 1)?;
        let unique_id = volume.lvid.next_unique_id();
        let icb = LongAd::new(volume.block_size.get(), AllocType::RecordedAllocated, block, 0).with_unique_id(unique_id);
        let fid = Fid::new(&name, icb, true);
        volume.directories.get_mut(parent).insert(fid);

        let mut new_dir = Directory::new_root(icb);
        new_dir.name = name;
        let new_dir_id = volume.directories.insert_child(parent, new_dir);

        let mut fe = FileEntry::new_embedded(file_type::DIRECTORY, crate::volume::now_or_zero(), unique_id as u64);
        fe.link_count = 1;
        volume.files.insert(block, fe);

        volume.lvid.dir_count += 1;
        volume.sync_directory_content(new_dir_id)?;
        volume.sync_directory_content(parent)?;
        volume.sync_lvid_free_space();
        log::debug!("mkdir {path:?} at block {block}");
        Ok(())
    }

    pub fn rmdir(&mut self, volume: &mut Volume, path: &str) -> Result<(), UdfError> {
        let (parent, name, state) = self.resolve(volume, path)?;
        if state != EntryState::ExistingDir {
            return Err(UdfError::NotFound(name));
        }
        let child = volume
            .directories
            .child_named(parent, &name)
            .ok_or_else(|| UdfError::NotFound(name.clone()))?;
        if !volume.directories.get(child).is_empty_except_parent() {
            return Err(UdfError::NotEmpty);
        }
        let fe_block = volume
            .directories
            .get(parent)
            .find(&name)
            .ok_or_else(|| UdfError::NotFound(name.clone()))?
            .icb
            .block_number
            .get();
        volume.directories.get_mut(parent).mark_deleted(&name)?;
        volume.lvid.dir_count -= 1;
        free_entry(volume, fe_block)?;
        volume.sync_directory_content(parent)?;
        log::debug!("rmdir {path:?}");
        Ok(())
    }

    pub fn rm(&mut self, volume: &mut Volume, path: &str) -> Result<(), UdfError> {
        let (parent, name, state) = self.resolve(volume, path)?;
        if state != EntryState::ExistingFile {
            return Err(UdfError::NotFound(name));
        }
        let fe_block = volume
            .directories
            .get(parent)
            .find(&name)
            .ok_or_else(|| UdfError::NotFound(name.clone()))?
            .icb
            .block_number
            .get();
        volume.directories.get_mut(parent).mark_deleted(&name)?;
        volume.lvid.file_count -= 1;
        free_entry(volume, fe_block)?;
        volume.sync_directory_content(parent)?;
        log::debug!("rm {path:?}");
        Ok(())
    }

    /// Creates a file entry for `data` at `path`, overwriting an existing
    /// non-deleted entry only if `force` is set.
    pub fn cp(&mut self, volume: &mut Volume, path: &str, data: &[u8], force: bool) -> Result<(), UdfError> {
        let (parent, name, state) = self.resolve(volume, path)?;
        if state == EntryState::ExistingFile && !force {
            return Err(UdfError::AlreadyExists(name));
        }
        let block = volume.space.alloc_blocks(0, 1)?;
        let unique_id = volume.lvid.next_unique_id();
        let icb = LongAd::new(volume.block_size.get(), AllocType::RecordedAllocated, block, 0).with_unique_id(unique_id);
        let fid = Fid::new(&name, icb, false);
        volume.directories.get_mut(parent).insert(fid);

        let mut fe = FileEntry::new_embedded(file_type::REGULAR, crate::volume::now_or_zero(), unique_id as u64);
        fe.link_count = 1;
        volume.files.insert(block, fe);
        volume.set_file_content(block, data)?;

        volume.lvid.file_count += 1;
        volume.sync_directory_content(parent)?;
        volume.sync_lvid_free_space();
        log::debug!("cp {path:?} ({} bytes)", data.len());
        Ok(())
    }
}

/// Drops the reference at `fe_block`: decrements its link count and, once
/// it hits zero, removes the File Entry, returns its data extents and its
/// own block to the space manager, and drops any retained external
/// content bytes.
fn free_entry(volume: &mut Volume, fe_block: u32) -> Result<(), UdfError> {
    let block_size = volume.block_size.get();
    let freed_extents: Vec<ShortAd> = {
        let fe = volume
            .files
            .get_mut(&fe_block)
            .ok_or_else(|| UdfError::NotFound(String::from("file entry")))?;
        if fe.link_count > 1 {
            fe.link_count -= 1;
            return Ok(());
        }
        match &fe.alloc {
            AllocStrategy::Short(ads) => ads.clone(),
            _ => Vec::new(),
        }
    };
    volume.files.remove(&fe_block);
    volume.content_blocks.remove(&fe_block);
    for ad in freed_extents {
        let blocks = ad.length().div_ceil(block_size).max(1);
        volume.space.free_blocks_range(ad.block_number.get(), blocks)?;
    }
    volume.space.free_blocks_range(fe_block, 1)?;
    volume.sync_lvid_free_space();
    log::trace!("freed file entry at block {fe_block}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaType;
    use crate::volume::FormatOptions;
    use crate::BlockSize;

    fn fresh_volume() -> Volume {
        let options = FormatOptions::new(MediaType::Hd, 10_000).with_block_size(BlockSize::new(512).unwrap());
        Volume::format(options).unwrap()
    }

    #[test]
    fn mkdir_then_ls_shows_entry() {
        let mut volume = fresh_volume();
        let mut engine = MaintenanceEngine::new(volume.root_id);
        engine.mkdir(&mut volume, "sub").unwrap();
        let names = engine.ls(&volume, None).unwrap();
        assert!(names.contains(&String::from("sub")));
    }

    #[test]
    fn mkdir_twice_fails_with_already_exists() {
        let mut volume = fresh_volume();
        let mut engine = MaintenanceEngine::new(volume.root_id);
        engine.mkdir(&mut volume, "sub").unwrap();
        assert!(matches!(engine.mkdir(&mut volume, "sub"), Err(UdfError::AlreadyExists(_))));
    }

    #[test]
    fn rmdir_requires_empty_directory() {
        let mut volume = fresh_volume();
        let mut engine = MaintenanceEngine::new(volume.root_id);
        engine.mkdir(&mut volume, "sub").unwrap();
        engine.change_dir(&volume, "sub").unwrap();
        engine.cp(&mut volume, "file.txt", b"hi", false).unwrap();
        engine.change_dir(&volume, "/").unwrap();
        assert!(matches!(engine.rmdir(&mut volume, "sub"), Err(UdfError::NotEmpty)));
    }

    #[test]
    fn cp_then_rm_marks_deleted_not_removed() {
        let mut volume = fresh_volume();
        let mut engine = MaintenanceEngine::new(volume.root_id);
        engine.cp(&mut volume, "f000", b"", false).unwrap();
        assert_eq!(volume.lvid.file_count, 1);
        engine.rm(&mut volume, "f000").unwrap();
        assert_eq!(volume.lvid.file_count, 0);
        let root = volume.directories.get(volume.root_id);
        assert!(root.fids.iter().any(|f| f.name == "f000"));
    }

    #[test]
    fn two_hundred_files_spill_and_lvid_counts_match() {
        let mut volume = fresh_volume();
        let mut engine = MaintenanceEngine::new(volume.root_id);
        for i in 0..200 {
            let name = alloc::format!("f{:03}", i);
            engine.cp(&mut volume, &name, b"", false).unwrap();
        }
        assert_eq!(volume.lvid.file_count, 200);
        assert_eq!(volume.lvid.dir_count, 1);
        assert_eq!(volume.root().fids.len(), 201); // 200 files + parent FID
    }

    #[test]
    fn two_hundred_files_flip_root_ad_kind_to_short() {
        let mut volume = fresh_volume();
        let mut engine = MaintenanceEngine::new(volume.root_id);
        for i in 0..200 {
            let name = alloc::format!("f{:03}", i);
            engine.cp(&mut volume, &name, b"", false).unwrap();
        }
        let root_fe = volume.files.get(&1u32).unwrap();
        assert_eq!(root_fe.icb_tag.ad_kind(), crate::file_entry::AdKind::Short);
    }

    #[test]
    fn rm_returns_file_entry_block_to_bitmap() {
        let mut volume = fresh_volume();
        let mut engine = MaintenanceEngine::new(volume.root_id);
        let free_before = volume.space.free_blocks();
        engine.cp(&mut volume, "f000", b"hello world", false).unwrap();
        let fe_block = volume.root().find("f000").unwrap().icb.block_number.get();
        assert!(volume.files.contains_key(&fe_block));
        assert!(volume.space.free_blocks() < free_before);

        engine.rm(&mut volume, "f000").unwrap();
        assert_eq!(volume.space.free_blocks(), free_before);
        assert!(!volume.files.contains_key(&fe_block));
    }

    #[test]
    fn rmdir_frees_the_directorys_own_entry() {
        let mut volume = fresh_volume();
        let mut engine = MaintenanceEngine::new(volume.root_id);
        let free_before = volume.space.free_blocks();
        engine.mkdir(&mut volume, "sub").unwrap();
        let fe_block = volume.root().find("sub").unwrap().icb.block_number.get();
        assert!(volume.files.contains_key(&fe_block));

        engine.rmdir(&mut volume, "sub").unwrap();
        assert_eq!(volume.space.free_blocks(), free_before);
        assert!(!volume.files.contains_key(&fe_block));
    }
}
