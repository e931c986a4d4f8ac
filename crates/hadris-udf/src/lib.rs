//! Hadris UDF
//!
//! A userspace implementation of UDF (Universal Disk Format, ECMA-167 /
//! OSTA-UDF) volumes: the format used on DVDs, CD-RW packet media, Blu-ray
//! discs and large removable media. This crate builds, maintains and
//! verifies UDF volumes; it does not mount them as a live kernel filesystem.
//!
//! Terminology follows ECMA-167 3rd edition and the OSTA-UDF specification.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod block_io;
pub mod checker;
pub mod descriptors;
pub mod directory;
mod error;
pub mod file_entry;
pub mod maintenance;
pub mod media;
pub mod sparing;
pub mod space;
pub mod types;
pub mod vat;
pub mod volume;

pub use block_io::{BlockDevice, DirectBlockIo};
pub use checker::{CheckReport, Checker, Invariant, Severity};
pub use descriptors::*;
pub use directory::{Directory, DirectoryArena, DirectoryId, Fid, FidCharacteristics};
pub use error::UdfError;
pub use file_entry::{AllocStrategy, ExtendedFileEntry, FileEntry, IcbTag};
pub use maintenance::{EntryState, MaintenanceEngine};
pub use media::{MediaType, WriteStrategy};
pub use space::SpaceManager;
pub use types::*;
pub use vat::VatEngine;
pub use volume::{FormatOptions, Volume, FIRST_ANCHOR_BLOCK};

/// The revisions of the OSTA-UDF profile this crate understands.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UdfRevision {
    V102 = 0x0102,
    V150 = 0x0150,
    V200 = 0x0200,
    V201 = 0x0201,
    V250 = 0x0250,
}

impl UdfRevision {
    pub fn from_u16(value: u16) -> Result<Self, UdfError> {
        match value {
            0x0102 => Ok(Self::V102),
            0x0150 => Ok(Self::V150),
            0x0200 => Ok(Self::V200),
            0x0201 => Ok(Self::V201),
            0x0250 => Ok(Self::V250),
            other => Err(UdfError::UnsupportedRevision(other)),
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether this revision uses an Extended File Entry by default.
    pub fn prefers_efe(self) -> bool {
        self >= Self::V200
    }
}

/// The block size of a volume. Always a power of two in `[512, 4096]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSize(u32);

impl BlockSize {
    pub const MIN: u32 = 512;
    pub const MAX: u32 = 4096;

    pub fn new(size: u32) -> Result<Self, UdfError> {
        if !(Self::MIN..=Self::MAX).contains(&size) || !size.is_power_of_two() {
            return Err(UdfError::BadArgument("block size must be a power of two in [512, 4096]"));
        }
        Ok(Self(size))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn bits(self) -> u32 {
        self.0.trailing_zeros()
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self(2048)
    }
}
