/// Errors that can occur when working with a UDF volume.
///
/// When the `std` feature is enabled, [`UdfError::IoError`] wraps
/// [`hadris_io::Error`] (which is `std::io::Error` under `std`); the
/// propagation policy for each variant is documented on the variant itself.
#[derive(Debug, thiserror::Error)]
pub enum UdfError {
    /// The backing device read or write failed. Fatal to the enclosing
    /// session: the volume's LVID is left OPEN so a subsequent open can
    /// detect the partial session.
    #[error(transparent)]
    IoError(#[from] hadris_io::Error),

    /// A descriptor tag's checksum or CRC did not match, or an unexpected
    /// identifier was found at a slot.
    #[error("invalid descriptor tag at block {location}: {reason}")]
    TagInvalid { location: u32, reason: &'static str },

    /// The space manager could not satisfy an allocation of `blocks` blocks.
    #[error("no space for {blocks} block(s)")]
    NoSpace { blocks: u32 },

    /// The sparing table is full; `remap` cannot add another entry.
    #[error("sparing table exhausted (all {capacity} entries used)")]
    SparingExhausted { capacity: usize },

    /// The VAT has reached its maximum addressable index for this session.
    #[error("virtual allocation table is full")]
    VatFull,

    /// A structural invariant (see [`crate::checker`]) is violated and is
    /// not fixable under the current mode.
    #[error("volume corrupt: {0}")]
    VolumeCorrupt(&'static str),

    /// The UDF revision requested or found on disc is outside the
    /// supported set (0x0102, 0x0150, 0x0200, 0x0201, 0x0250).
    #[error("unsupported UDF revision {0:#06x}")]
    UnsupportedRevision(u16),

    /// A caller-supplied parameter was out of range.
    #[error("bad argument: {0}")]
    BadArgument(&'static str),

    /// `create` was attempted on an existing, non-deleted name without
    /// overwrite permission.
    #[error("{0:?} already exists")]
    AlreadyExists(alloc::string::String),

    /// Name resolution failed.
    #[error("{0:?} not found")]
    NotFound(alloc::string::String),

    /// `rmdir` was attempted on a non-empty directory.
    #[error("directory not empty")]
    NotEmpty,

    /// The file entry's permission bits deny the operation for the
    /// configured uid/gid.
    #[error("permission denied")]
    PermissionDenied,

    /// A write was attempted on a closed or read-only volume.
    #[error("medium is read-only")]
    MediumReadOnly,
}

pub type Result<T> = core::result::Result<T, UdfError>;
