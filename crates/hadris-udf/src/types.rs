//! On-disc primitive types shared across descriptors: the descriptor tag,
//! the three allocation-descriptor shapes, timestamps, entity identifiers
//! and CS0 strings.

use alloc::string::String;
use alloc::vec::Vec;
use hadris_common::types::endian::{Endian, LittleEndian};
use hadris_common::types::number::{U16, U32, U64};

use crate::error::UdfError;

/// All integers on a UDF volume are little-endian; these aliases match the
/// naming `hadris-iso` uses for its own endian-tagged fields.
pub type U16Le = U16<LittleEndian>;
pub type U32Le = U32<LittleEndian>;
pub type U64Le = U64<LittleEndian>;

/// Descriptor tag identifiers (ECMA-167 3/7.2.1, 4/14.*).
pub mod tag_id {
    pub const PVD: u16 = 1;
    pub const AVDP: u16 = 2;
    pub const VDP: u16 = 3;
    pub const IUVD: u16 = 4;
    pub const PD: u16 = 5;
    pub const LVD: u16 = 6;
    pub const USD: u16 = 7;
    pub const TD: u16 = 8;
    pub const LVID: u16 = 9;
    pub const FSD: u16 = 0x100;
    pub const FID: u16 = 0x101;
    pub const AED: u16 = 0x102;
    pub const IE: u16 = 0x103;
    pub const TE: u16 = 0x104;
    pub const FE: u16 = 0x105;
    pub const EAHD: u16 = 0x106;
    pub const USE: u16 = 0x107;
    pub const SBD: u16 = 0x108;
    pub const PIE: u16 = 0x109;
    pub const EFE: u16 = 0x10A;
}

/// 16-byte descriptor tag: identifier, version, checksum, serial number,
/// CRC and the block location the descriptor claims to occupy.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct DescriptorTag {
    pub identifier: U16Le,
    pub descriptor_version: U16Le,
    pub tag_checksum: u8,
    pub reserved: u8,
    pub tag_serial_number: U16Le,
    pub descriptor_crc: U16Le,
    pub descriptor_crc_length: U16Le,
    pub tag_location: U32Le,
}

static_assertions::assert_eq_size!(DescriptorTag, [u8; 16]);

impl DescriptorTag {
    pub fn location(&self) -> u32 {
        self.tag_location.get()
    }

    pub fn new(identifier: u16, version: u16, serial: u16, location: u32) -> Self {
        Self {
            identifier: U16Le::new(identifier),
            descriptor_version: U16Le::new(version),
            tag_checksum: 0,
            reserved: 0,
            tag_serial_number: U16Le::new(serial),
            descriptor_crc: U16Le::new(0),
            descriptor_crc_length: U16Le::new(0),
            tag_location: U32Le::new(location),
        }
    }

    fn compute_checksum(&self) -> u8 {
        let bytes = bytemuck::bytes_of(self);
        let mut sum: u8 = 0;
        for (i, b) in bytes.iter().enumerate() {
            // Byte 4 is the checksum itself and is excluded from the sum.
            if i == 4 {
                continue;
            }
            sum = sum.wrapping_add(*b);
        }
        sum
    }

    /// Re-stamps the tag over `payload` (the descriptor bytes following the
    /// 16-byte tag). CRC is computed first, checksum last, since the
    /// checksum covers the CRC bytes.
    pub fn stamp(&mut self, payload: &[u8]) {
        self.descriptor_crc_length = U16Le::new(payload.len() as u16);
        let crc = hadris_common::alg::hash::crc::Crc16HasherCcitt::checksum(payload);
        self.descriptor_crc = U16Le::new(crc);
        self.tag_checksum = self.compute_checksum();
    }

    pub fn verify(&self, payload: &[u8], expected_location: u32) -> Result<(), UdfError> {
        if self.tag_checksum != self.compute_checksum() {
            return Err(UdfError::TagInvalid {
                location: expected_location,
                reason: "checksum mismatch",
            });
        }
        let crc_len = self.descriptor_crc_length.get() as usize;
        if crc_len > payload.len() {
            return Err(UdfError::TagInvalid {
                location: expected_location,
                reason: "CRC length exceeds payload",
            });
        }
        let crc = hadris_common::alg::hash::crc::Crc16HasherCcitt::checksum(&payload[..crc_len]);
        if crc != self.descriptor_crc.get() {
            return Err(UdfError::TagInvalid {
                location: expected_location,
                reason: "CRC mismatch",
            });
        }
        if self.tag_location.get() != expected_location {
            return Err(UdfError::TagInvalid {
                location: expected_location,
                reason: "tag location mismatch",
            });
        }
        Ok(())
    }
}

/// The kind of an allocation extent, packed into the top two bits of every
/// `short_ad`/`long_ad`/`ext_ad` length field.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocType {
    RecordedAllocated = 0,
    NotRecordedAllocated = 1,
    NotRecordedNotAllocated = 2,
    NextExtent = 3,
}

impl AllocType {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Self::RecordedAllocated,
            1 => Self::NotRecordedAllocated,
            2 => Self::NotRecordedNotAllocated,
            _ => Self::NextExtent,
        }
    }
}

const LENGTH_MASK: u32 = 0x3FFF_FFFF;

fn pack_length_and_type(length: u32, alloc_type: AllocType) -> u32 {
    debug_assert!(length <= LENGTH_MASK, "extent length overflows 30 bits");
    (length & LENGTH_MASK) | ((alloc_type as u32) << 30)
}

/// An 8-byte `extent_ad`: a plain byte-length + absolute-block-location
/// pair with no allocation-type bits, used to point at volume-space extents
/// (the VDS extents referenced from an AVDP, the LVID extent in the LVD).
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug, Default)]
pub struct ExtentAd {
    pub length: U32Le,
    pub location: U32Le,
}

static_assertions::assert_eq_size!(ExtentAd, [u8; 8]);

impl ExtentAd {
    pub fn new(length: u32, location: u32) -> Self {
        Self {
            length: U32Le::new(length),
            location: U32Le::new(location),
        }
    }
}

/// An 8-byte `short_ad`: an allocation descriptor addressing a run of
/// blocks within the partition that owns the ICB.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct ShortAd {
    length_and_type: U32Le,
    pub block_number: U32Le,
}

static_assertions::assert_eq_size!(ShortAd, [u8; 8]);

impl ShortAd {
    pub fn new(length: u32, alloc_type: AllocType, block_number: u32) -> Self {
        Self {
            length_and_type: U32Le::new(pack_length_and_type(length, alloc_type)),
            block_number: U32Le::new(block_number),
        }
    }

    pub fn length(&self) -> u32 {
        self.length_and_type.get() & LENGTH_MASK
    }

    pub fn alloc_type(&self) -> AllocType {
        AllocType::from_bits((self.length_and_type.get() >> 30) as u8)
    }
}

/// A 16-byte `long_ad`: an allocation descriptor addressing a run of
/// blocks, optionally in a different partition, with 6 bytes of
/// implementation-use that carry the unique ID of the referenced file
/// entry in its trailing 4 bytes.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct LongAd {
    length_and_type: U32Le,
    pub block_number: U32Le,
    pub partition_ref: U16Le,
    pub impl_use: [u8; 6],
}

static_assertions::assert_eq_size!(LongAd, [u8; 16]);

impl LongAd {
    pub fn new(length: u32, alloc_type: AllocType, block_number: u32, partition_ref: u16) -> Self {
        Self {
            length_and_type: U32Le::new(pack_length_and_type(length, alloc_type)),
            block_number: U32Le::new(block_number),
            partition_ref: U16Le::new(partition_ref),
            impl_use: [0; 6],
        }
    }

    pub fn with_unique_id(mut self, unique_id: u32) -> Self {
        self.impl_use[2..6].copy_from_slice(&unique_id.to_le_bytes());
        self
    }

    pub fn length(&self) -> u32 {
        self.length_and_type.get() & LENGTH_MASK
    }

    pub fn alloc_type(&self) -> AllocType {
        AllocType::from_bits((self.length_and_type.get() >> 30) as u8)
    }

    pub fn unique_id(&self) -> u32 {
        u32::from_le_bytes(self.impl_use[2..6].try_into().unwrap())
    }
}

/// ECMA-167 `timestamp` (1/7.3): type + timezone, then Y/M/D h:m:s plus
/// centiseconds / hundreds-of-microseconds / microseconds.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Debug)]
pub struct Timestamp {
    pub type_and_timezone: U16Le,
    pub year: U16Le,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub centiseconds: u8,
    pub hundreds_of_microseconds: u8,
    pub microseconds: u8,
}

static_assertions::assert_eq_size!(Timestamp, [u8; 12]);

impl Timestamp {
    pub const TYPE_LOCAL: u16 = 1 << 12;

    #[cfg(feature = "std")]
    pub fn now() -> Self {
        use chrono::{Datelike, Timelike, Utc};
        let now = Utc::now();
        Self {
            // -2047 (0x800) in the low 12 bits marks "timezone not specified".
            type_and_timezone: U16Le::new(Self::TYPE_LOCAL | 0x0FFF),
            year: U16Le::new(now.year() as u16),
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
            centiseconds: (now.nanosecond() / 10_000_000) as u8,
            hundreds_of_microseconds: 0,
            microseconds: 0,
        }
    }

    pub fn zero() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}

/// ECMA-167 `regid` (1/7.4): flags, a 23-byte identifier and an 8-byte
/// suffix encoding OS class/id and the UDF revision.
#[repr(C, packed)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Regid {
    pub flags: u8,
    pub identifier: [u8; 23],
    pub identifier_suffix: [u8; 8],
}

static_assertions::assert_eq_size!(Regid, [u8; 32]);

impl core::fmt::Debug for Regid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let end = self.identifier.iter().position(|&b| b == 0).unwrap_or(23);
        f.debug_struct("Regid")
            .field("identifier", &core::str::from_utf8(&self.identifier[..end]).unwrap_or("?"))
            .finish_non_exhaustive()
    }
}

impl Regid {
    pub const OS_CLASS_UNIX: u8 = 2;
    pub const OS_ID_LINUX: u8 = 4;

    pub fn new(ident: &str, udf_revision: u16) -> Self {
        let mut identifier = [0u8; 23];
        let bytes = ident.as_bytes();
        let len = bytes.len().min(23);
        identifier[..len].copy_from_slice(&bytes[..len]);
        let mut identifier_suffix = [0u8; 8];
        identifier_suffix[0] = (udf_revision & 0xFF) as u8;
        identifier_suffix[1] = (udf_revision >> 8) as u8;
        identifier_suffix[2] = Self::OS_CLASS_UNIX;
        identifier_suffix[3] = Self::OS_ID_LINUX;
        Self {
            flags: 0,
            identifier,
            identifier_suffix,
        }
    }

    /// The `*UDF ...` implementation-use regids carried in partition maps
    /// and the VAT trailer never set the hard-write-protect flag (bit 0).
    pub fn domain_identifier(udf_revision: u16) -> Self {
        Self::new("*OSTA UDF Compliant", udf_revision)
    }
}

/// OSTA CS0 compressed Unicode identifier ("dstring"): a compression ID
/// byte, up to `N - 2` content bytes, and a trailing length byte.
///
/// Only the 8-bit (Latin-1-compatible) compression form is produced;
/// decoding a 16-bit (UTF-16BE) dstring is supported for reads.
#[derive(Clone, PartialEq, Eq)]
pub struct DString {
    bytes: Vec<u8>,
}

impl core::fmt::Debug for DString {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl DString {
    pub fn empty() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Builds the fixed on-disc field of `field_len` bytes: compression ID,
    /// content, zero padding, trailing length byte.
    pub fn to_field(&self, field_len: usize) -> Vec<u8> {
        let mut field = alloc::vec![0u8; field_len];
        if field_len < 2 {
            return field;
        }
        field[0] = 8; // 8-bit compressed unicode
        let max_content = field_len - 2;
        let len = self.bytes.len().min(max_content);
        field[1..1 + len].copy_from_slice(&self.bytes[..len]);
        field[field_len - 1] = (len + 1) as u8;
        field
    }

    pub fn from_field(field: &[u8]) -> Self {
        if field.len() < 2 {
            return Self::empty();
        }
        let recorded_len = field[field.len() - 1] as usize;
        if recorded_len == 0 {
            return Self::empty();
        }
        let content_len = recorded_len.saturating_sub(1).min(field.len().saturating_sub(2));
        match field[0] {
            16 => {
                // UTF-16BE compressed unicode: take every other byte's low
                // half (ASCII-range-only decoding, matching the core's
                // external-encoder-hook stance on charset conversion).
                let mut bytes = Vec::with_capacity(content_len / 2);
                let mut i = 1;
                while i + 1 < 1 + content_len {
                    bytes.push(field[i + 1]);
                    i += 2;
                }
                Self { bytes }
            }
            _ => Self {
                bytes: field[1..1 + content_len].to_vec(),
            },
        }
    }

    pub fn from_str(s: &str) -> Self {
        Self {
            bytes: s.as_bytes().to_vec(),
        }
    }

    pub fn as_str(&self) -> alloc::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for DString {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips() {
        let payload = [1u8, 2, 3, 4, 5];
        let mut tag = DescriptorTag::new(tag_id::PVD, 2, 0, 32);
        tag.stamp(&payload);
        assert!(tag.verify(&payload, 32).is_ok());
        assert!(tag.verify(&payload, 33).is_err());
        let mut tampered = payload;
        tampered[0] ^= 0xFF;
        assert!(tag.verify(&tampered, 32).is_err());
    }

    #[test]
    fn short_ad_packs_type_in_top_bits() {
        let ad = ShortAd::new(0x1234, AllocType::NotRecordedAllocated, 99);
        assert_eq!(ad.length(), 0x1234);
        assert_eq!(ad.alloc_type(), AllocType::NotRecordedAllocated);
        assert_eq!(ad.block_number.get(), 99);
    }

    #[test]
    fn long_ad_carries_unique_id_suffix() {
        let ad = LongAd::new(2048, AllocType::RecordedAllocated, 10, 0).with_unique_id(0xDEAD_BEEF);
        assert_eq!(ad.unique_id(), 0xDEAD_BEEF);
    }

    #[test]
    fn dstring_round_trips_ascii() {
        let s = DString::from_str("LinuxUDF");
        let field = s.to_field(32);
        let back = DString::from_field(&field);
        assert_eq!(back.as_str(), "LinuxUDF");
    }
}
