use crc::{CRC_16_XMODEM, CRC_32_ISO_HDLC, Crc};

const HASHER_ISO_HDLC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// A CRC-32 checksum with the ISO-HDLC polynomial.
#[derive(Debug, Copy, Clone)]
pub struct Crc32HasherIsoHdlc;

impl Crc32HasherIsoHdlc {
    pub fn checksum(data: &[u8]) -> u32 {
        HASHER_ISO_HDLC.checksum(data)
    }
}

const HASHER_CRC16_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// The CRC-16 used by ECMA-167 descriptor tags (the CCITT polynomial, as
/// specified by ECMA-167 Annex A).
#[derive(Debug, Copy, Clone)]
pub struct Crc16HasherCcitt;

impl Crc16HasherCcitt {
    pub fn checksum(data: &[u8]) -> u16 {
        HASHER_CRC16_CCITT.checksum(data)
    }
}
