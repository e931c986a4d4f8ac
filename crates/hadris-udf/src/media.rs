//! Media-type sizing tables and the write strategy each media type implies.
//!
//! Grounded on `mkudffs`'s per-media defaults table: each media type maps to
//! an alignment and a `(numerator, denominator, minimum)` sizing rule for
//! the five structural size classes.

/// The physical medium a volume is being built for or read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Hd,
    Dvd,
    DvdRam,
    DvdRw,
    DvdR,
    Worm,
    Mo,
    CdRw,
    CdR,
    Cd,
    BdR,
}

/// How writes to a volume of this media type must be sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Arbitrary random-access reads and writes; space is tracked with a
    /// bitmap or table and freed blocks may be reused.
    RewritableRandom,
    /// Fixed 32-block packets with sparing for defect management.
    Packet32Sparing,
    /// Variable-length packets with sparing; append-only within a session.
    VariablePacketVat,
    /// Strictly append-only; every new object gets a fresh virtual block
    /// number recorded in the VAT.
    SequentialVat,
}

impl MediaType {
    pub fn write_strategy(self) -> WriteStrategy {
        match self {
            Self::Hd | Self::DvdRam | Self::DvdRw => WriteStrategy::RewritableRandom,
            Self::DvdR | Self::Worm | Self::Mo | Self::BdR => WriteStrategy::SequentialVat,
            Self::CdRw => WriteStrategy::Packet32Sparing,
            Self::CdR => WriteStrategy::VariablePacketVat,
            Self::Cd => WriteStrategy::RewritableRandom,
            Self::Dvd => WriteStrategy::RewritableRandom,
        }
    }

    /// Whether this medium uses a VAT to translate virtual to physical
    /// block numbers (append-only media of all kinds).
    pub fn uses_vat(self) -> bool {
        matches!(
            self.write_strategy(),
            WriteStrategy::SequentialVat | WriteStrategy::VariablePacketVat
        )
    }

    pub fn uses_sparing(self) -> bool {
        matches!(self.write_strategy(), WriteStrategy::Packet32Sparing)
    }

    /// Packet alignment in blocks (the size-class table's `align` column).
    pub fn alignment(self) -> u32 {
        match self {
            Self::CdRw => 32,
            Self::DvdRw => 16,
            _ => 1,
        }
    }

    pub fn default_boot_area(self) -> BootAreaPolicy {
        match self {
            Self::Hd => BootAreaPolicy::Mbr,
            _ => BootAreaPolicy::Preserve,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootAreaPolicy {
    Preserve,
    Erase,
    Mbr,
}

/// One of the five size classes a volume's structural sizing table covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Vds,
    Lvid,
    Stable,
    Sspace,
    Pspace,
}

/// `(numerator, denominator, minimum)`: `allocated = max(minimum, blocks * numerator / denominator)`.
#[derive(Debug, Clone, Copy)]
pub struct SizingRule {
    pub numerator: u64,
    pub denominator: u64,
    pub minimum: u32,
}

impl SizingRule {
    pub fn size_for(self, total_blocks: u64) -> u32 {
        let scaled = (total_blocks * self.numerator) / self.denominator;
        scaled.max(self.minimum as u64) as u32
    }
}

impl MediaType {
    /// The sizing rule for one of the five structural size classes, per the
    /// media-type defaults table.
    pub fn sizing(self, class: SizeClass) -> SizingRule {
        match class {
            // One VDS block per 4096 volume blocks, never fewer than 16:
            // larger volumes carry proportionally more partition maps and
            // free-space entries, so a fixed 16-block VDS would run out of
            // room on big volumes.
            SizeClass::Vds => SizingRule { numerator: 1, denominator: 4096, minimum: 16 },
            // One LVID block per 16384 volume blocks: the partition
            // integrity table grows with the number of partitions, which
            // in practice tracks volume size.
            SizeClass::Lvid => SizingRule { numerator: 1, denominator: 16384, minimum: 8 },
            SizeClass::Stable => match self {
                Self::CdRw => SizingRule { numerator: 1, denominator: 20_000, minimum: 128 },
                _ => SizingRule { numerator: 0, denominator: 1, minimum: 0 },
            },
            SizeClass::Sspace => match self {
                Self::CdRw => SizingRule { numerator: 1, denominator: 4000, minimum: 32 * 16 },
                _ => SizingRule { numerator: 0, denominator: 1, minimum: 0 },
            },
            SizeClass::Pspace => SizingRule { numerator: 1, denominator: 1, minimum: 0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hd_is_rewritable_random_no_vat() {
        assert_eq!(MediaType::Hd.write_strategy(), WriteStrategy::RewritableRandom);
        assert!(!MediaType::Hd.uses_vat());
        assert!(!MediaType::Hd.uses_sparing());
    }

    #[test]
    fn dvd_r_is_sequential_vat() {
        assert_eq!(MediaType::DvdR.write_strategy(), WriteStrategy::SequentialVat);
        assert!(MediaType::DvdR.uses_vat());
    }

    #[test]
    fn cd_rw_uses_packet_sparing_and_32_block_alignment() {
        assert_eq!(MediaType::CdRw.write_strategy(), WriteStrategy::Packet32Sparing);
        assert!(MediaType::CdRw.uses_sparing());
        assert_eq!(MediaType::CdRw.alignment(), 32);
    }

    #[test]
    fn sizing_rule_applies_minimum() {
        let rule = SizingRule { numerator: 1, denominator: 1000, minimum: 16 };
        assert_eq!(rule.size_for(100), 16);
        assert_eq!(rule.size_for(1_000_000), 1000);
    }
}
