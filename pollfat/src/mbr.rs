//! Master Boot Record réduit (secteur 0)

use core::fmt;

use crate::le::{read_u16, read_u32};
use crate::{Fat32Error, Result, SECTOR_SIZE};

pub const MBR_SIGNATURE: u16 = 0xAA55;
pub const MAX_PARTITIONS: usize = 4;

const SIGNATURE_OFFSET: usize = 510;
const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_RECORD_SIZE: usize = 16;

// Dans une entrée de la table des partitions
const TYPE_OFFSET: usize = 4;
const START_LBA_OFFSET: usize = 8;
const LENGTH_OFFSET: usize = 12;

/// Octet de type d'une entrée de partition
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct PartitionType(pub u8);

impl PartitionType {
    pub const UNUSED: Self = Self(0x00);
    pub const FAT12: Self = Self(0x01);
    pub const FAT16_SMALL: Self = Self(0x04);
    pub const EXTENDED: Self = Self(0x05);
    pub const FAT16: Self = Self(0x06);
    pub const FAT32: Self = Self(0x0B);
    pub const FAT32_LBA: Self = Self(0x0C);
    pub const FAT16_LBA: Self = Self(0x0E);
    pub const EXTENDED_LBA: Self = Self(0x0F);

    pub fn is_unused(&self) -> bool {
        *self == Self::UNUSED
    }
}

impl fmt::Debug for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PartitionType(0x{:02x})", self.0)
    }
}

/// Une entrée de la table des partitions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionRecord {
    pub kind: PartitionType,
    pub start_lba: u32,
    pub length_lba: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MasterBootRecord {
    pub partitions: [PartitionRecord; MAX_PARTITIONS],
}

impl MasterBootRecord {
    /// Décoder le secteur 0.
    ///
    /// Seules les `slots` premières entrées sont lues, les autres restent
    /// `UNUSED`. Une signature autre que `0xAA55` donne
    /// `InvalidFileSystem`.
    pub fn decode(sector: &[u8], slots: usize) -> Result<Self> {
        if sector.len() < SECTOR_SIZE {
            return Err(Fat32Error::BufferTooSmall);
        }

        if read_u16(sector, SIGNATURE_OFFSET) != MBR_SIGNATURE {
            return Err(Fat32Error::InvalidFileSystem);
        }

        let mut mbr = Self::default();
        for (i, record) in mbr.partitions.iter_mut().take(slots).enumerate() {
            let base = PARTITION_TABLE_OFFSET + i * PARTITION_RECORD_SIZE;
            *record = PartitionRecord {
                kind: PartitionType(sector[base + TYPE_OFFSET]),
                start_lba: read_u32(sector, base + START_LBA_OFFSET),
                length_lba: read_u32(sector, base + LENGTH_OFFSET),
            };
        }

        Ok(mbr)
    }
}
