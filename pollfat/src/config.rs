//! Paramètres du moteur (remplacent les constantes de compilation)

use crate::mbr::{MAX_PARTITIONS, PartitionType};
use crate::{Fat32Error, Result};

/// Configuration du moteur FAT32.
///
/// ```
/// use pollfat::Config;
///
/// let config = Config::new().with_max_files(2).with_buffer_sectors(2);
/// assert_eq!(config.max_files(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    partitions: usize,
    max_files: usize,
    buffer_sectors: usize,
    partition_type: PartitionType,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            partitions: MAX_PARTITIONS,
            max_files: 4,
            buffer_sectors: 4,
            partition_type: PartitionType::FAT32_LBA,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nombre d'entrées de la table des partitions à examiner (1 à 4).
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    /// Nombre de descripteurs de fichiers, tous disques confondus.
    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Taille du buffer de transfert de chaque descripteur, en secteurs.
    pub fn with_buffer_sectors(mut self, buffer_sectors: usize) -> Self {
        self.buffer_sectors = buffer_sectors;
        self
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    pub fn buffer_sectors(&self) -> usize {
        self.buffer_sectors
    }

    /// Le seul type de partition accepté au montage.
    pub fn partition_type(&self) -> PartitionType {
        self.partition_type
    }

    pub fn validate(&self) -> Result<()> {
        if self.partitions == 0 || self.partitions > MAX_PARTITIONS {
            return Err(Fat32Error::ParameterValue);
        }
        // les index de descripteurs tiennent sur un octet
        if self.max_files == 0 || self.max_files > u8::MAX as usize {
            return Err(Fat32Error::ParameterValue);
        }
        if self.buffer_sectors == 0 {
            return Err(Fat32Error::ParameterValue);
        }
        Ok(())
    }
}
