use crate::le::{read_u16, read_u32};
use crate::mbr::PartitionRecord;
use crate::{Fat32Error, Result, SECTOR_SIZE};

// bootsecteur (BPB) pour fat32, décodé champ par champ

/// Entrées FAT (4 octets) par secteur
pub const FAT_ENTRIES_PER_SECTOR: u32 = (SECTOR_SIZE / 4) as u32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub total_sectors_16: u16,
    pub fat_size_16: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    // FAT32 spécifique
    pub fat_size_32: u32,
    pub root_cluster: u32,
    pub fs_info: u16,
    pub boot_signature: u8,
    pub volume_id: u32,
}

impl BootSector {
    /// Lire les champs du BPB aux offsets standard FAT32.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < SECTOR_SIZE {
            return Err(Fat32Error::BufferTooSmall);
        }

        Ok(Self {
            bytes_per_sector: read_u16(data, 11),
            sectors_per_cluster: data[13],
            reserved_sector_count: read_u16(data, 14),
            num_fats: data[16],
            root_entry_count: read_u16(data, 17),
            total_sectors_16: read_u16(data, 19),
            fat_size_16: read_u16(data, 22),
            hidden_sectors: read_u32(data, 28),
            total_sectors_32: read_u32(data, 32),
            fat_size_32: read_u32(data, 36),
            root_cluster: read_u32(data, 44),
            fs_info: read_u16(data, 48),
            boot_signature: data[66],
            volume_id: read_u32(data, 67),
        })
    }

    /// Vérifier que le boot sector décrit un volume FAT32 utilisable
    pub fn validate(&self) -> Result<()> {
        // Le moteur ne travaille qu'avec des secteurs de 512 octets
        if self.bytes_per_sector as usize != SECTOR_SIZE {
            return Err(Fat32Error::InvalidBootSector);
        }

        if self.sectors_per_cluster == 0 || !self.sectors_per_cluster.is_power_of_two() {
            return Err(Fat32Error::InvalidBootSector);
        }

        // Au moins une FAT
        if self.num_fats == 0 {
            return Err(Fat32Error::InvalidBootSector);
        }

        // FAT12/16 : répertoire racine fixe ou FAT 16 bits
        if self.root_entry_count != 0 || self.fat_size_16 != 0 || self.fat_size_32 == 0 {
            return Err(Fat32Error::InvalidFileSystem);
        }

        if self.root_cluster < 2 {
            return Err(Fat32Error::InvalidCluster);
        }

        Ok(())
    }

    /// Taille d'un cluster en octets
    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector as u32 * self.sectors_per_cluster as u32
    }

    /// Taille de la FAT
    pub fn fat_size(&self) -> u32 {
        if self.fat_size_16 != 0 {
            self.fat_size_16 as u32
        } else {
            self.fat_size_32
        }
    }

    /// Nombre total de secteurs
    pub fn total_sectors(&self) -> u32 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u32
        } else {
            self.total_sectors_32
        }
    }
}

/// Géométrie dérivée d'une partition, en secteurs absolus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionGeometry {
    pub start_lba: u32,
    pub fat_start_sector: u32,
    pub fat_size_sectors: u32,
    pub fat_copies: u8,
    pub data_start_sector: u32,
    pub sectors_per_cluster: u32,
    pub root_cluster: u32,
    pub root_sector: u32,
    /// Premier numéro de cluster hors du volume
    pub cluster_limit: u32,
}

impl PartitionGeometry {
    /// Calculer la géométrie à partir de l'entrée MBR et du BPB.
    ///
    /// Toute l'arithmétique est vérifiée : un débordement donne
    /// `ParameterValue` au lieu d'une adresse fausse.
    pub fn resolve(record: &PartitionRecord, bpb: &BootSector) -> Result<Self> {
        bpb.validate()?;

        let fat_size = bpb.fat_size();
        let sectors_per_cluster = bpb.sectors_per_cluster as u32;

        let fat_start = record
            .start_lba
            .checked_add(bpb.reserved_sector_count as u32)
            .ok_or(Fat32Error::ParameterValue)?;
        let fats_total = fat_size
            .checked_mul(bpb.num_fats as u32)
            .ok_or(Fat32Error::ParameterValue)?;
        let data_start = fat_start
            .checked_add(fats_total)
            .ok_or(Fat32Error::ParameterValue)?;
        let root_sector = sectors_per_cluster
            .checked_mul(bpb.root_cluster - 2)
            .and_then(|offset| data_start.checked_add(offset))
            .ok_or(Fat32Error::ParameterValue)?;

        // Clusters réellement présents : bornés par la zone de données et
        // par le nombre d'entrées de la FAT
        let total = match bpb.total_sectors() {
            0 => record.length_lba,
            n => n,
        };
        let data_sectors = total
            .checked_sub(data_start - record.start_lba)
            .ok_or(Fat32Error::InvalidBootSector)?;
        let clusters = (data_sectors / sectors_per_cluster) as u64 + 2;
        let fat_entries = fat_size as u64 * FAT_ENTRIES_PER_SECTOR as u64;
        let cluster_limit = clusters.min(fat_entries).min(u32::MAX as u64) as u32;

        if bpb.root_cluster >= cluster_limit {
            return Err(Fat32Error::InvalidCluster);
        }

        Ok(Self {
            start_lba: record.start_lba,
            fat_start_sector: fat_start,
            fat_size_sectors: fat_size,
            fat_copies: bpb.num_fats,
            data_start_sector: data_start,
            sectors_per_cluster,
            root_cluster: bpb.root_cluster,
            root_sector,
            cluster_limit,
        })
    }

    /// Taille d'un cluster en octets
    pub fn cluster_bytes(&self) -> u32 {
        self.sectors_per_cluster * SECTOR_SIZE as u32
    }

    /// Premier secteur d'un cluster de données
    pub fn cluster_sector(&self, cluster: u32) -> Result<u32> {
        if cluster < 2 || cluster >= self.cluster_limit {
            return Err(Fat32Error::InvalidCluster);
        }
        self.sectors_per_cluster
            .checked_mul(cluster - 2)
            .and_then(|offset| self.data_start_sector.checked_add(offset))
            .ok_or(Fat32Error::ParameterValue)
    }

    /// Secteur absolu `index` de la copie `copy` de la FAT
    pub fn fat_sector(&self, copy: u8, index: u32) -> Result<u32> {
        if copy >= self.fat_copies || index >= self.fat_size_sectors {
            return Err(Fat32Error::ParameterValue);
        }
        self.fat_size_sectors
            .checked_mul(copy as u32)
            .and_then(|offset| self.fat_start_sector.checked_add(offset))
            .and_then(|base| base.checked_add(index))
            .ok_or(Fat32Error::ParameterValue)
    }

    /// Secteur et offset de l'entrée FAT d'un cluster
    pub fn fat_entry_location(&self, copy: u8, cluster: u32) -> Result<(u32, usize)> {
        if cluster < 2 || cluster >= self.cluster_limit {
            return Err(Fat32Error::InvalidCluster);
        }
        let sector = self.fat_sector(copy, cluster / FAT_ENTRIES_PER_SECTOR)?;
        let offset = (cluster % FAT_ENTRIES_PER_SECTOR) as usize * 4;
        Ok((sector, offset))
    }
}
