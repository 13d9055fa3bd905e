//! Gestion de la table FAT : recherche et allocation de clusters

use core::task::Poll;

use crate::boot_sector::{FAT_ENTRIES_PER_SECTOR, PartitionGeometry};
use crate::le::{read_u32, write_u32};
use crate::{BlockDevice, Fat32Error, Result, SECTOR_SIZE};

/// Entrée libre
pub const FAT_FREE: u32 = 0x0000_0000;
/// Fin de chaîne, seul marqueur d'allocation utilisé ici
pub const FAT_END_OF_CHAIN: u32 = 0xFFFF_FFFF;

// Entrées 0 et 1 réservées, 2 = racine, 3 = cluster suivant
const RESERVED_ENTRIES: u32 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AllocStep {
    #[default]
    ReadSector,
    WriteSector,
}

/// Progression de la recherche et de l'allocation, une par disque
#[derive(Debug, Default)]
pub struct FatProgress {
    scan_sector: u32,
    alloc: AllocStep,
}

impl FatProgress {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn scan_sector(&self) -> u32 {
        self.scan_sector
    }
}

/// Accès à la File Allocation Table d'une partition
pub struct FatTable<'a, D: BlockDevice> {
    device: &'a mut D,
    geometry: &'a PartitionGeometry,
    sector: &'a mut [u8; SECTOR_SIZE],
    progress: &'a mut FatProgress,
}

impl<'a, D: BlockDevice> FatTable<'a, D> {
    pub fn new(
        device: &'a mut D,
        geometry: &'a PartitionGeometry,
        sector: &'a mut [u8; SECTOR_SIZE],
        progress: &'a mut FatProgress,
    ) -> Self {
        Self {
            device,
            geometry,
            sector,
            progress,
        }
    }

    /// Chercher un cluster libre dans la copie `copy` de la FAT.
    ///
    /// Un secteur de FAT est examiné par appel. `Poll::Pending` signifie
    /// « pas encore trouvé », le cluster n'est rendu qu'une fois trouvé.
    pub fn find_free_cluster(&mut self, copy: u8) -> Poll<Result<u32>> {
        let index = self.progress.scan_sector;
        let limit = self.geometry.cluster_limit;
        let first = match index.checked_mul(FAT_ENTRIES_PER_SECTOR) {
            Some(first) if index < self.geometry.fat_size_sectors && first < limit => first,
            _ => return self.scan_exhausted(),
        };

        let lba = match self.geometry.fat_sector(copy, index) {
            Ok(lba) => lba,
            Err(e) => {
                self.progress.reset();
                return Poll::Ready(Err(e));
            }
        };

        match self.device.read_sectors(lba, &mut self.sector[..]) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => {
                log::warn!("fat: lecture du secteur {} impossible: {}", lba, e);
                self.progress.reset();
                return Poll::Ready(Err(e));
            }
            Poll::Ready(Ok(())) => {}
        }

        let skip = if index == 0 { RESERVED_ENTRIES } else { 0 };
        for i in skip..FAT_ENTRIES_PER_SECTOR {
            let cluster = first + i;
            if cluster >= limit {
                return self.scan_exhausted();
            }
            if read_u32(&self.sector[..], i as usize * 4) == FAT_FREE {
                log::debug!("fat: cluster libre {} (secteur {})", cluster, lba);
                self.progress.reset();
                return Poll::Ready(Ok(cluster));
            }
        }

        self.progress.scan_sector += 1;
        Poll::Pending
    }

    fn scan_exhausted(&mut self) -> Poll<Result<u32>> {
        log::debug!("fat: plus de cluster libre");
        self.progress.reset();
        Poll::Ready(Err(Fat32Error::NoFreeCluster))
    }

    /// Marquer `cluster` comme fin de chaîne dans la copie `copy`.
    ///
    /// Lecture du secteur puis réécriture ; le succès n'est rendu qu'après
    /// l'écriture. Un échec repart de la lecture au prochain appel.
    pub fn allocate_cluster(&mut self, copy: u8, cluster: u32) -> Poll<Result<()>> {
        let (lba, offset) = match self.geometry.fat_entry_location(copy, cluster) {
            Ok(location) => location,
            Err(e) => {
                self.progress.alloc = AllocStep::ReadSector;
                return Poll::Ready(Err(e));
            }
        };

        match self.progress.alloc {
            AllocStep::ReadSector => match self.device.read_sectors(lba, &mut self.sector[..]) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                Poll::Ready(Ok(())) => {
                    write_u32(&mut self.sector[..], offset, FAT_END_OF_CHAIN);
                    self.progress.alloc = AllocStep::WriteSector;
                    Poll::Pending
                }
            },
            AllocStep::WriteSector => match self.device.write_sectors(lba, &self.sector[..]) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(result) => {
                    self.progress.alloc = AllocStep::ReadSector;
                    if result.is_ok() {
                        log::debug!("fat: cluster {} alloué (copie {})", cluster, copy);
                    }
                    Poll::Ready(result)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbr::{PartitionRecord, PartitionType};
    use crate::BootSector;
    use alloc::vec;
    use alloc::vec::Vec;

    // Mock device pour les tests
    struct MockDevice {
        data: Vec<u8>,
        fail_writes: bool,
    }

    impl BlockDevice for MockDevice {
        fn hardware_init(&mut self) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn configure(&mut self) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn read_sectors(&mut self, start: u32, buffer: &mut [u8]) -> Poll<Result<()>> {
            let offset = start as usize * 512;
            buffer.copy_from_slice(&self.data[offset..offset + buffer.len()]);
            Poll::Ready(Ok(()))
        }

        fn write_sectors(&mut self, start: u32, buffer: &[u8]) -> Poll<Result<()>> {
            if self.fail_writes {
                return Poll::Ready(Err(Fat32Error::IoError));
            }
            let offset = start as usize * 512;
            self.data[offset..offset + buffer.len()].copy_from_slice(buffer);
            Poll::Ready(Ok(()))
        }
    }

    // Partition à l'offset 0 : FAT à 32, 2 copies de 2 secteurs, 1 secteur/cluster
    fn geometry(total_sectors: u32) -> PartitionGeometry {
        let mut raw = [0u8; 512];
        raw[11..13].copy_from_slice(&512u16.to_le_bytes());
        raw[13] = 1;
        raw[14..16].copy_from_slice(&32u16.to_le_bytes());
        raw[16] = 2;
        raw[32..36].copy_from_slice(&total_sectors.to_le_bytes());
        raw[36..40].copy_from_slice(&2u32.to_le_bytes());
        raw[44..48].copy_from_slice(&2u32.to_le_bytes());
        let bs = BootSector::decode(&raw).unwrap();
        let record = PartitionRecord {
            kind: PartitionType::FAT32_LBA,
            start_lba: 0,
            length_lba: total_sectors,
        };
        PartitionGeometry::resolve(&record, &bs).unwrap()
    }

    fn poll<T>(mut step: impl FnMut() -> Poll<Result<T>>) -> Result<T> {
        for _ in 0..100 {
            if let Poll::Ready(result) = step() {
                return result;
            }
        }
        panic!("l'opération ne termine pas");
    }

    fn set_entry(device: &mut MockDevice, cluster: usize, value: u32) {
        let offset = 32 * 512 + cluster * 4;
        device.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn test_skips_reserved_entries() {
        let geo = geometry(400);
        let mut device = MockDevice { data: vec![0; 400 * 512], fail_writes: false };
        let mut sector = [0u8; SECTOR_SIZE];
        let mut progress = FatProgress::default();
        let mut fat = FatTable::new(&mut device, &geo, &mut sector, &mut progress);

        // FAT entièrement à zéro : les 4 premières entrées sont ignorées
        assert_eq!(poll(|| fat.find_free_cluster(0)), Ok(4));
    }

    #[test]
    fn test_scan_moves_to_next_sector() {
        let geo = geometry(400);
        let mut device = MockDevice { data: vec![0; 400 * 512], fail_writes: false };
        for cluster in 0..130 {
            set_entry(&mut device, cluster, 0x0FFF_FFFF);
        }
        let mut sector = [0u8; SECTOR_SIZE];
        let mut progress = FatProgress::default();
        let mut fat = FatTable::new(&mut device, &geo, &mut sector, &mut progress);

        assert_eq!(fat.find_free_cluster(0), Poll::Pending);
        assert_eq!(fat.find_free_cluster(0), Poll::Ready(Ok(130)));
    }

    #[test]
    fn test_no_free_cluster() {
        // 364 clusters de données mais la FAT n'a que 256 entrées
        let geo = geometry(400);
        assert_eq!(geo.cluster_limit, 256);
        let mut device = MockDevice { data: vec![0; 400 * 512], fail_writes: false };
        for cluster in 0..256 {
            set_entry(&mut device, cluster, 0xFFFF_FFFF);
        }
        let mut sector = [0u8; SECTOR_SIZE];
        let mut progress = FatProgress::default();
        let mut fat = FatTable::new(&mut device, &geo, &mut sector, &mut progress);

        assert_eq!(poll(|| fat.find_free_cluster(0)), Err(Fat32Error::NoFreeCluster));
    }

    #[test]
    fn test_allocate_then_search_again() {
        let geo = geometry(400);
        let mut device = MockDevice { data: vec![0; 400 * 512], fail_writes: false };
        let mut sector = [0u8; SECTOR_SIZE];
        let mut progress = FatProgress::default();
        {
            let mut fat = FatTable::new(&mut device, &geo, &mut sector, &mut progress);
            let cluster = poll(|| fat.find_free_cluster(1)).unwrap();
            assert_eq!(cluster, 4);
            poll(|| fat.allocate_cluster(1, cluster)).unwrap();
            assert_eq!(poll(|| fat.find_free_cluster(1)), Ok(5));
        }

        // copie 1 : FAT à 34, entrée 4 à l'octet 16
        let offset = 34 * 512 + 16;
        assert_eq!(&device.data[offset..offset + 4], &[0xFF; 4]);
    }

    #[test]
    fn test_allocate_failure_restarts_from_read() {
        let geo = geometry(400);
        let mut device = MockDevice { data: vec![0; 400 * 512], fail_writes: true };
        let mut sector = [0u8; SECTOR_SIZE];
        let mut progress = FatProgress::default();
        let mut fat = FatTable::new(&mut device, &geo, &mut sector, &mut progress);

        assert_eq!(fat.allocate_cluster(0, 7), Poll::Pending);
        assert_eq!(fat.allocate_cluster(0, 7), Poll::Ready(Err(Fat32Error::IoError)));
        assert_eq!(progress.alloc, AllocStep::ReadSector);
    }

    #[test]
    fn test_invalid_cluster() {
        let geo = geometry(400);
        let mut device = MockDevice { data: vec![0; 400 * 512], fail_writes: false };
        let mut sector = [0u8; SECTOR_SIZE];
        let mut progress = FatProgress::default();
        let mut fat = FatTable::new(&mut device, &geo, &mut sector, &mut progress);

        assert_eq!(fat.allocate_cluster(0, 0), Poll::Ready(Err(Fat32Error::InvalidCluster)));
        assert_eq!(fat.allocate_cluster(0, 1), Poll::Ready(Err(Fat32Error::InvalidCluster)));
    }
}
