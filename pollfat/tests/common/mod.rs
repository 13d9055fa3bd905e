// Outils partagés des tests d'intégration
#![allow(dead_code)]

use std::task::{Poll, ready};

use pollfat::{BlockDevice, Config, Fat32Error, Fat32FileSystem, Result, SECTOR_SIZE};

pub const DISK_SECTORS: usize = 4096;
pub const PARTITION_START: u32 = 64;
pub const PARTITION_LENGTH: u32 = 4032;

// Géométrie de l'image de test
pub const FAT_START: u32 = 96;
pub const FAT_SIZE: u32 = 8;
pub const ROOT_SECTOR: u32 = 112;
pub const CLUSTER_BYTES: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Read,
    Write,
}

/// Disque en mémoire : chaque transfert reste `Pending` pendant
/// `latency` appels avant de se terminer. Une autre requête pendant
/// l'attente est refusée et comptée dans `violations`.
pub struct MemDisk {
    pub data: Vec<u8>,
    pub latency: u32,
    pending: Option<(Op, u32, usize, u32)>,
    pub reads: usize,
    pub writes: usize,
    pub violations: usize,
    pub fail_next_read: bool,
    pub fail_next_write: bool,
    pub init_error: Option<Fat32Error>,
}

impl MemDisk {
    pub fn new(data: Vec<u8>, latency: u32) -> Self {
        Self {
            data,
            latency,
            pending: None,
            reads: 0,
            writes: 0,
            violations: 0,
            fail_next_read: false,
            fail_next_write: false,
            init_error: None,
        }
    }

    pub fn sector(&self, lba: u32) -> &[u8] {
        let offset = lba as usize * SECTOR_SIZE;
        &self.data[offset..offset + SECTOR_SIZE]
    }

    /// Oublier la requête en cours, comme un transport réinitialisé
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// `Pending` tant que la latence n'est pas écoulée pour cette requête
    fn complete(&mut self, op: Op, start: u32, len: usize) -> Poll<Result<()>> {
        let remaining = match self.pending {
            Some((o, s, l, remaining)) if (o, s, l) == (op, start, len) => remaining,
            Some(_) => {
                self.violations += 1;
                return Poll::Ready(Err(Fat32Error::Device(start)));
            }
            None => self.latency,
        };
        if remaining == 0 {
            self.pending = None;
            Poll::Ready(Ok(()))
        } else {
            self.pending = Some((op, start, len, remaining - 1));
            Poll::Pending
        }
    }

    fn range(&self, start: u32, len: usize) -> Result<std::ops::Range<usize>> {
        let offset = start as usize * SECTOR_SIZE;
        if len % SECTOR_SIZE != 0 || offset + len > self.data.len() {
            return Err(Fat32Error::Device(start));
        }
        Ok(offset..offset + len)
    }
}

impl BlockDevice for MemDisk {
    fn hardware_init(&mut self) -> Poll<Result<()>> {
        match self.init_error {
            Some(e) => Poll::Ready(Err(e)),
            None => Poll::Ready(Ok(())),
        }
    }

    fn configure(&mut self) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn read_sectors(&mut self, start: u32, buffer: &mut [u8]) -> Poll<Result<()>> {
        ready!(self.complete(Op::Read, start, buffer.len()))?;
        self.reads += 1;
        if self.fail_next_read {
            self.fail_next_read = false;
            return Poll::Ready(Err(Fat32Error::IoError));
        }
        let range = self.range(start, buffer.len())?;
        buffer.copy_from_slice(&self.data[range]);
        Poll::Ready(Ok(()))
    }

    fn write_sectors(&mut self, start: u32, buffer: &[u8]) -> Poll<Result<()>> {
        ready!(self.complete(Op::Write, start, buffer.len()))?;
        self.writes += 1;
        if self.fail_next_write {
            self.fail_next_write = false;
            return Poll::Ready(Err(Fat32Error::IoError));
        }
        let range = self.range(start, buffer.len())?;
        self.data[range].copy_from_slice(buffer);
        Poll::Ready(Ok(()))
    }
}

fn put_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Image de 4096 secteurs : une partition FAT32 LBA à partir du secteur 64,
/// 8 secteurs par cluster, 2 FAT de 8 secteurs, racine au cluster 2.
pub fn build_image() -> Vec<u8> {
    let mut data = vec![0u8; DISK_SECTORS * SECTOR_SIZE];

    // MBR
    data[446 + 4] = 0x0C;
    put_u32(&mut data, 446 + 8, PARTITION_START);
    put_u32(&mut data, 446 + 12, PARTITION_LENGTH);
    data[510] = 0x55;
    data[511] = 0xAA;

    // BPB
    let bpb = PARTITION_START as usize * SECTOR_SIZE;
    data[bpb..bpb + 3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    data[bpb + 3..bpb + 11].copy_from_slice(b"MSWIN4.1");
    put_u16(&mut data, bpb + 11, 512);
    data[bpb + 13] = 8;
    put_u16(&mut data, bpb + 14, 32);
    data[bpb + 16] = 2;
    data[bpb + 21] = 0xF8;
    put_u32(&mut data, bpb + 32, PARTITION_LENGTH);
    put_u32(&mut data, bpb + 36, FAT_SIZE);
    put_u32(&mut data, bpb + 44, 2);
    data[bpb + 66] = 0x29;
    put_u16(&mut data, bpb + 510, 0xAA55);

    // FAT : entrées réservées et racine
    for copy in 0..2 {
        let fat = (FAT_START + copy * FAT_SIZE) as usize * SECTOR_SIZE;
        put_u32(&mut data, fat, 0x0FFF_FFF8);
        put_u32(&mut data, fat + 4, 0xFFFF_FFFF);
        put_u32(&mut data, fat + 8, 0x0FFF_FFFF);
    }

    data
}

/// Valeur de l'entrée FAT d'un cluster dans la copie `copy`
pub fn fat_entry(disk: &MemDisk, copy: u32, cluster: u32) -> u32 {
    let offset = (FAT_START + copy * FAT_SIZE) as usize * SECTOR_SIZE + cluster as usize * 4;
    u32::from_le_bytes(disk.data[offset..offset + 4].try_into().unwrap())
}

/// Entrée brute `index` du premier secteur de la racine
pub fn root_entry(disk: &MemDisk, index: usize) -> [u8; 32] {
    let offset = index * 32;
    disk.sector(ROOT_SECTOR)[offset..offset + 32].try_into().unwrap()
}

/// Rappeler une étape jusqu'au résultat, en comptant les appels
pub fn drive_counted<T>(mut step: impl FnMut() -> Poll<Result<T>>) -> (Result<T>, usize) {
    for polls in 1..=10_000 {
        if let Poll::Ready(result) = step() {
            return (result, polls);
        }
    }
    panic!("l'opération ne termine pas");
}

pub fn drive<T>(step: impl FnMut() -> Poll<Result<T>>) -> Result<T> {
    drive_counted(step).0
}

/// Moteur monté sur l'image de test
pub fn mounted(latency: u32) -> Fat32FileSystem<MemDisk> {
    mounted_with(MemDisk::new(build_image(), latency), Config::default())
}

pub fn mounted_with(disk: MemDisk, config: Config) -> Fat32FileSystem<MemDisk> {
    let mut fs = Fat32FileSystem::new(vec![disk], config).unwrap();
    drive(|| fs.mount(0)).unwrap();
    fs
}

pub fn disk(fs: &Fat32FileSystem<MemDisk>) -> &MemDisk {
    fs.device(0).unwrap()
}
