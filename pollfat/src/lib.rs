//! Moteur FAT32 minimal, piloté par scrutation (polling).
//!
//! Chaque opération publique (mount, open, create, read, write) est appelée
//! en boucle par l'application jusqu'à ce qu'elle retourne
//! `Poll::Ready(..)`. Un appel lance au plus un transfert sur le
//! périphérique puis rend la main.

#![no_std]
extern crate alloc;

pub mod error;
pub mod config;
pub mod mbr;
pub mod boot_sector;
pub mod directory;
pub mod fat_table;
pub mod handle;
pub mod filesystem;
mod le;
mod file_ops;

use alloc::boxed::Box;
use core::task::Poll;

pub use error::{Fat32Error, Result};
pub use config::Config;
pub use mbr::{MasterBootRecord, PartitionRecord, PartitionType};
pub use boot_sector::{BootSector, PartitionGeometry};
pub use directory::{DirectoryEntry, FileAttributes, ShortName};
pub use fat_table::FatTable;
pub use handle::{FileHandle, FileId};
pub use filesystem::Fat32FileSystem;

/// Taille d'un secteur, fixe pour ce moteur.
pub const SECTOR_SIZE: usize = 512;

/// Transport bloc d'un disque.
///
/// Toutes les méthodes suivent la convention de scrutation :
/// `Poll::Pending` tant que le transfert est en cours, puis
/// `Poll::Ready(Ok(()))` ou `Poll::Ready(Err(..))`. Un transfert en cours
/// est toujours rappelé avec le même secteur et le même buffer jusqu'à
/// sa fin, aucune autre requête n'est émise entre-temps. La longueur du
/// buffer est un multiple de `SECTOR_SIZE`.
pub trait BlockDevice {
    fn hardware_init(&mut self) -> Poll<Result<()>>;
    fn configure(&mut self) -> Poll<Result<()>>;
    fn read_sectors(&mut self, start: u32, buffer: &mut [u8]) -> Poll<Result<()>>;
    fn write_sectors(&mut self, start: u32, buffer: &[u8]) -> Poll<Result<()>>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    fn hardware_init(&mut self) -> Poll<Result<()>> {
        (**self).hardware_init()
    }

    fn configure(&mut self) -> Poll<Result<()>> {
        (**self).configure()
    }

    fn read_sectors(&mut self, start: u32, buffer: &mut [u8]) -> Poll<Result<()>> {
        (**self).read_sectors(start, buffer)
    }

    fn write_sectors(&mut self, start: u32, buffer: &[u8]) -> Poll<Result<()>> {
        (**self).write_sectors(start, buffer)
    }
}

impl<D: BlockDevice + ?Sized> BlockDevice for Box<D> {
    fn hardware_init(&mut self) -> Poll<Result<()>> {
        (**self).hardware_init()
    }

    fn configure(&mut self) -> Poll<Result<()>> {
        (**self).configure()
    }

    fn read_sectors(&mut self, start: u32, buffer: &mut [u8]) -> Poll<Result<()>> {
        (**self).read_sectors(start, buffer)
    }

    fn write_sectors(&mut self, start: u32, buffer: &[u8]) -> Poll<Result<()>> {
        (**self).write_sectors(start, buffer)
    }
}
