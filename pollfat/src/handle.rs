//! Table des descripteurs de fichiers

use alloc::vec;
use alloc::vec::Vec;

use crate::boot_sector::PartitionGeometry;
use crate::directory::{DirectoryEntry, ShortName};
use crate::{Fat32Error, Result, SECTOR_SIZE};

/// Identifiant d'un fichier ouvert.
///
/// Ni `Clone` ni `Copy` : `close` le consomme, l'appelant ne garde
/// aucune référence vers un emplacement libéré.
#[derive(Debug, PartialEq, Eq)]
pub struct FileId(u8);

impl FileId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Plage de secteurs touchée par un transfert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub first_sector: u32,
    pub count: u32,
    /// Offset du premier octet dans le premier secteur
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn bytes(&self) -> usize {
        self.count as usize * SECTOR_SIZE
    }

    pub fn last_sector(&self) -> u32 {
        self.first_sector + self.count - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteStep {
    ReadFirstSector,
    ReadLastSector,
    WriteData,
    ReadDirectory,
    WriteDirectory,
}

/// Transfert en cours sur un descripteur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transfer {
    Idle,
    Read(Span),
    Write { span: Span, step: WriteStep },
}

/// État d'un fichier ouvert
#[derive(Debug)]
pub struct FileHandle {
    in_use: bool,
    disk: u8,
    partition: u8,
    name: ShortName,
    entry_index: u32,
    first_cluster: u32,
    current_cluster: u32,
    previous_cluster: u32,
    first_sector: u32,
    current_sector: u32,
    previous_sector: u32,
    cursor: u32,
    logical_size: u32,
    physical_size: u32,
    pub(crate) buffer: Vec<u8>,
    pub(crate) transfer: Transfer,
}

impl FileHandle {
    fn new(buffer_sectors: usize) -> Self {
        Self {
            in_use: false,
            disk: 0,
            partition: 0,
            name: ShortName::default(),
            entry_index: 0,
            first_cluster: 0,
            current_cluster: 0,
            previous_cluster: 0,
            first_sector: 0,
            current_sector: 0,
            previous_sector: 0,
            cursor: 0,
            logical_size: 0,
            physical_size: 0,
            buffer: vec![0; buffer_sectors * SECTOR_SIZE],
            transfer: Transfer::Idle,
        }
    }

    /// Remplir le descripteur à partir de l'entrée de répertoire.
    pub(crate) fn attach(
        &mut self,
        entry_index: usize,
        entry: &DirectoryEntry,
        geometry: &PartitionGeometry,
    ) -> Result<()> {
        let cluster = entry.first_cluster();
        // Fichier vide sans cluster : lisible, aucune écriture possible
        let (sector, physical) = if cluster == 0 && entry.file_size() == 0 {
            (0, 0)
        } else {
            (geometry.cluster_sector(cluster)?, geometry.cluster_bytes())
        };

        // Une chaîne de plusieurs clusters n'est pas gérée
        if entry.file_size() > physical {
            return Err(Fat32Error::NotImplemented);
        }

        self.entry_index = entry_index as u32;
        self.first_cluster = cluster;
        self.current_cluster = cluster;
        self.previous_cluster = cluster;
        self.first_sector = sector;
        self.current_sector = sector;
        self.previous_sector = sector;
        self.cursor = 0;
        self.logical_size = entry.file_size();
        self.physical_size = physical;
        self.transfer = Transfer::Idle;
        Ok(())
    }

    pub fn disk(&self) -> u8 {
        self.disk
    }

    pub fn partition(&self) -> u8 {
        self.partition
    }

    pub fn name(&self) -> &ShortName {
        &self.name
    }

    /// Index de l'entrée dans le répertoire racine
    pub fn directory_entry_index(&self) -> u32 {
        self.entry_index
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    pub fn current_cluster(&self) -> u32 {
        self.current_cluster
    }

    pub fn previous_cluster(&self) -> u32 {
        self.previous_cluster
    }

    pub fn first_sector(&self) -> u32 {
        self.first_sector
    }

    pub fn current_sector(&self) -> u32 {
        self.current_sector
    }

    pub fn previous_sector(&self) -> u32 {
        self.previous_sector
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn logical_size(&self) -> u32 {
        self.logical_size
    }

    pub fn physical_size(&self) -> u32 {
        self.physical_size
    }

    /// Un transfert est en cours sur ce descripteur
    pub fn is_busy(&self) -> bool {
        self.transfer != Transfer::Idle
    }

    pub(crate) fn seek(&mut self, offset: u32) -> Result<()> {
        if offset >= self.logical_size {
            return Err(Fat32Error::OffsetOutOfRange);
        }
        self.cursor = offset;
        self.previous_sector = self.current_sector;
        self.current_sector = self.first_sector + offset / SECTOR_SIZE as u32;
        Ok(())
    }

    /// Plage à lire pour `requested` octets, bornée par la taille logique.
    pub(crate) fn read_span(&self, requested: usize) -> Result<Span> {
        if self.cursor >= self.logical_size {
            return Err(Fat32Error::EndOfFile);
        }
        let available = (self.logical_size - self.cursor) as usize;
        self.span(requested.min(available))
    }

    /// Plage à écrire. Atteindre la fin du cluster est refusé (`>=`).
    pub(crate) fn write_span(&self, len: usize) -> Result<Span> {
        let end = self.cursor as u64 + len as u64;
        if end >= self.physical_size as u64 {
            return Err(Fat32Error::CapacityExceeded);
        }
        self.span(len)
    }

    fn span(&self, len: usize) -> Result<Span> {
        let cursor = self.cursor as usize;
        let first = cursor / SECTOR_SIZE;
        let last = (cursor + len - 1) / SECTOR_SIZE;
        let count = last - first + 1;
        if count * SECTOR_SIZE > self.buffer.len() {
            return Err(Fat32Error::BufferTooSmall);
        }
        Ok(Span {
            first_sector: self.first_sector + first as u32,
            count: count as u32,
            offset: cursor % SECTOR_SIZE,
            len,
        })
    }

    /// Vrai si l'écriture de `span` agrandit le fichier
    pub(crate) fn extends(&self, span: &Span) -> bool {
        self.cursor as usize + span.len > self.logical_size as usize
    }

    /// Avancer le curseur après un transfert terminé
    pub(crate) fn advance(&mut self, span: &Span) {
        self.cursor += span.len as u32;
        if self.cursor > self.logical_size {
            self.logical_size = self.cursor;
        }
        self.previous_sector = self.current_sector;
        self.current_sector = span.last_sector();
        self.previous_cluster = self.current_cluster;
        self.current_cluster = self.first_cluster;
        self.transfer = Transfer::Idle;
    }
}

/// Pool fixe de descripteurs, partagé par tous les disques
#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<FileHandle>,
}

impl HandleTable {
    pub fn new(count: usize, buffer_sectors: usize) -> Self {
        Self {
            slots: (0..count).map(|_| FileHandle::new(buffer_sectors)).collect(),
        }
    }

    /// Réserver un emplacement libre
    pub(crate) fn allocate(&mut self, disk: u8, partition: u8, name: ShortName) -> Result<usize> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.in_use)
            .ok_or(Fat32Error::NoFreeHandle)?;

        slot.in_use = true;
        slot.disk = disk;
        slot.partition = partition;
        slot.name = name;
        slot.transfer = Transfer::Idle;
        Ok(index)
    }

    pub(crate) fn release(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.in_use = false;
            slot.transfer = Transfer::Idle;
        }
    }

    /// Remettre au repos le transfert d'un emplacement
    pub(crate) fn cancel(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.transfer = Transfer::Idle;
        }
    }

    pub(crate) fn id(&self, index: usize) -> FileId {
        FileId(index as u8)
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Result<&mut FileHandle> {
        self.slots.get_mut(index).ok_or(Fat32Error::InvalidHandle)
    }

    pub fn get(&self, file: &FileId) -> Result<&FileHandle> {
        self.slots
            .get(file.index())
            .filter(|slot| slot.in_use)
            .ok_or(Fat32Error::InvalidHandle)
    }

    pub(crate) fn get_mut(&mut self, file: &FileId) -> Result<&mut FileHandle> {
        self.slots
            .get_mut(file.index())
            .filter(|slot| slot.in_use)
            .ok_or(Fat32Error::InvalidHandle)
    }

    /// Nombre de descripteurs ouverts
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
