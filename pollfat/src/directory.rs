//! Gestion des entrées de répertoire

use alloc::string::{String, ToString};
use core::fmt;
use core::task::{Poll, ready};

use crate::boot_sector::PartitionGeometry;
use crate::le::{read_u16, read_u32, write_u16, write_u32};
use crate::{BlockDevice, Fat32Error, Result, SECTOR_SIZE};

/// Entrées de 32 octets par secteur
pub const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DirectoryEntry::SIZE;

/// Premier octet du nom : fin du répertoire
pub const END_MARKER: u8 = 0x00;
/// Premier octet du nom : entrée supprimée, réutilisable
pub const FREE_MARKER: u8 = 0xE5;

// Caractères interdits dans un nom court
const FORBIDDEN: &[u8] = b"\"*+,/:;<=>?[\\]|";

bitflags::bitflags! {
    /// Attributs d'un fichier/dossier
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        const LONG_NAME = 0x0F;
    }
}

impl FileAttributes {
    pub fn is_directory(&self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    pub fn is_long_name(&self) -> bool {
        self.contains(Self::LONG_NAME)
    }

    pub fn is_volume_id(&self) -> bool {
        self.contains(Self::VOLUME_ID)
    }
}

/// Entrée de répertoire (32 octets)
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: [u8; 8],
    pub extension: [u8; 3],
    pub attributes: FileAttributes,
    pub nt_reserved: u8,
    pub creation_time_tenth: u8,
    pub creation_time: u16,
    pub creation_date: u16,
    pub last_access_date: u16,
    pub first_cluster_high: u16,
    pub write_time: u16,
    pub write_date: u16,
    pub first_cluster_low: u16,
    pub file_size: u32,
}

impl DirectoryEntry {
    pub const SIZE: usize = 32;

    /// Lire une entrée depuis des données brutes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Fat32Error::BufferTooSmall);
        }

        let mut name = [0u8; 8];
        let mut extension = [0u8; 3];
        name.copy_from_slice(&data[0..8]);
        extension.copy_from_slice(&data[8..11]);

        Ok(Self {
            name,
            extension,
            attributes: FileAttributes::from_bits_retain(data[11]),
            nt_reserved: data[12],
            creation_time_tenth: data[13],
            creation_time: read_u16(data, 14),
            creation_date: read_u16(data, 16),
            last_access_date: read_u16(data, 18),
            first_cluster_high: read_u16(data, 20),
            write_time: read_u16(data, 22),
            write_date: read_u16(data, 24),
            first_cluster_low: read_u16(data, 26),
            file_size: read_u32(data, 28),
        })
    }

    /// Écrire l'entrée au format disque
    pub fn encode(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < Self::SIZE {
            return Err(Fat32Error::BufferTooSmall);
        }

        out[0..8].copy_from_slice(&self.name);
        out[8..11].copy_from_slice(&self.extension);
        out[11] = self.attributes.bits();
        out[12] = self.nt_reserved;
        out[13] = self.creation_time_tenth;
        write_u16(out, 14, self.creation_time);
        write_u16(out, 16, self.creation_date);
        write_u16(out, 18, self.last_access_date);
        write_u16(out, 20, self.first_cluster_high);
        write_u16(out, 22, self.write_time);
        write_u16(out, 24, self.write_date);
        write_u16(out, 26, self.first_cluster_low);
        write_u32(out, 28, self.file_size);
        Ok(())
    }

    /// Nouvelle entrée de fichier vide, taille zéro
    pub fn new_file(name: &ShortName, cluster: u32) -> Self {
        let mut entry = Self {
            name: name.name,
            extension: name.extension,
            attributes: FileAttributes::ARCHIVE,
            ..Self::default()
        };
        entry.set_first_cluster(cluster);
        entry
    }

    pub fn is_free(&self) -> bool {
        self.name[0] == FREE_MARKER
    }

    pub fn is_end(&self) -> bool {
        self.name[0] == END_MARKER
    }

    pub fn is_valid(&self) -> bool {
        !self.is_free() && !self.is_end()
    }

    /// Fichier ordinaire : ni dossier, ni étiquette de volume, ni LFN
    pub fn is_file(&self) -> bool {
        let attrs = self.attributes;
        !attrs.is_long_name() && !attrs.is_directory() && !attrs.is_volume_id()
    }

    /// premier cluster
    pub fn first_cluster(&self) -> u32 {
        ((self.first_cluster_high as u32) << 16) | (self.first_cluster_low as u32)
    }

    pub fn set_first_cluster(&mut self, cluster: u32) {
        self.first_cluster_high = (cluster >> 16) as u16;
        self.first_cluster_low = cluster as u16;
    }

    /// Taille du fichier
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    /// Convertir le nom en String lisible
    pub fn short_name(&self) -> String {
        ShortName {
            name: self.name,
            extension: self.extension,
        }
        .to_string()
    }
}

impl fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("name", &self.short_name())
            .field("attributes", &self.attributes)
            .field("cluster", &self.first_cluster())
            .field("size", &self.file_size)
            .finish()
    }
}

/// Nom court 8.3, complété par des espaces et en majuscules
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct ShortName {
    name: [u8; 8],
    extension: [u8; 3],
}

impl ShortName {
    /// Valider et convertir un nom du type `LOG.TXT`.
    pub fn parse(input: &str) -> Result<Self> {
        let bytes = input.as_bytes();
        if bytes
            .iter()
            .any(|b| FORBIDDEN.contains(b) || !b.is_ascii_graphic())
        {
            return Err(Fat32Error::InvalidName);
        }

        let (base, ext) = input.split_once('.').unwrap_or((input, ""));
        if base.is_empty() || ext.contains('.') {
            return Err(Fat32Error::InvalidName);
        }
        if base.len() > 8 {
            return Err(Fat32Error::NameTooLong);
        }
        if ext.len() > 3 {
            return Err(Fat32Error::ExtensionTooLong);
        }

        let mut name = [b' '; 8];
        let mut extension = [b' '; 3];
        name[..base.len()].copy_from_slice(base.as_bytes());
        extension[..ext.len()].copy_from_slice(ext.as_bytes());
        name.make_ascii_uppercase();
        extension.make_ascii_uppercase();

        Ok(Self { name, extension })
    }

    pub fn name(&self) -> &[u8; 8] {
        &self.name
    }

    pub fn extension(&self) -> &[u8; 3] {
        &self.extension
    }

    pub fn matches(&self, entry: &DirectoryEntry) -> bool {
        entry.name == self.name && entry.extension == self.extension
    }
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let trim = |bytes: &[u8]| {
            let end = bytes.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        };
        let name = trim(&self.name);
        let ext = trim(&self.extension);
        if ext.is_empty() {
            write!(f, "{}", name)
        } else {
            write!(f, "{}.{}", name, ext)
        }
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ShortName({})", self)
    }
}

/// Résultat d'une recherche dans le secteur du répertoire racine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found(usize),
    /// Marqueur de fin rencontré avant le nom
    Missing,
    /// Ni le nom ni la fin dans ce secteur
    Exhausted,
}

/// Accès au secteur 0 du répertoire racine d'une partition.
///
/// Le secteur transite par `sector`, les entrées décodées restent dans
/// `entries` (le cache du disque).
pub struct RootDirectory<'a, D: BlockDevice> {
    device: &'a mut D,
    geometry: &'a PartitionGeometry,
    sector: &'a mut [u8; SECTOR_SIZE],
    entries: &'a mut [DirectoryEntry; ENTRIES_PER_SECTOR],
}

impl<'a, D: BlockDevice> RootDirectory<'a, D> {
    pub fn new(
        device: &'a mut D,
        geometry: &'a PartitionGeometry,
        sector: &'a mut [u8; SECTOR_SIZE],
        entries: &'a mut [DirectoryEntry; ENTRIES_PER_SECTOR],
    ) -> Self {
        Self {
            device,
            geometry,
            sector,
            entries,
        }
    }

    /// Charger un secteur du répertoire racine dans le cache.
    ///
    /// Seul le premier secteur est géré.
    pub fn read_sector(&mut self, index: u32) -> Poll<Result<()>> {
        if index != 0 {
            return Poll::Ready(Err(Fat32Error::NotImplemented));
        }

        ready!(self
            .device
            .read_sectors(self.geometry.root_sector, &mut self.sector[..]))?;

        for (entry, raw) in self
            .entries
            .iter_mut()
            .zip(self.sector.chunks_exact(DirectoryEntry::SIZE))
        {
            *entry = DirectoryEntry::decode(raw)?;
        }
        Poll::Ready(Ok(()))
    }

    /// Réécrire le cache sur le disque
    pub fn write_sector(&mut self, index: u32) -> Poll<Result<()>> {
        if index != 0 {
            return Poll::Ready(Err(Fat32Error::NotImplemented));
        }

        // réencodé à chaque appel, le contenu ne change pas pendant le transfert
        for (entry, raw) in self
            .entries
            .iter()
            .zip(self.sector.chunks_exact_mut(DirectoryEntry::SIZE))
        {
            entry.encode(raw)?;
        }

        self.device
            .write_sectors(self.geometry.root_sector, &self.sector[..])
    }

    pub fn lookup(&self, name: &ShortName) -> Lookup {
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.is_end() {
                return Lookup::Missing;
            }
            if entry.is_valid() && name.matches(entry) {
                return Lookup::Found(i);
            }
        }
        Lookup::Exhausted
    }

    pub fn find_free_entry(&self) -> Result<usize> {
        self.entries
            .iter()
            .position(|entry| !entry.is_valid())
            .ok_or(Fat32Error::NoFreeEntry)
    }

    pub fn entry(&self, index: usize) -> Option<&DirectoryEntry> {
        self.entries.get(index)
    }

    pub fn set_entry(&mut self, index: usize, entry: DirectoryEntry) -> Result<()> {
        let slot = self
            .entries
            .get_mut(index)
            .ok_or(Fat32Error::ParameterValue)?;
        *slot = entry;
        Ok(())
    }
}

/// Mettre à jour le champ taille d'une entrée dans un secteur brut
pub(crate) fn update_entry_size(sector: &mut [u8], index: usize, size: u32) -> Result<()> {
    let start = index * DirectoryEntry::SIZE;
    let raw = sector
        .get_mut(start..start + DirectoryEntry::SIZE)
        .ok_or(Fat32Error::ParameterValue)?;
    let mut entry = DirectoryEntry::decode(raw)?;
    entry.file_size = size;
    entry.encode(raw)
}
