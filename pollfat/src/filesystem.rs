// filesystem : contexte des disques, montage et opérations sans E/S

use alloc::vec::Vec;
use core::mem;
use core::task::{Poll, ready};

use crate::boot_sector::{BootSector, PartitionGeometry};
use crate::config::Config;
use crate::directory::{DirectoryEntry, ENTRIES_PER_SECTOR, RootDirectory, ShortName};
use crate::fat_table::{FatProgress, FatTable};
use crate::handle::{FileHandle, FileId, HandleTable, Transfer};
use crate::mbr::{MasterBootRecord, PartitionRecord};
use crate::{BlockDevice, Fat32Error, Result, SECTOR_SIZE};

/// Étapes du montage d'un disque
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MountStep {
    InitHardware,
    ConfigureDevice,
    ReadBootRecord,
    ReadGeometry { partition: usize, usable: usize },
    Ready,
}

/// Étapes de la création d'un fichier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CreateStep {
    CheckExists,
    FindFreeCluster,
    FindFreeEntry { cluster: u32 },
    AllocateCluster { cluster: u32, entry: usize, copy: u8 },
    WriteEntry { cluster: u32, entry: usize },
}

/// Opération en cours sur un disque (un seul emplacement par disque)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiskTask {
    Idle,
    Open {
        partition: u8,
        name: ShortName,
        slot: usize,
    },
    Create {
        partition: u8,
        name: ShortName,
        slot: usize,
        step: CreateStep,
    },
    /// Écriture qui agrandit un fichier, jusqu'à la mise à jour du
    /// répertoire
    Extend { slot: usize },
}

/// Appelant propriétaire de la requête en cours sur un périphérique
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Requester {
    /// Montage, open ou create
    Disk,
    Handle(usize),
}

/// Périphérique d'un disque. Retient si la dernière requête est restée
/// en cours.
pub(crate) struct Port<D> {
    inner: D,
    outstanding: bool,
}

impl<D> Port<D> {
    fn track(&mut self, poll: Poll<Result<()>>) -> Poll<Result<()>> {
        self.outstanding = poll.is_pending();
        poll
    }
}

impl<D: BlockDevice> BlockDevice for Port<D> {
    fn hardware_init(&mut self) -> Poll<Result<()>> {
        let poll = self.inner.hardware_init();
        self.track(poll)
    }

    fn configure(&mut self) -> Poll<Result<()>> {
        let poll = self.inner.configure();
        self.track(poll)
    }

    fn read_sectors(&mut self, start: u32, buffer: &mut [u8]) -> Poll<Result<()>> {
        let poll = self.inner.read_sectors(start, buffer);
        self.track(poll)
    }

    fn write_sectors(&mut self, start: u32, buffer: &[u8]) -> Poll<Result<()>> {
        let poll = self.inner.write_sectors(start, buffer);
        self.track(poll)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PartitionSlot {
    pub record: PartitionRecord,
    pub geometry: Option<PartitionGeometry>,
}

/// Contexte d'un disque
pub(crate) struct Disk<D: BlockDevice> {
    pub device: Port<D>,
    /// Propriétaire de la requête en cours, une seule à la fois
    owner: Option<Requester>,
    initialized: bool,
    pub partitions: Vec<PartitionSlot>,
    /// Buffer des transferts du disque (MBR, BPB, FAT, répertoire)
    pub sector: [u8; SECTOR_SIZE],
    /// Dernier secteur du répertoire racine lu
    pub root_cache: [DirectoryEntry; ENTRIES_PER_SECTOR],
    mount: MountStep,
    pub task: DiskTask,
    pub fat: FatProgress,
}

impl<D: BlockDevice> Disk<D> {
    fn new(device: D, partitions: usize) -> Self {
        Self {
            device: Port {
                inner: device,
                outstanding: false,
            },
            owner: None,
            initialized: false,
            partitions: (0..partitions).map(|_| PartitionSlot::default()).collect(),
            sector: [0; SECTOR_SIZE],
            root_cache: [DirectoryEntry::default(); ENTRIES_PER_SECTOR],
            mount: MountStep::InitHardware,
            task: DiskTask::Idle,
            fat: FatProgress::default(),
        }
    }

    /// Refuser `who` tant qu'un autre appelant attend la fin de sa requête
    pub fn claim(&mut self, who: Requester) -> Result<()> {
        match self.owner {
            Some(owner) if owner != who => Err(Fat32Error::Busy),
            _ => {
                self.device.outstanding = false;
                Ok(())
            }
        }
    }

    /// Noter qui attend encore la fin d'une requête après cet appel
    pub fn settle<T>(&mut self, who: Requester, poll: Poll<T>) -> Poll<T> {
        self.owner = self.device.outstanding.then_some(who);
        poll
    }

    /// Oublier la requête et l'écriture en cours d'un descripteur
    pub fn forget(&mut self, slot: usize) {
        if self.owner == Some(Requester::Handle(slot)) {
            self.owner = None;
        }
        if self.task == (DiskTask::Extend { slot }) {
            self.task = DiskTask::Idle;
        }
    }

    /// Géométrie d'une partition montée
    pub fn geometry(&self, partition: u8) -> Result<&PartitionGeometry> {
        if !self.initialized {
            return Err(Fat32Error::NotMounted);
        }
        self.partitions
            .get(partition as usize)
            .ok_or(Fat32Error::InvalidPartition)?
            .geometry
            .as_ref()
            .ok_or(Fat32Error::InvalidFileSystem)
    }

    pub fn root_directory(&mut self, partition: u8) -> Result<RootDirectory<'_, Port<D>>> {
        self.geometry(partition)?;
        let geometry = self.partitions[partition as usize]
            .geometry
            .as_ref()
            .ok_or(Fat32Error::InvalidFileSystem)?;
        Ok(RootDirectory::new(
            &mut self.device,
            geometry,
            &mut self.sector,
            &mut self.root_cache,
        ))
    }

    pub fn fat_table(&mut self, partition: u8) -> Result<FatTable<'_, Port<D>>> {
        self.geometry(partition)?;
        let geometry = self.partitions[partition as usize]
            .geometry
            .as_ref()
            .ok_or(Fat32Error::InvalidFileSystem)?;
        Ok(FatTable::new(
            &mut self.device,
            geometry,
            &mut self.sector,
            &mut self.fat,
        ))
    }

    fn poll_mount(&mut self, id: u8, config: &Config) -> Poll<Result<()>> {
        loop {
            match self.mount {
                MountStep::Ready => {
                    log::debug!("disque {}: remontage", id);
                    self.initialized = false;
                    self.partitions.fill(PartitionSlot::default());
                    self.mount = MountStep::ConfigureDevice;
                }
                MountStep::InitHardware => {
                    ready!(self.device.hardware_init())?;
                    self.mount = MountStep::ConfigureDevice;
                    return Poll::Pending;
                }
                MountStep::ConfigureDevice => {
                    ready!(self.device.configure())?;
                    self.mount = MountStep::ReadBootRecord;
                    return Poll::Pending;
                }
                MountStep::ReadBootRecord => {
                    let slots = self.partitions.len();
                    let result = ready!(self.device.read_sectors(0, &mut self.sector[..]))
                        .and_then(|()| MasterBootRecord::decode(&self.sector[..], slots));
                    match result {
                        Ok(mbr) => {
                            for (slot, record) in self.partitions.iter_mut().zip(mbr.partitions) {
                                *slot = PartitionSlot {
                                    record,
                                    geometry: None,
                                };
                            }
                            self.mount = MountStep::ReadGeometry {
                                partition: 0,
                                usable: 0,
                            };
                            return Poll::Pending;
                        }
                        Err(e) => {
                            log::warn!("disque {}: secteur 0 refusé: {}", id, e);
                            self.mount = MountStep::ConfigureDevice;
                            return Poll::Ready(Err(e));
                        }
                    }
                }
                MountStep::ReadGeometry { partition, usable } => {
                    if partition >= self.partitions.len() {
                        return self.finish_mount(id, usable);
                    }

                    let record = self.partitions[partition].record;
                    if record.kind != config.partition_type() {
                        log::debug!(
                            "disque {}: partition {} ignorée ({:?})",
                            id,
                            partition,
                            record.kind
                        );
                        self.mount = MountStep::ReadGeometry {
                            partition: partition + 1,
                            usable,
                        };
                        continue;
                    }

                    let read = ready!(self
                        .device
                        .read_sectors(record.start_lba, &mut self.sector[..]));
                    if let Err(e) = read {
                        log::warn!("disque {}: lecture du BPB impossible: {}", id, e);
                        self.mount = MountStep::ConfigureDevice;
                        return Poll::Ready(Err(e));
                    }

                    let geometry = BootSector::decode(&self.sector[..])
                        .and_then(|bpb| PartitionGeometry::resolve(&record, &bpb));
                    let usable = match geometry {
                        Ok(geometry) => {
                            log::debug!(
                                "disque {}: partition {} fat={} data={} root={}",
                                id,
                                partition,
                                geometry.fat_start_sector,
                                geometry.data_start_sector,
                                geometry.root_sector
                            );
                            self.partitions[partition].geometry = Some(geometry);
                            usable + 1
                        }
                        Err(e) => {
                            log::warn!("disque {}: partition {} inutilisable: {}", id, partition, e);
                            usable
                        }
                    };
                    self.mount = MountStep::ReadGeometry {
                        partition: partition + 1,
                        usable,
                    };
                    return Poll::Pending;
                }
            }
        }
    }

    fn finish_mount(&mut self, id: u8, usable: usize) -> Poll<Result<()>> {
        if usable == 0 {
            log::warn!("disque {}: aucune partition FAT32 utilisable", id);
            self.mount = MountStep::ConfigureDevice;
            return Poll::Ready(Err(Fat32Error::InvalidFileSystem));
        }
        log::info!("disque {}: monté, {} partition(s) FAT32", id, usable);
        self.initialized = true;
        self.mount = MountStep::Ready;
        Poll::Ready(Ok(()))
    }
}

/// Moteur FAT32 : contextes des disques et pool de descripteurs
pub struct Fat32FileSystem<D: BlockDevice> {
    pub(crate) disks: Vec<Disk<D>>,
    pub(crate) handles: HandleTable,
    config: Config,
}

impl<D: BlockDevice> Fat32FileSystem<D> {
    /// Un contexte par périphérique, le disque `n` est `devices[n]`.
    pub fn new(devices: Vec<D>, config: Config) -> Result<Self> {
        config.validate()?;
        if devices.is_empty() || devices.len() > u8::MAX as usize {
            return Err(Fat32Error::ParameterValue);
        }

        let disks = devices
            .into_iter()
            .map(|device| Disk::new(device, config.partitions()))
            .collect();

        Ok(Self {
            disks,
            handles: HandleTable::new(config.max_files(), config.buffer_sectors()),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn disk_mut(&mut self, disk: u8) -> Result<&mut Disk<D>> {
        self.disks
            .get_mut(disk as usize)
            .ok_or(Fat32Error::InvalidDisk)
    }

    fn disk(&self, disk: u8) -> Result<&Disk<D>> {
        self.disks.get(disk as usize).ok_or(Fat32Error::InvalidDisk)
    }

    /// Monter un disque, à rappeler jusqu'à `Poll::Ready`.
    ///
    /// Rappeler `mount` sur un disque déjà monté relance le montage
    /// depuis la configuration du périphérique.
    pub fn mount(&mut self, disk: u8) -> Poll<Result<()>> {
        let config = self.config;
        let drive = self.disk_mut(disk)?;
        drive.claim(Requester::Disk)?;
        if drive.task != DiskTask::Idle {
            return Poll::Ready(Err(Fat32Error::Busy));
        }
        let poll = drive.poll_mount(disk, &config);
        drive.settle(Requester::Disk, poll)
    }

    pub fn is_mounted(&self, disk: u8) -> bool {
        self.disk(disk).map(|drive| drive.initialized).unwrap_or(false)
    }

    /// Géométrie d'une partition montée
    pub fn partition(&self, disk: u8, partition: u8) -> Result<&PartitionGeometry> {
        self.disk(disk)?.geometry(partition)
    }

    /// Entrée de la table des partitions lue au montage
    pub fn partition_record(&self, disk: u8, partition: u8) -> Result<PartitionRecord> {
        self.disk(disk)?
            .partitions
            .get(partition as usize)
            .map(|slot| slot.record)
            .ok_or(Fat32Error::InvalidPartition)
    }

    pub fn file(&self, file: &FileId) -> Result<&FileHandle> {
        self.handles.get(file)
    }

    /// Nombre de fichiers ouverts, tous disques confondus
    pub fn open_files(&self) -> usize {
        self.handles.in_use()
    }

    /// Déplacer le curseur, sans accès disque.
    pub fn seek(&mut self, file: &FileId, offset: u32) -> Result<()> {
        let handle = self.handles.get_mut(file)?;
        if handle.is_busy() {
            return Err(Fat32Error::Busy);
        }
        handle.seek(offset)
    }

    /// Libérer le descripteur. Rien n'est écrit : `write` a déjà tout
    /// rendu persistant. Un transfert inachevé est abandonné comme avec
    /// `reset_transfer`.
    pub fn close(&mut self, file: FileId) -> Result<()> {
        self.reset_transfer(&file)?;
        self.handles.release(file.index());
        Ok(())
    }

    /// Abandonner l'opération en cours sur un disque.
    ///
    /// Le descripteur réservé par un `open`/`create` inachevé est libéré,
    /// le transfert du descripteur qui occupait le disque est remis au
    /// repos. Une requête restée en cours dans le transport n'est pas
    /// annulée : c'est au périphérique de l'oublier (`device_mut`).
    pub fn abort(&mut self, disk: u8) -> Result<()> {
        let drive = self
            .disks
            .get_mut(disk as usize)
            .ok_or(Fat32Error::InvalidDisk)?;

        match mem::replace(&mut drive.task, DiskTask::Idle) {
            DiskTask::Open { slot, .. } | DiskTask::Create { slot, .. } => {
                log::debug!("disque {}: opération abandonnée", disk);
                self.handles.release(slot);
            }
            DiskTask::Extend { slot } => {
                log::debug!("disque {}: écriture du descripteur {} abandonnée", disk, slot);
                self.handles.cancel(slot);
            }
            DiskTask::Idle => {}
        }
        if let Some(Requester::Handle(slot)) = mem::take(&mut drive.owner) {
            self.handles.cancel(slot);
        }
        drive.fat.reset();
        if matches!(
            drive.mount,
            MountStep::ReadBootRecord | MountStep::ReadGeometry { .. }
        ) {
            drive.mount = MountStep::ConfigureDevice;
        }
        Ok(())
    }

    /// Abandonner le transfert en cours sur un fichier ; curseur et
    /// taille restent ceux du dernier transfert terminé.
    pub fn reset_transfer(&mut self, file: &FileId) -> Result<()> {
        let handle = self.handles.get_mut(file)?;
        handle.transfer = Transfer::Idle;
        let disk = handle.disk();
        if let Some(drive) = self.disks.get_mut(disk as usize) {
            drive.forget(file.index());
        }
        Ok(())
    }

    pub fn device(&self, disk: u8) -> Option<&D> {
        self.disks.get(disk as usize).map(|drive| &drive.device.inner)
    }

    pub fn device_mut(&mut self, disk: u8) -> Option<&mut D> {
        self.disks
            .get_mut(disk as usize)
            .map(|drive| &mut drive.device.inner)
    }

    /// Rendre les périphériques
    pub fn into_devices(self) -> Vec<D> {
        self.disks
            .into_iter()
            .map(|drive| drive.device.inner)
            .collect()
    }
}
