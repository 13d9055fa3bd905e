//! Machines à états des opérations sur fichiers : open, create, read, write

use core::task::{Poll, ready};

use crate::directory::{DirectoryEntry, ENTRIES_PER_SECTOR, Lookup, ShortName, update_entry_size};
use crate::filesystem::{CreateStep, Disk, DiskTask, Requester};
use crate::handle::{FileHandle, FileId, Span, Transfer, WriteStep};
use crate::{BlockDevice, Fat32Error, Fat32FileSystem, Result, SECTOR_SIZE};

impl<D: BlockDevice> Fat32FileSystem<D> {
    /// Ouvrir un fichier existant du répertoire racine.
    ///
    /// À rappeler avec les mêmes arguments jusqu'à `Poll::Ready`. Un
    /// fichier vide sans cluster s'ouvre en lecture seule.
    pub fn open(&mut self, disk: u8, partition: u8, name: &str) -> Poll<Result<FileId>> {
        let name = ShortName::parse(name)?;
        let Self { disks, handles, .. } = self;
        let drive = disks.get_mut(disk as usize).ok_or(Fat32Error::InvalidDisk)?;
        drive.geometry(partition)?;
        drive.claim(Requester::Disk)?;

        let slot = match drive.task {
            DiskTask::Idle => {
                let slot = handles.allocate(disk, partition, name)?;
                drive.task = DiskTask::Open {
                    partition,
                    name,
                    slot,
                };
                slot
            }
            DiskTask::Open {
                partition: p,
                name: n,
                slot,
            } if p == partition && n == name => slot,
            _ => return Poll::Ready(Err(Fat32Error::Busy)),
        };

        let poll = lookup_entry(drive, partition, &name);
        let lookup = ready!(drive.settle(Requester::Disk, poll));
        drive.task = DiskTask::Idle;

        let attached = lookup
            .and_then(|lookup| match lookup {
                Lookup::Found(index) => Ok(index),
                Lookup::Missing => Err(Fat32Error::NotFound),
                Lookup::Exhausted => Err(Fat32Error::NotImplemented),
            })
            .and_then(|index| {
                let entry = drive.root_cache[index];
                if !entry.is_file() {
                    return Err(Fat32Error::NotAFile);
                }
                let geometry = drive.geometry(partition)?;
                handles.slot_mut(slot)?.attach(index, &entry, geometry)
            });

        match attached {
            Ok(()) => {
                log::debug!("open {}: descripteur {}", name, slot);
                Poll::Ready(Ok(handles.id(slot)))
            }
            Err(e) => {
                handles.release(slot);
                Poll::Ready(Err(e))
            }
        }
    }

    /// Créer un fichier vide dans le répertoire racine.
    ///
    /// Le cluster est marqué dans la FAT avant l'écriture de l'entrée de
    /// répertoire. Sans journal : un échec entre les deux laisse un
    /// cluster alloué sans entrée.
    pub fn create(&mut self, disk: u8, partition: u8, name: &str) -> Poll<Result<FileId>> {
        let name = ShortName::parse(name)?;
        let Self { disks, handles, .. } = self;
        let drive = disks.get_mut(disk as usize).ok_or(Fat32Error::InvalidDisk)?;
        drive.geometry(partition)?;
        drive.claim(Requester::Disk)?;

        let (slot, step) = match drive.task {
            DiskTask::Idle => {
                let slot = handles.allocate(disk, partition, name)?;
                let step = CreateStep::CheckExists;
                drive.task = DiskTask::Create {
                    partition,
                    name,
                    slot,
                    step,
                };
                (slot, step)
            }
            DiskTask::Create {
                partition: p,
                name: n,
                slot,
                step,
            } if p == partition && n == name => (slot, step),
            _ => return Poll::Ready(Err(Fat32Error::Busy)),
        };

        let poll = create_step(drive, partition, &name, step);
        let created = ready!(drive.settle(Requester::Disk, poll));
        drive.task = DiskTask::Idle;

        let attached = created.and_then(|index| {
            let entry = drive.root_cache[index];
            let geometry = drive.geometry(partition)?;
            handles.slot_mut(slot)?.attach(index, &entry, geometry)
        });

        match attached {
            Ok(()) => {
                log::debug!("create {}: descripteur {}", name, slot);
                Poll::Ready(Ok(handles.id(slot)))
            }
            Err(e) => {
                if e != Fat32Error::AlreadyExists {
                    log::warn!("create {}: échec: {}", name, e);
                }
                drive.fat.reset();
                handles.release(slot);
                Poll::Ready(Err(e))
            }
        }
    }

    /// Lire au plus `out.len()` octets à la position du curseur.
    ///
    /// Rend le nombre d'octets copiés ; un seul transfert multi-secteurs.
    pub fn read(&mut self, file: &FileId, out: &mut [u8]) -> Poll<Result<usize>> {
        let Self { disks, handles, .. } = self;
        let handle = handles.get_mut(file)?;
        let who = Requester::Handle(file.index());
        if handle.transfer == Transfer::Idle && out.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let drive = disks
            .get_mut(handle.disk() as usize)
            .ok_or(Fat32Error::InvalidDisk)?;
        drive.claim(who)?;

        let span = match handle.transfer {
            Transfer::Idle => {
                let span = handle.read_span(out.len())?;
                handle.transfer = Transfer::Read(span);
                span
            }
            Transfer::Read(span) => span,
            Transfer::Write { .. } => return Poll::Ready(Err(Fat32Error::Busy)),
        };

        let poll = drive
            .device
            .read_sectors(span.first_sector, &mut handle.buffer[..span.bytes()]);
        let read = ready!(drive.settle(who, poll));
        if let Err(e) = read {
            log::warn!("read {}: {}", handle.name(), e);
            handle.transfer = Transfer::Idle;
            return Poll::Ready(Err(e));
        }

        let len = span.len.min(out.len());
        out[..len].copy_from_slice(&handle.buffer[span.offset..span.offset + len]);
        handle.advance(&Span { len, ..span });
        Poll::Ready(Ok(len))
    }

    /// Écrire `data` à la position du curseur.
    ///
    /// Lecture du premier (et du dernier) secteur touché, écriture du
    /// bloc complet, puis mise à jour de la taille dans le répertoire si le
    /// fichier grandit. Curseur et taille n'avancent qu'à la fin ; un échec
    /// repart du premier secteur au prochain appel.
    pub fn write(&mut self, file: &FileId, data: &[u8]) -> Poll<Result<usize>> {
        let Self { disks, handles, .. } = self;
        let handle = handles.get_mut(file)?;
        let slot = file.index();
        let who = Requester::Handle(slot);
        if handle.transfer == Transfer::Idle && data.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let drive = disks
            .get_mut(handle.disk() as usize)
            .ok_or(Fat32Error::InvalidDisk)?;
        drive.claim(who)?;

        let (span, step) = match handle.transfer {
            Transfer::Idle => {
                let span = handle.write_span(data.len())?;
                // la taille dans le répertoire change : on prend l'emplacement
                // du disque jusqu'à la fin
                if handle.extends(&span) {
                    if drive.task != DiskTask::Idle {
                        return Poll::Ready(Err(Fat32Error::Busy));
                    }
                    drive.task = DiskTask::Extend { slot };
                }
                (span, WriteStep::ReadFirstSector)
            }
            Transfer::Write { span, step } if span.len == data.len() => (span, step),
            _ => return Poll::Ready(Err(Fat32Error::Busy)),
        };
        handle.transfer = Transfer::Write { span, step };

        let poll = write_step(drive, handle, span, step, data);
        let written = ready!(drive.settle(who, poll));
        drive.forget(slot);

        match written {
            Ok(()) => {
                handle.advance(&span);
                Poll::Ready(Ok(span.len))
            }
            Err(e) => {
                log::warn!("write {}: reprise depuis le début: {}", handle.name(), e);
                handle.transfer = Transfer::Idle;
                Poll::Ready(Err(e))
            }
        }
    }
}

/// Lire le secteur racine et y chercher `name`
fn lookup_entry<D: BlockDevice>(
    drive: &mut Disk<D>,
    partition: u8,
    name: &ShortName,
) -> Poll<Result<Lookup>> {
    let mut root = drive.root_directory(partition)?;
    ready!(root.read_sector(0))?;
    Poll::Ready(Ok(root.lookup(name)))
}

fn set_create_step<D: BlockDevice>(drive: &mut Disk<D>, next: CreateStep) {
    if let DiskTask::Create { step, .. } = &mut drive.task {
        *step = next;
    }
}

/// Une étape de la création ; rend l'index de la nouvelle entrée.
fn create_step<D: BlockDevice>(
    drive: &mut Disk<D>,
    partition: u8,
    name: &ShortName,
    mut step: CreateStep,
) -> Poll<Result<usize>> {
    loop {
        match step {
            CreateStep::CheckExists => {
                match ready!(lookup_entry(drive, partition, name))? {
                    Lookup::Found(_) => return Poll::Ready(Err(Fat32Error::AlreadyExists)),
                    Lookup::Exhausted => return Poll::Ready(Err(Fat32Error::NotImplemented)),
                    Lookup::Missing => {}
                }
                set_create_step(drive, CreateStep::FindFreeCluster);
                return Poll::Pending;
            }
            CreateStep::FindFreeCluster => {
                let cluster = ready!(drive.fat_table(partition)?.find_free_cluster(0))?;
                // pas d'E/S à l'étape suivante, on enchaîne
                step = CreateStep::FindFreeEntry { cluster };
                set_create_step(drive, step);
            }
            CreateStep::FindFreeEntry { cluster } => {
                let entry = drive.root_directory(partition)?.find_free_entry()?;
                set_create_step(
                    drive,
                    CreateStep::AllocateCluster {
                        cluster,
                        entry,
                        copy: 0,
                    },
                );
                return Poll::Pending;
            }
            CreateStep::AllocateCluster {
                cluster,
                entry,
                copy,
            } => {
                ready!(drive.fat_table(partition)?.allocate_cluster(copy, cluster))?;
                let copies = drive.geometry(partition)?.fat_copies;
                let next = if copy + 1 < copies {
                    CreateStep::AllocateCluster {
                        cluster,
                        entry,
                        copy: copy + 1,
                    }
                } else {
                    CreateStep::WriteEntry { cluster, entry }
                };
                set_create_step(drive, next);
                return Poll::Pending;
            }
            CreateStep::WriteEntry { cluster, entry } => {
                let mut root = drive.root_directory(partition)?;
                root.set_entry(entry, DirectoryEntry::new_file(name, cluster))?;
                ready!(root.write_sector(0))?;
                log::debug!("create {}: entrée {}, cluster {}", name, entry, cluster);
                return Poll::Ready(Ok(entry));
            }
        }
    }
}

/// Secteur du répertoire qui porte l'entrée du fichier
fn entry_sector<D: BlockDevice>(drive: &Disk<D>, handle: &FileHandle) -> Result<(u32, usize)> {
    let index = handle.directory_entry_index() as usize;
    if index >= ENTRIES_PER_SECTOR {
        return Err(Fat32Error::NotImplemented);
    }
    let geometry = drive.geometry(handle.partition())?;
    Ok((geometry.root_sector, index))
}

/// Une étape de l'écriture. Le buffer du descripteur sert aussi pour le
/// secteur du répertoire, le buffer du disque n'est pas touché.
fn write_step<D: BlockDevice>(
    drive: &mut Disk<D>,
    handle: &mut FileHandle,
    span: Span,
    step: WriteStep,
    data: &[u8],
) -> Poll<Result<()>> {
    let next = match step {
        WriteStep::ReadFirstSector => {
            ready!(drive
                .device
                .read_sectors(span.first_sector, &mut handle.buffer[..SECTOR_SIZE]))?;
            if span.count > 1 {
                WriteStep::ReadLastSector
            } else {
                WriteStep::WriteData
            }
        }
        WriteStep::ReadLastSector => {
            let last = span.bytes() - SECTOR_SIZE;
            ready!(drive
                .device
                .read_sectors(span.last_sector(), &mut handle.buffer[last..span.bytes()]))?;
            WriteStep::WriteData
        }
        WriteStep::WriteData => {
            handle.buffer[span.offset..span.offset + span.len].copy_from_slice(data);
            ready!(drive
                .device
                .write_sectors(span.first_sector, &handle.buffer[..span.bytes()]))?;
            if !handle.extends(&span) {
                return Poll::Ready(Ok(()));
            }
            WriteStep::ReadDirectory
        }
        WriteStep::ReadDirectory => {
            let (sector, index) = entry_sector(drive, handle)?;
            ready!(drive
                .device
                .read_sectors(sector, &mut handle.buffer[..SECTOR_SIZE]))?;
            let size = handle.cursor() + span.len as u32;
            update_entry_size(&mut handle.buffer[..SECTOR_SIZE], index, size)?;
            WriteStep::WriteDirectory
        }
        WriteStep::WriteDirectory => {
            let (sector, _) = entry_sector(drive, handle)?;
            ready!(drive
                .device
                .write_sectors(sector, &handle.buffer[..SECTOR_SIZE]))?;
            return Poll::Ready(Ok(()));
        }
    };

    handle.transfer = Transfer::Write { span, step: next };
    Poll::Pending
}
