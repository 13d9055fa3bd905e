// Interopérabilité avec la crate fatfs sur une vraie image FAT32
mod common;

use std::io::{Cursor, Read, Write};

use common::{MemDisk, drive, mounted_with};
use pollfat::{Config, Fat32Error, Fat32FileSystem};

const PARTITION_START: usize = 2048;
const VOLUME_SIZE: usize = 40 * 1024 * 1024;

/// Disque avec un MBR et une partition FAT32 LBA formatée par fatfs.
///
/// Avec l'indication `Fat32`, fatfs choisit des clusters de 512 octets ;
/// FAT32 demande au moins 65 525 clusters, d'où les 40 Mo.
fn make_disk() -> Vec<u8> {
    let mut data = vec![0u8; PARTITION_START * 512 + VOLUME_SIZE];
    {
        let mut cursor = Cursor::new(&mut data[PARTITION_START * 512..]);
        fatfs::format_volume(
            &mut cursor,
            fatfs::FormatVolumeOptions::new().fat_type(fatfs::FatType::Fat32),
        )
        .expect("format_volume failed");
    }

    data[446 + 4] = 0x0C;
    data[446 + 8..446 + 12].copy_from_slice(&(PARTITION_START as u32).to_le_bytes());
    data[446 + 12..446 + 16].copy_from_slice(&((VOLUME_SIZE / 512) as u32).to_le_bytes());
    data[510] = 0x55;
    data[511] = 0xAA;
    data
}

fn write_via_fatfs(data: &mut [u8], name: &str, content: &[u8]) {
    let mut cursor = Cursor::new(&mut data[PARTITION_START * 512..]);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).expect("FileSystem::new failed");
    let mut f = fs.root_dir().create_file(name).expect("create_file failed");
    f.truncate().unwrap();
    f.write_all(content).unwrap();
}

fn read_via_fatfs(data: &mut [u8], name: &str) -> Vec<u8> {
    let mut cursor = Cursor::new(&mut data[PARTITION_START * 512..]);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).unwrap();
    let mut f = fs.root_dir().open_file(name).unwrap();
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).unwrap();
    buf
}

fn engine(data: Vec<u8>) -> Fat32FileSystem<MemDisk> {
    mounted_with(MemDisk::new(data, 1), Config::default())
}

fn into_data(fs: Fat32FileSystem<MemDisk>) -> Vec<u8> {
    fs.into_devices().remove(0).data
}

#[test]
fn test_mount_fatfs_volume() {
    let fs = engine(make_disk());
    let geometry = fs.partition(0, 0).unwrap();
    assert_eq!(geometry.start_lba, PARTITION_START as u32);
    assert_eq!(geometry.root_cluster, 2);
    assert_eq!(geometry.fat_copies, 2);
}

#[test]
fn test_read_file_written_by_fatfs() {
    let mut data = make_disk();
    write_via_fatfs(&mut data, "HELLO.TXT", b"world");

    let mut fs = engine(data);
    let file = drive(|| fs.open(0, 0, "hello.txt")).unwrap();
    assert_eq!(fs.file(&file).unwrap().logical_size(), 5);

    let mut buf = [0u8; 16];
    let n = drive(|| fs.read(&file, &mut buf)).unwrap();
    assert_eq!(&buf[..n], b"world");
}

#[test]
fn test_fatfs_reads_file_created_by_engine() {
    let mut fs = engine(make_disk());
    let file = drive(|| fs.create(0, 0, "NOTE.TXT")).unwrap();
    assert_eq!(drive(|| fs.write(&file, b"written by pollfat")), Ok(18));
    fs.close(file).unwrap();

    let mut data = into_data(fs);
    assert_eq!(read_via_fatfs(&mut data, "NOTE.TXT"), b"written by pollfat");
}

#[test]
fn test_fatfs_reads_appended_file() {
    let mut data = make_disk();
    write_via_fatfs(&mut data, "HELLO.TXT", b"world");

    let mut fs = engine(data);
    let file = drive(|| fs.open(0, 0, "HELLO.TXT")).unwrap();
    fs.seek(&file, 4).unwrap();
    let mut last = [0u8; 1];
    drive(|| fs.read(&file, &mut last)).unwrap();
    assert_eq!(drive(|| fs.write(&file, b"!!")), Ok(2));
    fs.close(file).unwrap();

    let mut data = into_data(fs);
    assert_eq!(read_via_fatfs(&mut data, "HELLO.TXT"), b"world!!");
}

#[test]
fn test_engine_and_fatfs_share_the_volume() {
    let mut data = make_disk();
    write_via_fatfs(&mut data, "FIRST.TXT", b"one");

    let mut fs = engine(data);
    let file = drive(|| fs.create(0, 0, "SECOND.TXT")).unwrap();
    drive(|| fs.write(&file, b"two")).unwrap();
    fs.close(file).unwrap();

    let mut data = into_data(fs);
    assert_eq!(read_via_fatfs(&mut data, "FIRST.TXT"), b"one");
    assert_eq!(read_via_fatfs(&mut data, "SECOND.TXT"), b"two");
}

#[test]
fn test_open_empty_file_written_by_fatfs() {
    let mut data = make_disk();
    write_via_fatfs(&mut data, "EMPTY.TXT", b"");

    let mut fs = engine(data);
    let file = drive(|| fs.open(0, 0, "EMPTY.TXT")).unwrap();
    assert_eq!(fs.file(&file).unwrap().first_cluster(), 0);
    assert_eq!(fs.file(&file).unwrap().logical_size(), 0);
    assert_eq!(drive(|| fs.write(&file, b"x")), Err(Fat32Error::CapacityExceeded));
    fs.close(file).unwrap();
}
