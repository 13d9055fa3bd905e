// CLI pour le moteur FAT32 : une image disque partitionnée MBR
use std::env;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::process;
use std::task::Poll;

use pollfat::{BlockDevice, Config, Fat32Error, Fat32FileSystem, FileId, Result, SECTOR_SIZE};

/// Device basé sur un fichier, chaque transfert se termine immédiatement
struct FileDevice {
    file: File,
}

impl FileDevice {
    fn open(path: &str) -> io::Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    fn seek(&mut self, start: u32) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(start as u64 * SECTOR_SIZE as u64))
            .map_err(|_| Fat32Error::IoError)?;
        Ok(())
    }
}

impl BlockDevice for FileDevice {
    fn hardware_init(&mut self) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn configure(&mut self) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn read_sectors(&mut self, start: u32, buffer: &mut [u8]) -> Poll<Result<()>> {
        self.seek(start)?;
        self.file
            .read_exact(buffer)
            .map_err(|_| Fat32Error::IoError)?;
        Poll::Ready(Ok(()))
    }

    fn write_sectors(&mut self, start: u32, buffer: &[u8]) -> Poll<Result<()>> {
        self.seek(start)?;
        self.file
            .write_all(buffer)
            .map_err(|_| Fat32Error::IoError)?;
        Poll::Ready(Ok(()))
    }
}

/// Boucle de scrutation : rappeler l'étape jusqu'au résultat
fn drive<T>(mut step: impl FnMut() -> Poll<Result<T>>) -> Result<T> {
    loop {
        if let Poll::Ready(result) = step() {
            return result;
        }
    }
}

fn print_help(program: &str) {
    println!("Moteur FAT32 par scrutation");
    println!();
    println!("Usage: {} <image> <commande> [args]", program);
    println!();
    println!("Commandes:");
    println!("  info                 Affiche les partitions montées");
    println!("  cat <fichier>        Affiche un fichier de la racine");
    println!("  create <fichier>     Crée un fichier vide");
    println!("  append <fichier> <texte>");
    println!("                       Ajoute une ligne à la fin du fichier");
    println!();
    println!("Exemples:");
    println!("  {} disk.img info", program);
    println!("  {} disk.img create log.txt", program);
    println!("  {} disk.img append log.txt bonjour", program);
    println!("  {} disk.img cat log.txt", program);
}

fn info(fs: &Fat32FileSystem<FileDevice>) -> Result<()> {
    for p in 0..fs.config().partitions() as u8 {
        let record = fs.partition_record(0, p)?;
        match fs.partition(0, p) {
            Ok(geometry) => println!(
                "partition {}: LBA {} fat={} data={} racine={} cluster={} octets",
                p,
                record.start_lba,
                geometry.fat_start_sector,
                geometry.data_start_sector,
                geometry.root_sector,
                geometry.cluster_bytes()
            ),
            Err(_) => println!("partition {}: {:?} ignorée", p, record.kind),
        }
    }
    Ok(())
}

fn cat(fs: &mut Fat32FileSystem<FileDevice>, name: &str) -> Result<()> {
    let file = drive(|| fs.open(0, 0, name))?;
    let mut data = vec![0u8; fs.file(&file)?.logical_size() as usize];
    let result = if data.is_empty() {
        Ok(0)
    } else {
        drive(|| fs.read(&file, &mut data))
    };
    fs.close(file)?;

    let len = result?;
    io::stdout()
        .write_all(&data[..len])
        .map_err(|_| Fat32Error::IoError)?;
    Ok(())
}

fn create(fs: &mut Fat32FileSystem<FileDevice>, name: &str) -> Result<()> {
    let file = drive(|| fs.create(0, 0, name))?;
    println!(
        "{} créé, cluster {}",
        fs.file(&file)?.name(),
        fs.file(&file)?.first_cluster()
    );
    fs.close(file)
}

fn append(fs: &mut Fat32FileSystem<FileDevice>, name: &str, text: &str) -> Result<()> {
    let file = drive(|| fs.open(0, 0, name))?;
    let result = append_line(fs, &file, text);
    fs.close(file)?;

    let size = result?;
    println!("{} octets", size);
    Ok(())
}

fn append_line(fs: &mut Fat32FileSystem<FileDevice>, file: &FileId, text: &str) -> Result<u32> {
    let size = fs.file(file)?.logical_size();
    if size > 0 {
        // seek refuse la taille logique : on se place sur le dernier octet
        // puis on le relit pour avancer le curseur
        fs.seek(file, size - 1)?;
        let mut last = [0u8; 1];
        drive(|| fs.read(file, &mut last))?;
    }

    let line = format!("{}\r\n", text);
    drive(|| fs.write(file, line.as_bytes()))?;
    Ok(fs.file(file)?.logical_size())
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        print_help(&args[0]);
        return Ok(());
    }

    let image_path = &args[1];

    // Ouvrir l'image
    let device = match FileDevice::open(image_path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Erreur: impossible d'ouvrir '{}': {}", image_path, e);
            process::exit(1);
        }
    };

    let mut fs = Fat32FileSystem::new(vec![device], Config::default())?;
    if let Err(e) = drive(|| fs.mount(0)) {
        eprintln!("Erreur: montage impossible: {}", e);
        process::exit(1);
    }

    let cmd = args[2].as_str();
    let name = args.get(3).map(|s| s.as_str());

    let result = match (cmd, name) {
        ("info", _) => info(&fs),
        ("cat", Some(name)) => cat(&mut fs, name),
        ("create", Some(name)) => create(&mut fs, name),
        ("append", Some(name)) => {
            let text = args[4..].join(" ");
            append(&mut fs, name, &text)
        }
        _ => {
            eprintln!("Commande inconnue ou incomplète: {}", cmd);
            print_help(&args[0]);
            process::exit(1);
        }
    };

    if let Err(e) = result {
        if e.is_io() {
            eprintln!("Erreur d'accès à '{}': {}", image_path, e);
        } else {
            eprintln!("Erreur: {}", e);
        }
        return Err(Box::new(e));
    }

    Ok(())
}
