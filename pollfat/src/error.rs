use core::fmt;

pub type Result<T> = core::result::Result<T, Fat32Error>;

/// Les différentes erreurs possibles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fat32Error {
    // Paramètres
    InvalidDisk,
    InvalidPartition,
    InvalidHandle,
    ParameterValue,

    // Noms 8.3
    InvalidName,
    NameTooLong,
    ExtensionTooLong,

    // Format du disque
    InvalidFileSystem,
    InvalidBootSector,
    InvalidCluster,
    NotAFile,
    NotMounted,

    // Ressources épuisées
    NoFreeHandle,
    NoFreeCluster,
    NoFreeEntry,

    NotImplemented,

    // Capacité
    CapacityExceeded,
    BufferTooSmall,
    OffsetOutOfRange,
    EndOfFile,

    NotFound,
    AlreadyExists,

    /// Une autre opération occupe l'emplacement de progression ou attend
    /// la fin de sa requête. L'opération en cours n'est pas perdue, on
    /// peut rappeler plus tard.
    Busy,

    // Erreurs remontées par le périphérique
    IoError,
    Device(u32),
}

impl Fat32Error {
    /// Vrai pour les erreurs qui viennent du transport bloc.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::IoError | Self::Device(_))
    }
}

impl fmt::Display for Fat32Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidDisk => write!(f, "Numéro de disque invalide"),
            Self::InvalidPartition => write!(f, "Numéro de partition invalide"),
            Self::InvalidHandle => write!(f, "Descripteur de fichier invalide"),
            Self::ParameterValue => write!(f, "Valeur de paramètre invalide"),
            Self::InvalidName => write!(f, "Nom de fichier invalide"),
            Self::NameTooLong => write!(f, "Nom de fichier trop long (8 caractères max)"),
            Self::ExtensionTooLong => write!(f, "Extension trop longue (3 caractères max)"),
            Self::InvalidFileSystem => write!(f, "Système de fichiers invalide"),
            Self::InvalidBootSector => write!(f, "Boot sector invalide"),
            Self::InvalidCluster => write!(f, "Numéro de cluster invalide"),
            Self::NotAFile => write!(f, "Ce n'est pas un fichier"),
            Self::NotMounted => write!(f, "Disque non monté"),
            Self::NoFreeHandle => write!(f, "Plus de descripteur de fichier libre"),
            Self::NoFreeCluster => write!(f, "Plus de cluster libre"),
            Self::NoFreeEntry => write!(f, "Plus d'entrée libre dans le répertoire"),
            Self::NotImplemented => write!(f, "Non implémenté"),
            Self::CapacityExceeded => write!(f, "Capacité du fichier dépassée"),
            Self::BufferTooSmall => write!(f, "Buffer trop petit"),
            Self::OffsetOutOfRange => write!(f, "Position hors du fichier"),
            Self::EndOfFile => write!(f, "Fin du fichier"),
            Self::NotFound => write!(f, "Fichier ou dossier non trouvé"),
            Self::AlreadyExists => write!(f, "Le fichier existe déjà"),
            Self::Busy => write!(f, "Une autre opération est en cours"),
            Self::IoError => write!(f, "Erreur d'entrée/sortie"),
            Self::Device(code) => write!(f, "Erreur du périphérique ({})", code),
        }
    }
}

impl core::error::Error for Fat32Error {}
