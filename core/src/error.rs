use thiserror::Error;

pub type Result<T> = std::result::Result<T, FatError>;

#[derive(Debug, Error)]
pub enum FatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Too many sectors for FAT: {0:#018x}")]
    TooManySectors(u64),

    #[error("Too many clusters for fat length {0}")]
    TooManyClustersForFatLen(u32),

    #[error("Too many clusters for {0} bit FAT")]
    TooManyClustersForBits(u8),

    #[error("Disk too small: {tot_sectors} sectors, system area needs {needed}")]
    DiskTooSmall { tot_sectors: u32, needed: u32 },

    #[error("Reserved sectors: {0}")]
    ReservedSectors(String),

    #[error("Internal consistency error: {0}")]
    Internal(String),

    #[error("Could not open device: {0}")]
    BackendOpen(String),

    #[error("Geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("Requested size too large: {requested} bytes, device holds {max} bytes")]
    SizeTooLarge { requested: u64, max: u64 },

    #[error("Non-sequential read: filter is at {expected}, read requested at {requested}")]
    NonSequentialRead { expected: u64, requested: u64 },

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Partition error: {0}")]
    Partition(String),

    #[error("Bad data map: {0}")]
    DataMap(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bad boot sector: {0}")]
    BootSector(String),
}

impl FatError {
    /// True for failures the pipeline builder must not paper over by trying
    /// another backend: the caller is expected to retry with other parameters.
    pub fn is_geometry_failure(&self) -> bool {
        matches!(self, FatError::GeometryMismatch(_))
    }
}
