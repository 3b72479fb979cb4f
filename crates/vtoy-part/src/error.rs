/// Errors surfaced when reading or writing sectors of a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReadWriteError {
    /// The requested offset/sector falls past the end of the device.
    #[error("index out of bounds")]
    OutOfBounds,
    /// The sector number itself is invalid (e.g. not aligned, or negative after signed math).
    #[error("invalid sector")]
    InvalidSector,
}

/// Errors from the higher-level [`crate::block::BlockDevice`]/disk-iteration APIs, which wrap
/// an underlying [`ReadWriteError`] with device-enumeration failures.
#[cfg(feature = "alloc")]
#[derive(Debug, thiserror::Error)]
pub enum DiskError {
    #[error("sector I/O error: {0}")]
    Io(#[from] ReadWriteError),
    #[error("device {0:?} could not be opened")]
    OpenFailed(alloc::string::String),
    #[error("partition table is not valid MBR or GPT")]
    NoPartitionTable,
    #[error("GPT partition entry size {0} is smaller than the entry layout this reads")]
    UnsupportedGptLayout(u32),
}
