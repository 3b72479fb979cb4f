//! VLNK (Virtual Link) resolution: a 32768-byte placeholder file whose
//! header points at another file elsewhere on the disk set, resolved into a
//! name-rewrite rule so reads of the link transparently become reads of the
//! target.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use vtoy_common::alg::hash::crc::Crc32CHasher;
use vtoy_part::{
    disk::{iterate_disks, read_disk_signature},
    BlockDevice, DiskError, FsProbe, PartitionWindow,
};

pub const VLNK_FILE_SIZE: u64 = 32768;
pub const VLNK_HEADER_SIZE: usize = 64;

/// Fixed GUID a VLNK file's header must start with to be considered valid.
pub const VLNK_GUID: [u8; 16] = [
    0x30, 0x66, 0x91, 0xeb, 0x08, 0x1b, 0x47, 0x46, 0xb8, 0xf2, 0x31, 0x4d, 0xdd, 0x2c, 0x23, 0x2c,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VlnkError {
    NotAVlnk,
    TargetNotFound,
}

/// A parsed, CRC-validated VLNK record.
#[derive(Debug, Clone)]
pub struct VlnkRecord {
    pub target_disk_signature: u32,
    pub target_partition_offset: u64,
    pub target_path: String,
}

/// I5: parses the 64-byte header and validates `crc32c` against the stored
/// value, computed with the CRC field itself zeroed.
pub fn parse_vlnk_header(bytes: &[u8]) -> Result<VlnkRecord, VlnkError> {
    if bytes.len() < VLNK_HEADER_SIZE {
        return Err(VlnkError::NotAVlnk);
    }
    if bytes[0..16] != VLNK_GUID {
        return Err(VlnkError::NotAVlnk);
    }

    let stored_crc = u32::from_le_bytes(bytes[16..20].try_into().unwrap());

    let mut zeroed = [0u8; VLNK_HEADER_SIZE];
    zeroed.copy_from_slice(&bytes[..VLNK_HEADER_SIZE]);
    zeroed[16..20].fill(0);
    let computed_crc = Crc32CHasher::checksum(&zeroed);
    if computed_crc != stored_crc {
        return Err(VlnkError::NotAVlnk);
    }

    let target_disk_signature = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
    let target_partition_offset = u64::from_le_bytes(bytes[24..32].try_into().unwrap());

    let path_bytes = &bytes[32..VLNK_HEADER_SIZE];
    let nul = path_bytes.iter().position(|&b| b == 0).unwrap_or(path_bytes.len());
    let target_path = core::str::from_utf8(&path_bytes[..nul])
        .map_err(|_| VlnkError::NotAVlnk)?
        .to_string();

    Ok(VlnkRecord {
        target_disk_signature,
        target_partition_offset,
        target_path,
    })
}

/// One partition discovered while building the cache: its disk signature,
/// byte offset from the start of its disk, device identity, and probed FS
/// (cached, since probing re-reads the boot sector).
#[derive(Debug, Clone)]
pub struct CachedPartition {
    pub disk_name: String,
    pub device_name: String,
    pub partition_offset: u64,
    pub probed_fs: FsProbe,
}

/// Maps a disk signature to every non-install partition found on that disk,
/// built lazily on first VLNK resolution and never freed during a session
/// (per the concurrency model).
#[derive(Debug, Clone, Default)]
pub struct VlnkPartitionIndex {
    by_signature: BTreeMap<u32, Vec<CachedPartition>>,
}

impl VlnkPartitionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, signature: u32, partition: CachedPartition) {
        self.by_signature.entry(signature).or_default().push(partition);
    }

    pub fn is_built(&self) -> bool {
        !self.by_signature.is_empty()
    }

    /// Finds the partition matching `record`, skipping the install partition
    /// (the caller excludes it before calling [`Self::insert`] by comparing
    /// its own disk signature, read from MBR offset 0x1b8).
    pub fn resolve(&self, record: &VlnkRecord) -> Result<&CachedPartition, VlnkError> {
        self.by_signature
            .get(&record.target_disk_signature)
            .and_then(|parts| {
                parts
                    .iter()
                    .find(|p| p.partition_offset == record.target_partition_offset)
            })
            .ok_or(VlnkError::TargetNotFound)
    }
}

/// A resolved name-rewrite rule: reads of `vlnk_path` become reads of
/// `target_path` on `target_partition`.
#[derive(Debug, Clone)]
pub struct VlnkRewrite {
    pub vlnk_path: String,
    pub target_path: String,
    pub target_partition: CachedPartition,
}

pub fn resolve_vlnk(
    vlnk_path: &str,
    header_bytes: &[u8],
    index: &VlnkPartitionIndex,
) -> Result<VlnkRewrite, VlnkError> {
    let record = parse_vlnk_header(header_bytes)?;
    let partition = index.resolve(&record)?;
    Ok(VlnkRewrite {
        vlnk_path: vlnk_path.to_string(),
        target_path: record.target_path,
        target_partition: partition.clone(),
    })
}

/// Builds a [`VlnkPartitionIndex`] by walking every attached disk with
/// [`iterate_disks`], probing each partition's filesystem through a
/// [`PartitionWindow`], and excluding whichever disk's MBR signature matches
/// `install_disk_signature` — the disk Ventoy itself booted from, which a
/// VLNK target never legitimately points back at.
pub fn build_partition_index(
    disks: &mut [&mut dyn BlockDevice],
    install_disk_signature: u32,
) -> Result<VlnkPartitionIndex, DiskError> {
    let mut index = VlnkPartitionIndex::new();

    iterate_disks(disks, |disk, partitions| {
        let signature = read_disk_signature(disk)?;
        if signature == install_disk_signature {
            return Ok(());
        }

        let disk_name = disk.name().to_string();
        for partition in partitions {
            let probed_fs = {
                let mut window = PartitionWindow::new(disk, partition.start_lba);
                vtoy_part::probe_fs(&mut window).unwrap_or(FsProbe::Unknown)
            };
            index.insert(
                signature,
                CachedPartition {
                    disk_name: disk_name.clone(),
                    device_name: alloc::format!("{disk_name}p{}", partition.index),
                    partition_offset: partition.start_byte_offset(),
                    probed_fs,
                },
            );
        }
        Ok(())
    })?;

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtoy_part::block::MemoryDisk;

    fn mbr_disk(name: &str, signature: u32) -> MemoryDisk {
        let mut data = alloc::vec![0u8; 1024 * 1024];
        data[0x1b8..0x1bc].copy_from_slice(&signature.to_le_bytes());
        data[446 + 4] = 0x83; // Linux native
        data[446 + 8..446 + 12].copy_from_slice(&2048u32.to_le_bytes());
        data[446 + 12..446 + 16].copy_from_slice(&4096u32.to_le_bytes());
        MemoryDisk::new(name, data)
    }

    #[test]
    fn build_partition_index_excludes_install_disk() {
        let mut boot = mbr_disk("boot.img", 0xaaaaaaaa);
        let mut data = mbr_disk("data.img", 0xbbbbbbbb);
        let mut disks: Vec<&mut dyn BlockDevice> = alloc::vec![&mut boot, &mut data];

        let index = build_partition_index(&mut disks, 0xaaaaaaaa).unwrap();
        assert!(index.by_signature.get(&0xaaaaaaaa).is_none());
        assert_eq!(index.by_signature.get(&0xbbbbbbbb).unwrap().len(), 1);
    }

    fn build_valid_header(signature: u32, offset: u64, path: &str) -> [u8; VLNK_HEADER_SIZE] {
        let mut bytes = [0u8; VLNK_HEADER_SIZE];
        bytes[0..16].copy_from_slice(&VLNK_GUID);
        bytes[20..24].copy_from_slice(&signature.to_le_bytes());
        bytes[24..32].copy_from_slice(&offset.to_le_bytes());
        let path_bytes = path.as_bytes();
        bytes[32..32 + path_bytes.len()].copy_from_slice(path_bytes);

        let mut zeroed = bytes;
        zeroed[16..20].fill(0);
        let crc = Crc32CHasher::checksum(&zeroed);
        bytes[16..20].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    #[test]
    fn valid_header_round_trips_through_crc() {
        let header = build_valid_header(0xdeadbeef, 1_048_576, "/data/win11.wim");
        let record = parse_vlnk_header(&header).unwrap();
        assert_eq!(record.target_disk_signature, 0xdeadbeef);
        assert_eq!(record.target_partition_offset, 1_048_576);
        assert_eq!(record.target_path, "/data/win11.wim");
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let mut header = build_valid_header(1, 2, "/x.iso");
        header[16] ^= 0xff;
        assert!(matches!(parse_vlnk_header(&header), Err(VlnkError::NotAVlnk)));
    }

    #[test]
    fn resolve_finds_matching_partition() {
        let mut index = VlnkPartitionIndex::new();
        index.insert(
            42,
            CachedPartition {
                disk_name: "disk0".into(),
                device_name: "/dev/sda2".into(),
                partition_offset: 2048 * 512,
                probed_fs: FsProbe::Ntfs,
            },
        );
        let header = build_valid_header(42, 2048 * 512, "/users/a.wim");
        let rewrite = resolve_vlnk("/images/link.vlnk.wim", &header, &index).unwrap();
        assert_eq!(rewrite.target_path, "/users/a.wim");
        assert_eq!(rewrite.target_partition.device_name, "/dev/sda2");
    }
}
