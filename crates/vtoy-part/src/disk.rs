//! Partition table iteration: MBR and GPT, on top of a [`BlockDevice`].

use core::mem::size_of;

use alloc::vec::Vec;

use vtoy_common::part::{
    gpt::{GptPartitionEntry, GptPartitionTableHeader},
    mbr::MbrPartitionTable,
};
use vtoy_common::types::endian::Endian;

use crate::block::BlockDevice;
use crate::error::DiskError;

/// A single partition found on a disk, as an LBA range (in 512-byte sectors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub start_lba: u64,
    pub sector_count: u64,
}

impl Partition {
    pub fn start_byte_offset(&self) -> u64 {
        self.start_lba * 512
    }

    pub fn byte_len(&self) -> u64 {
        self.sector_count * 512
    }
}

/// Lists the partitions of `disk`, trying GPT first (checking the protective
/// MBR signature) and falling back to legacy MBR.
///
/// The whole-disk MBR is read once, then each partition's LBA range is
/// handed back for the caller to open as its own [`BlockDevice`] window.
pub fn iterate_partitions(disk: &mut dyn BlockDevice) -> Result<Vec<Partition>, DiskError> {
    let boot_sector = disk.read_to_sector(0)?;
    let mbr = MbrPartitionTable::parse(&mut &boot_sector[446..510])
        .map_err(|_| DiskError::NoPartitionTable)?;

    if !mbr.is_valid() {
        return Err(DiskError::NoPartitionTable);
    }

    let is_protective = (0..mbr.len()).any(|i| mbr[i].part_type == 0xEE);
    if is_protective {
        return iterate_gpt_partitions(disk);
    }

    let mut partitions = Vec::new();
    for i in 0..mbr.len() {
        let entry = mbr[i];
        if entry.is_empty() {
            continue;
        }
        partitions.push(Partition {
            index: i,
            start_lba: entry.start_sector.get() as u64,
            sector_count: entry.block_count.get() as u64,
        });
    }
    Ok(partitions)
}

fn iterate_gpt_partitions(disk: &mut dyn BlockDevice) -> Result<Vec<Partition>, DiskError> {
    let header_sector = disk.read_to_sector(1)?;
    let header: GptPartitionTableHeader =
        *bytemuck::from_bytes(&header_sector[..size_of::<GptPartitionTableHeader>()]);

    if header.signature != *b"EFI PART" {
        return Err(DiskError::NoPartitionTable);
    }

    let entry_size = header.size_of_partition_entry.get();
    if (entry_size as usize) < size_of::<GptPartitionEntry>() {
        return Err(DiskError::UnsupportedGptLayout(entry_size));
    }
    let entries_per_sector = 512 / entry_size as usize;
    if entries_per_sector == 0 {
        return Err(DiskError::UnsupportedGptLayout(entry_size));
    }

    let num_entries = header.num_partition_entries.get() as usize;
    let start_lba = header.partition_entry_lba.get() as u64;
    let sectors_needed = num_entries.div_ceil(entries_per_sector);

    let mut partitions = Vec::new();
    let mut index = 0usize;
    'sectors: for s in 0..sectors_needed {
        let sector = disk.read_to_sector((start_lba + s as u64) as u32)?;
        for e in 0..entries_per_sector {
            if index >= num_entries {
                break 'sectors;
            }
            let offset = e * entry_size as usize;
            let entry: GptPartitionEntry =
                *bytemuck::from_bytes(&sector[offset..offset + size_of::<GptPartitionEntry>()]);
            if !entry.type_guid().is_zero() {
                partitions.push(Partition {
                    index,
                    start_lba: entry.starting_lba(),
                    sector_count: entry.ending_lba() - entry.starting_lba() + 1,
                });
            }
            index += 1;
        }
    }

    Ok(partitions)
}

/// Reads the 4-byte MBR disk signature at byte offset 0x1b8 of sector 0,
/// present on both MBR- and GPT-partitioned disks (GPT keeps it for
/// backward-compatible identification).
pub fn read_disk_signature(disk: &mut dyn BlockDevice) -> Result<u32, DiskError> {
    let boot_sector = disk.read_to_sector(0)?;
    Ok(u32::from_le_bytes(boot_sector[0x1b8..0x1bc].try_into().unwrap()))
}

/// Walks every disk in `disks`, listing its partitions and handing both to
/// `visit_disk`.
///
/// Platform disk discovery (enumerating `/dev/sd*`, `\\.\PhysicalDriveN`,
/// ...) belongs to the embedding application, which already knows how to
/// open a raw device by handle; this only needs the opened handles, mirroring
/// how [`iterate_partitions`] takes an already-open disk rather than a path.
pub fn iterate_disks(
    disks: &mut [&mut dyn BlockDevice],
    mut visit_disk: impl FnMut(&mut dyn BlockDevice, &[Partition]) -> Result<(), DiskError>,
) -> Result<(), DiskError> {
    for disk in disks.iter_mut() {
        let partitions = iterate_partitions(*disk)?;
        visit_disk(*disk, &partitions)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;
    use crate::block::MemoryDisk;

    #[test]
    fn no_partition_table_on_blank_disk() {
        let mut disk = MemoryDisk::new("blank.img", alloc::vec![0u8; 1024 * 1024]);
        assert!(matches!(
            iterate_partitions(&mut disk),
            Err(DiskError::NoPartitionTable)
        ));
    }

    fn build_gpt_disk() -> MemoryDisk {
        use vtoy_common::part::gpt::Guid;

        let mut data = alloc::vec![0u8; 4096];

        // Protective MBR: one entry, type 0xEE, covering the whole disk.
        data[446] = 0x00; // boot indicator
        data[446 + 4] = 0xEE; // part_type
        data[446 + 8..446 + 12].copy_from_slice(&1u32.to_le_bytes());
        data[446 + 12..446 + 16].copy_from_slice(&7u32.to_le_bytes());

        // GPT header at sector 1 (byte 512).
        let mut header = GptPartitionTableHeader::default();
        header.partition_entry_lba = vtoy_common::types::number::U32::new(2);
        header.num_partition_entries = vtoy_common::types::number::U32::new(1);
        data[512..512 + size_of::<GptPartitionTableHeader>()]
            .copy_from_slice(bytemuck::bytes_of(&header));

        // One entry at sector 2 (byte 1024): BASIC_DATA_PART, LBA 34..=41.
        let entry_offset = 1024;
        data[entry_offset..entry_offset + 16].copy_from_slice(bytemuck::bytes_of(&Guid::BASIC_DATA_PART));
        data[entry_offset + 32..entry_offset + 40].copy_from_slice(&34u64.to_le_bytes());
        data[entry_offset + 40..entry_offset + 48].copy_from_slice(&41u64.to_le_bytes());

        MemoryDisk::new("gpt.img", data)
    }

    #[test]
    fn gpt_entry_array_is_parsed_into_partitions() {
        let mut disk = build_gpt_disk();
        let partitions = iterate_partitions(&mut disk).unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].start_lba, 34);
        assert_eq!(partitions[0].sector_count, 8);
    }

    #[test]
    fn zero_type_guid_entries_are_skipped() {
        let disk = build_gpt_disk();
        let mut data = disk.into_inner();
        data[1024..1024 + 16].fill(0);
        let mut disk = MemoryDisk::new("gpt.img", data);
        let partitions = iterate_partitions(&mut disk).unwrap();
        assert!(partitions.is_empty());
    }

    #[test]
    fn disk_signature_is_read_from_mbr_offset() {
        let mut data = alloc::vec![0u8; 512];
        data[0x1b8..0x1bc].copy_from_slice(&0xdeadbeefu32.to_le_bytes());
        let mut disk = MemoryDisk::new("sig.img", data);
        assert_eq!(read_disk_signature(&mut disk).unwrap(), 0xdeadbeef);
    }

    #[test]
    fn iterate_disks_visits_every_disk_in_order() {
        let mut disk_a = MemoryDisk::new("blank.img", alloc::vec![0u8; 1024 * 1024]);
        let mut disk_b = build_gpt_disk();
        let mut disks: Vec<&mut dyn BlockDevice> = alloc::vec![&mut disk_a, &mut disk_b];

        let mut seen = Vec::new();
        let result = iterate_disks(&mut disks, |disk, partitions| {
            seen.push((disk.name().to_string(), partitions.len()));
            Ok(())
        });

        // disk_a has no partition table at all, so the whole walk errors out
        // before disk_b is ever visited.
        assert!(result.is_err());
        assert!(seen.is_empty());
    }
}
