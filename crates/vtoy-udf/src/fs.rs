//! Minimal read-only traversal: turning a parsed File Entry's allocation
//! descriptors into the contiguous disk runs an extent resolver wants.

use alloc::vec::Vec;

use vtoy_common::types::endian::Endian;
use vtoy_part::{ReadWriteError, Reader};

use crate::descriptor::{
    AllocDescriptorType, AllocationDescriptor, FileEntry, FileEntryHeader,
    LongAllocationDescriptor, ShortAllocationDescriptor,
};

pub const UDF_BLOCK_SIZE: u32 = 2048;
pub const UDF_SECTORS_PER_BLOCK: u32 = UDF_BLOCK_SIZE / 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum UdfError {
    #[cfg_attr(feature = "std", error("truncated file entry"))]
    Truncated,
    #[cfg_attr(feature = "std", error("unsupported allocation descriptor form"))]
    UnsupportedAllocForm,
}

/// Parses the allocation descriptor list following a File Entry header.
/// `icb_flags` (the low 3 bits of `icbtag.flags`) selects whether each
/// 8-byte or 16-byte record is a short or long `ad`.
pub fn parse_allocation_descriptors(
    header: &FileEntryHeader,
    tail: &[u8],
) -> Result<FileEntry, UdfError> {
    let ea_len = header.length_of_extended_attributes.get() as usize;
    let ad_len = header.length_of_allocation_descriptors.get() as usize;

    if tail.len() < ea_len + ad_len {
        return Err(UdfError::Truncated);
    }
    let ad_bytes = &tail[ea_len..ea_len + ad_len];

    let form = header.icb_tag.alloc_descriptor_type();
    let mut descriptors = Vec::new();

    match form {
        AllocDescriptorType::ShortAd => {
            for chunk in ad_bytes.chunks_exact(8) {
                let ad: ShortAllocationDescriptor = *bytemuck::from_bytes(chunk);
                descriptors.push(AllocationDescriptor::Short(ad));
            }
        }
        AllocDescriptorType::LongAd => {
            for chunk in ad_bytes.chunks_exact(16) {
                let ad: LongAllocationDescriptor = *bytemuck::from_bytes(chunk);
                descriptors.push(AllocationDescriptor::Long(ad));
            }
        }
        _ => return Err(UdfError::UnsupportedAllocForm),
    }

    Ok(FileEntry {
        information_length: header.information_length.get(),
        descriptors,
    })
}

/// One contiguous run of 512-byte sectors, partition-relative (the caller
/// adds the partition's starting LBA, same convention as every other
/// extent source feeding [`vtoy_core`]'s extent resolver).
#[derive(Debug, Clone, Copy)]
pub struct UdfRun {
    pub disk_start_sector: u64,
    pub sector_count: u64,
}

/// Converts a File Entry's allocation descriptors into partition-relative
/// sector runs, in UDF logical-block units converted to 512 B sectors.
pub fn runs_from_file_entry(entry: &FileEntry) -> Vec<UdfRun> {
    entry
        .descriptors
        .iter()
        .filter(|ad| ad.extent_length_bytes() > 0)
        .map(|ad| UdfRun {
            disk_start_sector: ad.extent_position_blocks() as u64 * UDF_SECTORS_PER_BLOCK as u64,
            sector_count: (ad.extent_length_bytes() as u64).div_ceil(512),
        })
        .collect()
}

/// Reads a File Entry at `block` (partition-relative, UDF logical blocks)
/// and returns its parsed allocation descriptors.
pub fn read_file_entry(
    reader: &mut dyn Reader,
    block: u32,
) -> Result<FileEntry, ReadWriteError> {
    let sector = block * UDF_SECTORS_PER_BLOCK;
    let mut block_bytes = alloc::vec![0u8; UDF_BLOCK_SIZE as usize];
    for i in 0..UDF_SECTORS_PER_BLOCK {
        let mut buf = [0u8; 512];
        reader.read_sector(sector + i, &mut buf)?;
        block_bytes[(i as usize) * 512..(i as usize + 1) * 512].copy_from_slice(&buf);
    }

    let header_len = core::mem::size_of::<FileEntryHeader>();
    let header: FileEntryHeader = *bytemuck::from_bytes(&block_bytes[..header_len]);
    parse_allocation_descriptors(&header, &block_bytes[header_len..])
        .map_err(|_| ReadWriteError::InvalidSector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[test]
    fn short_ad_descriptors_convert_to_sector_runs() {
        let mut header = FileEntryHeader::zeroed();
        header.icb_tag.flags = vtoy_common::types::number::U16::new(0);
        header.length_of_allocation_descriptors =
            vtoy_common::types::number::U32::new(16);

        let mut tail = alloc::vec![0u8; 16];
        let ad1 = ShortAllocationDescriptor {
            extent_length: vtoy_common::types::number::U32::new(2048),
            extent_position: vtoy_common::types::number::U32::new(10),
        };
        let ad2 = ShortAllocationDescriptor {
            extent_length: vtoy_common::types::number::U32::new(4096),
            extent_position: vtoy_common::types::number::U32::new(20),
        };
        tail[0..8].copy_from_slice(bytemuck::bytes_of(&ad1));
        tail[8..16].copy_from_slice(bytemuck::bytes_of(&ad2));

        let entry = parse_allocation_descriptors(&header, &tail).unwrap();
        let runs = runs_from_file_entry(&entry);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].disk_start_sector, 10 * UDF_SECTORS_PER_BLOCK as u64);
        assert_eq!(runs[0].sector_count, 4);
        assert_eq!(runs[1].sector_count, 8);
    }
}
