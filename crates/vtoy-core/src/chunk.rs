//! The Image Chunk List: the canonical representation of a file as an
//! ordered sequence of `(img_sector, disk_sector, length)` ranges on the raw
//! disk, plus the Override and Virt chunk types that extend/patch it.

use vtoy_common::types::{
    endian::LittleEndian,
    number::{U32, U64},
};

/// 2 KiB units, as used by every `img_*_sector` field.
pub const IMG_SECTOR_SIZE: u64 = 2048;
/// 512 B units, as used by every `disk_*_sector` field.
pub const DISK_SECTOR_SIZE: u64 = 512;
/// How many 512 B disk sectors make up one 2 KiB image sector.
pub const SECTORS_PER_IMG_SECTOR: u64 = IMG_SECTOR_SIZE / DISK_SECTOR_SIZE;

/// A single `(img_lba, disk_lba, sector_count)` range. 24 bytes, binary-stable:
/// this is the on-wire ABI read by the guest-side agent.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ImageChunk {
    pub img_start_sector: U32<LittleEndian>,
    pub img_end_sector: U32<LittleEndian>,
    pub disk_start_sector: U64<LittleEndian>,
    pub disk_end_sector: U64<LittleEndian>,
}

static_assertions::assert_eq_size!(ImageChunk, [u8; 24]);

impl ImageChunk {
    pub fn new(img_start: u32, img_end: u32, disk_start: u64, disk_end: u64) -> Self {
        Self {
            img_start_sector: U32::new(img_start),
            img_end_sector: U32::new(img_end),
            disk_start_sector: U64::new(disk_start),
            disk_end_sector: U64::new(disk_end),
        }
    }

    pub fn img_start(&self) -> u32 {
        self.img_start_sector.get()
    }

    pub fn img_end(&self) -> u32 {
        self.img_end_sector.get()
    }

    pub fn disk_start(&self) -> u64 {
        self.disk_start_sector.get()
    }

    pub fn disk_end(&self) -> u64 {
        self.disk_end_sector.get()
    }

    pub fn img_sector_count(&self) -> u64 {
        (self.img_end() - self.img_start()) as u64 + 1
    }

    pub fn disk_sector_count(&self) -> u64 {
        self.disk_end() - self.disk_start() + 1
    }
}

/// A small byte-range patch applied virtually at read time to the synthetic
/// image; never touches the underlying file.
#[derive(Debug, Clone)]
pub struct OverrideChunk {
    pub img_offset: u64,
    pub override_data: alloc::vec::Vec<u8>,
}

impl OverrideChunk {
    pub fn size(&self) -> u32 {
        self.override_data.len() as u32
    }

    pub fn range(&self) -> core::ops::Range<u64> {
        self.img_offset..self.img_offset + self.override_data.len() as u64
    }
}

/// A synthetic-image sector range served from memory or remapped to another
/// physical disk range, extending the image beyond the original file.
#[derive(Debug, Clone)]
pub enum VirtSource {
    /// Served from a contiguous blob that follows the chunk table.
    Memory { offset: u32 },
    /// Redirected to another physical disk range.
    Remap { org_sector_start: u32 },
}

#[derive(Debug, Clone)]
pub struct VirtChunk {
    pub remap_sector_start: u32,
    pub remap_sector_end: u32,
    pub source: VirtSource,
}

/// Errors produced while resolving or validating a chunk list.
#[cfg_attr(feature = "std", derive(thiserror::Error))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    #[cfg_attr(feature = "std", error("chunk list does not cover the whole file"))]
    UnsupportedExtents,
    #[cfg_attr(feature = "std", error("reading allocation metadata failed"))]
    ReadFailed,
}

/// Growable, append-only buffer of [`ImageChunk`]s. Growth starts at 1024
/// entries and doubles, mirroring the geometric growth used by the chain
/// head and cpio overlay allocators.
#[derive(Debug, Clone, Default)]
pub struct ImageChunkList {
    chunks: alloc::vec::Vec<ImageChunk>,
}

impl ImageChunkList {
    pub fn new() -> Self {
        Self {
            chunks: alloc::vec::Vec::with_capacity(1024),
        }
    }

    pub fn push(&mut self, chunk: ImageChunk) {
        if self.chunks.len() == self.chunks.capacity() {
            self.chunks.reserve(self.chunks.capacity().max(1024));
        }
        self.chunks.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn as_slice(&self) -> &[ImageChunk] {
        &self.chunks
    }

    /// I1/I2: disk sectors sum to `ceil(file_size/512)` (tolerating a
    /// one-sector shortfall for a non-512-aligned tail), and img ranges form
    /// a disjoint, ascending, contiguous cover starting at 0.
    pub fn check_block_list(&self, file_size: u64) -> Result<(), ChunkError> {
        let expected_disk_sectors = file_size.div_ceil(DISK_SECTOR_SIZE);
        let actual_disk_sectors: u64 = self.chunks.iter().map(ImageChunk::disk_sector_count).sum();

        let shortfall_tolerated =
            file_size % DISK_SECTOR_SIZE != 0 && expected_disk_sectors == actual_disk_sectors + 1;
        if actual_disk_sectors != expected_disk_sectors && !shortfall_tolerated {
            return Err(ChunkError::UnsupportedExtents);
        }

        let mut expected_img_start = 0u32;
        for chunk in &self.chunks {
            if chunk.img_start() != expected_img_start {
                return Err(ChunkError::UnsupportedExtents);
            }
            expected_img_start = chunk.img_end() + 1;
        }
        let expected_img_sectors = file_size.div_ceil(IMG_SECTOR_SIZE) as u32;
        if expected_img_start != expected_img_sectors {
            return Err(ChunkError::UnsupportedExtents);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_contiguous_chunk_covers_whole_file() {
        let mut list = ImageChunkList::new();
        // 2 GiB file -> 1_048_576 img sectors (2 KiB units), 4_194_304 disk sectors.
        list.push(ImageChunk::new(0, 1_048_575, 4_196_352, 4_196_352 + 4_194_304 - 1));
        assert!(list.check_block_list(2_147_483_648).is_ok());
    }

    #[test]
    fn gap_in_img_coverage_is_rejected() {
        let mut list = ImageChunkList::new();
        list.push(ImageChunk::new(0, 0, 100, 103));
        list.push(ImageChunk::new(2, 2, 200, 203));
        assert_eq!(
            list.check_block_list(4096),
            Err(ChunkError::UnsupportedExtents)
        );
    }

    #[test]
    fn one_sector_shortfall_on_unaligned_tail_is_tolerated() {
        let mut list = ImageChunkList::new();
        // file_size = 2048*1 + 100 bytes -> img sectors = 2, disk sectors = ceil(2148/512) = 5
        // but we only have 4 disk sectors (one short).
        list.push(ImageChunk::new(0, 1, 100, 103));
        assert!(list.check_block_list(2148).is_ok());
    }
}
