//! Extent Resolver: turns a file handle plus the partition's starting LBA
//! into an [`ImageChunkList`].

use alloc::vec::Vec;

use vtoy_fat::structures::fat::Fat32;
use vtoy_part::{FsProbe, Reader};
use vtoy_udf::fs::{read_file_entry, runs_from_file_entry};

use crate::chunk::{ChunkError, ImageChunk, ImageChunkList, DISK_SECTOR_SIZE, IMG_SECTOR_SIZE};

/// One contiguous on-disk run backing part of a file, as handed back by a
/// filesystem-specific extent enumerator or a disk-read hook.
#[derive(Debug, Clone, Copy)]
pub struct Run {
    pub disk_start_sector: u64,
    pub sector_count: u64,
}

/// Source of contiguous runs for a file. FAT/exFAT/ext implement this
/// directly from their allocation metadata; everything else is driven by
/// [`runs_from_sequential_reads`].
pub trait ExtentSource {
    fn runs(&mut self) -> Result<alloc::vec::Vec<Run>, ChunkError>;
}

/// Builds runs by simulating the generic disk-read hook: sequential reads of
/// up to 1 GiB each produce one run, since no allocation metadata is
/// available for NTFS/XFS/ISO9660/UDF and reads go straight to disk in
/// whatever chunks the caller's I/O stack happens to issue.
pub fn runs_from_sequential_reads(
    mut next_read: impl FnMut() -> Option<Run>,
) -> alloc::vec::Vec<Run> {
    let mut runs = alloc::vec::Vec::new();
    while let Some(run) = next_read() {
        runs.push(run);
    }
    runs
}

/// Resolves a file's runs (already partition-relative) into an
/// [`ImageChunkList`], adding `partition_start_lba` to every disk sector and
/// renumbering `img_start/end` contiguously.
///
/// `normalize_udf` collapses adjacent runs a UDF driver may have split
/// unnecessarily short; `renumber_contiguous` is used for `.img`/`.vhd`/
/// `.vhdx`/`.vtoy`, where the synthetic image equals the file bytes
/// concatenated regardless of on-disk fragmentation.
pub fn build_chunk_list(
    runs: &[Run],
    partition_start_lba: u64,
    file_size: u64,
    fs: FsProbe,
) -> Result<ImageChunkList, ChunkError> {
    let mut list = ImageChunkList::new();
    let mut img_cursor = 0u32;

    for run in runs {
        let disk_start = run.disk_start_sector + partition_start_lba;
        let disk_end = disk_start + run.sector_count - 1;
        let img_sector_count = run.sector_count.div_ceil(4);
        let img_end = img_cursor + img_sector_count as u32 - 1;

        list.push(ImageChunk::new(img_cursor, img_end, disk_start, disk_end));
        img_cursor = img_end + 1;
    }

    if fs == FsProbe::Udf {
        normalize_contiguous(&mut list);
    }

    list.check_block_list(file_size)?;
    let _ = IMG_SECTOR_SIZE;
    let _ = DISK_SECTOR_SIZE;
    Ok(list)
}

/// Renumbers `img_start/end` of an already-built list so runs are
/// contiguous, used both for UDF normalization and for `.img`-family whole
/// file types where the synthetic image equals the file verbatim.
pub fn normalize_contiguous(list: &mut ImageChunkList) {
    let chunks = list.as_slice().to_vec();
    *list = ImageChunkList::new();
    let mut img_cursor = 0u32;
    for chunk in chunks {
        let img_sector_count = chunk.img_sector_count() as u32;
        let img_end = img_cursor + img_sector_count - 1;
        list.push(ImageChunk::new(
            img_cursor,
            img_end,
            chunk.disk_start(),
            chunk.disk_end(),
        ));
        img_cursor = img_end + 1;
    }
}

/// Resolves a file's on-disk extents into an [`ImageChunkList`] given the
/// partition's starting LBA. Each filesystem family implements this from
/// whatever allocation metadata it actually has; every implementation's
/// tail is [`build_chunk_list`].
pub trait ExtentResolver {
    type File;
    type Error;

    fn resolve(
        &mut self,
        file: &mut Self::File,
        partition_start_lba: u64,
    ) -> Result<ImageChunkList, Self::Error>;
}

/// A FAT file's first cluster and byte length — everything a cluster-chain
/// walk needs beyond the FAT table itself.
#[derive(Debug, Clone, Copy)]
pub struct FatFileHandle {
    pub start_cluster: u32,
    pub file_size: u64,
}

/// Walks a FAT32 cluster chain on top of [`vtoy_fat::structures::fat::Fat32`],
/// grouping consecutive clusters into the minimal run list.
pub struct FatExtentResolver<'r, R> {
    pub fat: &'r Fat32,
    pub reader: &'r mut R,
    pub sectors_per_cluster: u32,
    pub data_start_sector: u64,
}

impl<'r, R: Reader> FatExtentResolver<'r, R> {
    fn cluster_chain_runs(&mut self, start_cluster: u32) -> Result<Vec<Run>, ChunkError> {
        let mut runs = Vec::new();
        let mut cluster = start_cluster;
        let mut open_run: Option<(u64, u64)> = None;
        let stride = self.sectors_per_cluster as u64;

        while (2..=0x0FFF_FFF6).contains(&cluster) {
            let cluster_sector = self.data_start_sector + (cluster as u64 - 2) * stride;

            open_run = Some(match open_run {
                Some((start, count)) if start + count == cluster_sector => (start, count + stride),
                Some((start, count)) => {
                    runs.push(Run {
                        disk_start_sector: start,
                        sector_count: count,
                    });
                    (cluster_sector, stride)
                }
                None => (cluster_sector, stride),
            });

            cluster = self
                .fat
                .next_cluster_index(self.reader, cluster)
                .map_err(|_| ChunkError::ReadFailed)?;
        }

        if let Some((start, count)) = open_run {
            runs.push(Run {
                disk_start_sector: start,
                sector_count: count,
            });
        }

        Ok(runs)
    }
}

impl<'r, R: Reader> ExtentResolver for FatExtentResolver<'r, R> {
    type File = FatFileHandle;
    type Error = ChunkError;

    fn resolve(
        &mut self,
        file: &mut FatFileHandle,
        partition_start_lba: u64,
    ) -> Result<ImageChunkList, ChunkError> {
        let runs = self.cluster_chain_runs(file.start_cluster)?;
        build_chunk_list(&runs, partition_start_lba, file.file_size, FsProbe::Fat)
    }
}

/// A UDF file's File Entry block, partition-relative in UDF logical blocks.
#[derive(Debug, Clone, Copy)]
pub struct UdfFileHandle {
    pub file_entry_block: u32,
}

/// Reads a UDF File Entry and converts its allocation descriptors into
/// runs via [`vtoy_udf::fs::runs_from_file_entry`].
pub struct UdfExtentResolver<'r, R> {
    pub reader: &'r mut R,
}

impl<'r, R: Reader> ExtentResolver for UdfExtentResolver<'r, R> {
    type File = UdfFileHandle;
    type Error = ChunkError;

    fn resolve(
        &mut self,
        file: &mut UdfFileHandle,
        partition_start_lba: u64,
    ) -> Result<ImageChunkList, ChunkError> {
        let entry = read_file_entry(self.reader, file.file_entry_block)
            .map_err(|_| ChunkError::ReadFailed)?;
        let runs: Vec<Run> = runs_from_file_entry(&entry)
            .into_iter()
            .map(|r| Run {
                disk_start_sector: r.disk_start_sector,
                sector_count: r.sector_count,
            })
            .collect();
        build_chunk_list(&runs, partition_start_lba, entry.information_length, FsProbe::Udf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_run_becomes_single_chunk_with_partition_offset_applied() {
        let runs = [Run {
            disk_start_sector: 10,
            sector_count: 4,
        }];
        let list = build_chunk_list(&runs, 2048, 2048, FsProbe::Fat).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.as_slice()[0].disk_start(), 2058);
        assert_eq!(list.as_slice()[0].disk_end(), 2061);
    }

    #[test]
    fn udf_runs_are_renumbered_contiguous() {
        let runs = [
            Run {
                disk_start_sector: 0,
                sector_count: 4,
            },
            Run {
                disk_start_sector: 100,
                sector_count: 4,
            },
        ];
        let list = build_chunk_list(&runs, 0, 4096, FsProbe::Udf).unwrap();
        assert_eq!(list.as_slice()[0].img_start(), 0);
        assert_eq!(list.as_slice()[1].img_start(), 1);
    }
}
