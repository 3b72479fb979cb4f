//! Block device abstraction for the ventoy image-boot core: sector I/O
//! traits, MBR/GPT partition iteration, and filesystem probing.
//!
//! Everything above the sector level (cluster-chain walking, directory
//! parsing) lives in the per-filesystem crates (`vtoy-fat`, `vtoy-udf`,
//! `vtoy-iso`); this crate only knows how to find where a partition starts
//! and what's likely inside it.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod block;
#[cfg(feature = "alloc")]
pub mod disk;
pub mod error;
pub mod io;

pub use block::{probe_fs, BlockDevice, FsProbe, PartitionWindow};
#[cfg(feature = "alloc")]
pub use disk::{iterate_disks, iterate_partitions, read_disk_signature, Partition};
pub use error::ReadWriteError;
#[cfg(feature = "alloc")]
pub use error::DiskError;
pub use io::{Reader, Writer};
