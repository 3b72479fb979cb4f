//! A read-only UDF (Universal Disk Format / ECMA-167) reader: volume
//! recognition, the file set, and the allocation-descriptor walk an extent
//! resolver needs to enumerate a file's on-disk runs.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod descriptor;
#[cfg(feature = "read")]
pub mod fs;
#[cfg(feature = "read")]
pub use fs::*;

pub use descriptor::{AllocationDescriptor, FileEntry, IcbTag};
