//! Assembles the overlay archive: base ventoy cpio archives concatenated,
//! then per-selection entries appended, ending in the `TRAILER!!!` marker.

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;

use crate::header::{pad_to_4, render_header, REGULAR_FILE_MODE, TRAILER_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum CpioError {
    #[cfg_attr(feature = "std", error("base archive has no TRAILER!!! entry"))]
    MissingTrailer,
    #[cfg_attr(feature = "std", error("duplicate entry name in overlay"))]
    DuplicateName,
}

/// Locates the byte offset where `base`'s trailer entry begins, by scanning
/// for the newc magic `070701` followed immediately by the all-zero inode
/// field that precedes every trailer (the name field that follows is always
/// `TRAILER!!!`).
fn find_trailer_offset(base: &[u8]) -> Option<usize> {
    let needle = b"TRAILER!!!";
    base.windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos.saturating_sub(crate::header::HEADER_LEN))
}

/// Concatenates the arch-independent and arch-specific base archives by
/// truncating the first at its trailer and appending the second in full.
pub fn splice_base_archives(generic: &[u8], arch_specific: &[u8]) -> Result<Vec<u8>, CpioError> {
    let trailer_offset = find_trailer_offset(generic).ok_or(CpioError::MissingTrailer)?;
    let mut out = generic[..trailer_offset].to_vec();
    out.extend_from_slice(arch_specific);
    Ok(out)
}

/// A pending overlay entry: a name plus either concrete data or a
/// placeholder reserved for later in-place patching (the os_param and
/// initrd-head entries, filled just before chain-off without rebuilding the
/// whole archive).
enum Entry {
    Data { name: String, data: Vec<u8> },
    Placeholder { name: String, size: u32 },
}

/// Builds the overlay archive. Entries are appended in the order pushed;
/// inode numbers count down from a high starting value so the final
/// `TRAILER!!!` entry's inode is always lower than every real entry's.
pub struct CpioBuilder {
    entries: Vec<Entry>,
    next_inode: u32,
}

impl CpioBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_inode: 1_000_000,
        }
    }

    pub fn push_file(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.entries.push(Entry::Data {
            name: name.into(),
            data: data.into(),
        });
    }

    /// Reserves `size` bytes of space under `name` without committing data;
    /// the byte range is recorded by [`Self::build`] so a later patch can
    /// overwrite it in place without re-running the builder.
    pub fn push_placeholder(&mut self, name: impl Into<String>, size: u32) {
        self.entries.push(Entry::Placeholder {
            name: name.into(),
            size,
        });
    }

    /// Reserves the `ventoy/ventoy_os_param` placeholder sized so its data
    /// region extends to the next 2 KiB boundary from the archive's current
    /// length — callers must call this last, after every other entry.
    pub fn push_os_param_placeholder(&mut self, current_archive_len: usize, os_param_size: u32) {
        let header_and_name_len = crate::header::HEADER_LEN + "ventoy/ventoy_os_param".len() + 1;
        let padded_header_len = header_and_name_len.div_ceil(4) * 4;
        let after_header = current_archive_len + padded_header_len;
        let next_boundary = after_header.div_ceil(2048) * 2048;
        let size = (next_boundary - after_header).max(os_param_size as usize) as u32;
        self.push_placeholder("ventoy/ventoy_os_param", size);
    }

    /// I8: no two entries (by final archive name) may share a name.
    fn check_unique_names(&self) -> Result<(), CpioError> {
        let mut seen = BTreeSet::new();
        for entry in &self.entries {
            let name = match entry {
                Entry::Data { name, .. } => name,
                Entry::Placeholder { name, .. } => name,
            };
            if !seen.insert(name.clone()) {
                return Err(CpioError::DuplicateName);
            }
        }
        Ok(())
    }

    /// Renders the archive: every pushed entry, then the trailer. Returns
    /// the bytes plus the byte offset of each placeholder's data region (in
    /// push order) so the caller can patch them directly without rebuilding.
    pub fn build(mut self) -> Result<(Vec<u8>, Vec<(String, core::ops::Range<usize>)>), CpioError> {
        self.check_unique_names()?;

        let mut out = Vec::new();
        let mut placeholder_ranges = Vec::new();

        for entry in &self.entries {
            let inode = self.next_inode;
            self.next_inode -= 1;

            match entry {
                Entry::Data { name, data } => {
                    out.extend_from_slice(&render_header(
                        name,
                        data.len() as u32,
                        inode,
                        REGULAR_FILE_MODE,
                    ));
                    out.extend_from_slice(data);
                    pad_to_4(&mut out);
                }
                Entry::Placeholder { name, size } => {
                    out.extend_from_slice(&render_header(name, *size, inode, REGULAR_FILE_MODE));
                    let data_start = out.len();
                    out.extend(core::iter::repeat(0u8).take(*size as usize));
                    placeholder_ranges.push((name.clone(), data_start..data_start + *size as usize));
                    pad_to_4(&mut out);
                }
            }
        }

        out.extend_from_slice(&render_header(TRAILER_NAME, 0, 0, 0));

        Ok((out, placeholder_ranges))
    }
}

impl Default for CpioBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Swaps the active busybox binary: renames `ventoy/busybox/ash` to
/// `ventoy/busybox/32h`, and the sibling 64-bit entry back to `ash`, by
/// rewriting the name fields in place (same length, no archive rebuild).
pub fn select_busybox_arch(archive: &mut [u8], active_64bit: bool) -> usize {
    let (from, to) = if active_64bit {
        ("ventoy/busybox/ash", "ventoy/busybox/32h")
    } else {
        ("ventoy/busybox/64h", "ventoy/busybox/ash")
    };
    rename_entry(archive, from, to)
}

/// The "noinit" variant: renames `init`/`linuxrc`/`sbin`/`sbin/init` to
/// `xxxx`/`vtoyxrc`/`vtoy`/`vtoy/vtoy` so the base archive's own init never
/// runs before ventoy's agent does.
pub fn apply_noinit_renames(archive: &mut [u8]) -> usize {
    let renames = [
        ("init", "xxxx"),
        ("linuxrc", "vtoyxrc"),
        ("sbin", "vtoy"),
        ("sbin/init", "vtoy/vtoy"),
    ];
    renames
        .iter()
        .map(|(from, to)| rename_entry(archive, from, to))
        .sum()
}

fn rename_entry(archive: &mut [u8], from: &str, to: &str) -> usize {
    if from.len() != to.len() {
        return 0;
    }
    let from_bytes = from.as_bytes();
    let to_bytes = to.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i + from_bytes.len() <= archive.len() {
        if &archive[i..i + from_bytes.len()] == from_bytes {
            let before_ok = i == 0 || archive[i - 1] == 0;
            let after_ok = archive.get(i + from_bytes.len()) == Some(&0);
            if before_ok && after_ok {
                archive[i..i + to_bytes.len()].copy_from_slice(to_bytes);
                count += 1;
                i += from_bytes.len();
                continue;
            }
        }
        i += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_entry_names_are_rejected() {
        let mut builder = CpioBuilder::new();
        builder.push_file("ventoy/a", alloc::vec![1, 2, 3]);
        builder.push_file("ventoy/a", alloc::vec![4, 5]);
        assert_eq!(builder.build().unwrap_err(), CpioError::DuplicateName);
    }

    #[test]
    fn archive_ends_with_trailer_entry() {
        let mut builder = CpioBuilder::new();
        builder.push_file("ventoy/ventoy_image_map", alloc::vec![0u8; 24]);
        let (bytes, _) = builder.build().unwrap();
        let trailer_idx = bytes.windows(TRAILER_NAME.len()).rposition(|w| w == TRAILER_NAME.as_bytes());
        assert!(trailer_idx.is_some());
    }

    #[test]
    fn os_param_placeholder_extends_to_2kib_boundary() {
        let mut builder = CpioBuilder::new();
        builder.push_file("ventoy/ventoy_image_map", alloc::vec![0u8; 24]);
        let current_len = {
            // mirror what build() would have produced so far for the length calc
            crate::header::render_header("ventoy/ventoy_image_map", 24, 1, REGULAR_FILE_MODE).len() + 24 + 4
        };
        builder.push_os_param_placeholder(current_len, 256);
        let (bytes, ranges) = builder.build().unwrap();
        let (_name, range) = &ranges[0];
        assert!(bytes.len() >= range.end);
    }

    #[test]
    fn busybox_rename_preserves_length() {
        let mut archive = alloc::vec![0u8; 32];
        archive[4..4 + "ventoy/busybox/ash".len()].copy_from_slice(b"ventoy/busybox/ash");
        let count = select_busybox_arch(&mut archive, true);
        assert_eq!(count, 1);
        assert_eq!(&archive[4..4 + "ventoy/busybox/32h".len()], b"ventoy/busybox/32h");
    }
}
