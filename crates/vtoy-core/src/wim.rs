//! Windows/WIM Injector: patches the `winpeshl.exe`/`PECMD.exe` dirent in a
//! WIM's metadata resource to chain-load the ventoy jump stub before the
//! original binary runs.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use sha1::{Digest, Sha1};

use crate::chunk::{OverrideChunk, VirtChunk, VirtSource};

pub const WIM_HEADER_SIZE: usize = 208;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFlag {
    None,
    Xpress,
    Lzx,
    Lzms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WimError {
    TooShort,
    BadSignature,
    UnsupportedCompression,
}

/// One `{offset, size_in_wim, raw_size, flags}` resource descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceHeader {
    pub offset: u64,
    pub size_in_wim: u64,
    pub raw_size: u64,
    pub flags: u32,
}

/// The fields of the 208-byte WIM header this injector needs.
#[derive(Debug, Clone)]
pub struct WimHeader {
    pub version: u32,
    pub flags: u32,
    pub compression: CompressionFlag,
    pub chunk_size: u32,
    pub boot_index: u32,
    pub metadata: ResourceHeader,
    pub lookup: ResourceHeader,
    pub xml: ResourceHeader,
    pub integrity: ResourceHeader,
}

const WIM_SIGNATURE: &[u8; 8] = b"MSWIM\0\0\0";

fn read_resource(bytes: &[u8], offset: usize) -> ResourceHeader {
    ResourceHeader {
        size_in_wim: u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap()) & 0x00FF_FFFF_FFFF_FFFF,
        flags: bytes[offset + 7] as u32,
        offset: u64::from_le_bytes(bytes[offset + 8..offset + 16].try_into().unwrap()),
        raw_size: u64::from_le_bytes(bytes[offset + 16..offset + 24].try_into().unwrap()),
    }
}

/// Parses the 208-byte header and rejects XPRESS compression (WimUnsupported
/// — the caller should fall back to boot-without-patching).
pub fn parse_header(bytes: &[u8]) -> Result<WimHeader, WimError> {
    if bytes.len() < WIM_HEADER_SIZE {
        return Err(WimError::TooShort);
    }
    if &bytes[0..8] != WIM_SIGNATURE {
        return Err(WimError::BadSignature);
    }

    let flags = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    let compression = if flags & 0x0002 != 0 {
        CompressionFlag::Xpress
    } else if flags & 0x0004 != 0 {
        CompressionFlag::Lzx
    } else if flags & 0x0008 != 0 {
        CompressionFlag::Lzms
    } else {
        CompressionFlag::None
    };

    if compression == CompressionFlag::Xpress {
        return Err(WimError::UnsupportedCompression);
    }

    Ok(WimHeader {
        version: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
        flags,
        compression,
        chunk_size: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
        boot_index: u32::from_le_bytes(bytes[176..180].try_into().unwrap()),
        metadata: read_resource(bytes, 24),
        lookup: read_resource(bytes, 48),
        xml: read_resource(bytes, 72),
        integrity: read_resource(bytes, 96),
    })
}

/// Decompresses a WIM resource. LZX decoding is delegated to the caller
/// (a platform-provided LZX decoder); this boundary exists so the core
/// doesn't hard-depend on one decoder implementation.
pub trait WimDecompressor {
    fn decompress_chunk(&self, compressed: &[u8], raw_size: usize) -> Result<Vec<u8>, WimError>;
}

/// Finds the dirent for `Windows/System32/winpeshl.exe`, falling back to
/// `Windows/System32/PECMD.exe`, inside an already-decompressed metadata
/// blob whose directory tree `walk` yields `(path, sha1_hash)` pairs.
pub fn find_replacement_target<'a>(
    entries: impl Iterator<Item = (&'a str, [u8; 20])>,
) -> Option<(String, [u8; 20])> {
    let mut fallback = None;
    for (path, hash) in entries {
        if path.eq_ignore_ascii_case("Windows/System32/winpeshl.exe") {
            return Some((path.to_string(), hash));
        }
        if path.eq_ignore_ascii_case("Windows/System32/PECMD.exe") {
            fallback = Some((path.to_string(), hash));
        }
    }
    fallback
}

/// Builds `[stub | padding to 16B | os_param | runtime_data | original_exe]`
/// and returns it with its SHA-1, 2 KiB-aligned.
pub fn build_replacement_binary(stub: &[u8], os_param: &[u8], runtime_data: &[u8], original_exe: &[u8]) -> (Vec<u8>, [u8; 20]) {
    let mut out = Vec::with_capacity(stub.len() + 16 + os_param.len() + runtime_data.len() + original_exe.len());
    out.extend_from_slice(stub);
    let pad = (16 - (out.len() % 16)) % 16;
    out.extend(core::iter::repeat(0u8).take(pad));
    out.extend_from_slice(os_param);
    out.extend_from_slice(runtime_data);
    out.extend_from_slice(original_exe);

    let align_pad = (2048 - (out.len() % 2048)) % 2048;
    out.extend(core::iter::repeat(0u8).take(align_pad));

    let digest = Sha1::digest(&out);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest);
    (out, hash)
}

/// I9: rewrites every dirent matching `old_hash` to `new_hash`, and returns
/// whether any rewrite happened (used to assert at least the target itself
/// was patched).
pub fn rewrite_matching_hashes(
    entries: &mut [(String, [u8; 20])],
    old_hash: [u8; 20],
    new_hash: [u8; 20],
) -> usize {
    let mut count = 0;
    for (_, hash) in entries.iter_mut() {
        if *hash == old_hash {
            *hash = new_hash;
            count += 1;
        }
    }
    count
}

/// Produces the four Override chunks (dirent rewrite, UDF partition
/// descriptor size, UDF file-entry size, new WIM header) and the single
/// Virt chunk concatenating `[remapped original | replacement | new
/// metadata | new lookup]`.
pub fn build_injection(
    dirent_byte_offset: u64,
    udf_partition_desc_offset: u64,
    udf_file_entry_offset: u64,
    wim_header_byte_offset: u64,
    new_wim_header_bytes: &[u8],
    remap_sector_start: u32,
    total_sector_count: u32,
) -> (Vec<OverrideChunk>, VirtChunk) {
    let overrides = alloc::vec![
        OverrideChunk {
            img_offset: dirent_byte_offset,
            override_data: alloc::vec![0u8; 8],
        },
        OverrideChunk {
            img_offset: udf_partition_desc_offset,
            override_data: alloc::vec![0u8; 4],
        },
        OverrideChunk {
            img_offset: udf_file_entry_offset,
            override_data: alloc::vec![0u8; 8],
        },
        OverrideChunk {
            img_offset: wim_header_byte_offset,
            override_data: new_wim_header_bytes.to_vec(),
        },
    ];

    let virt = VirtChunk {
        remap_sector_start,
        remap_sector_end: remap_sector_start + total_sector_count - 1,
        source: VirtSource::Remap {
            org_sector_start: remap_sector_start,
        },
    };

    (overrides, virt)
}

/// Bit 1 of a lookup entry's resource flags byte, marking it as the
/// directory-tree metadata resource rather than a stream.
pub const LOOKUP_METADATA_FLAG: u32 = 0x02;

pub const LOOKUP_ENTRY_SIZE: usize = 50;

/// One 50-byte lookup-table entry: a resource header plus the part number,
/// reference count, and SHA-1 hash that key it.
#[derive(Debug, Clone, Copy)]
pub struct LookupEntry {
    pub resource: ResourceHeader,
    pub part_number: u16,
    pub ref_count: u32,
    pub hash: [u8; 20],
}

fn read_lookup_entry(bytes: &[u8]) -> LookupEntry {
    LookupEntry {
        resource: read_resource(bytes, 0),
        part_number: u16::from_le_bytes(bytes[24..26].try_into().unwrap()),
        ref_count: u32::from_le_bytes(bytes[26..30].try_into().unwrap()),
        hash: bytes[30..50].try_into().unwrap(),
    }
}

fn write_resource(buf: &mut Vec<u8>, resource: &ResourceHeader) {
    let size_with_flags = (resource.size_in_wim & 0x00FF_FFFF_FFFF_FFFF) | ((resource.flags as u64 & 0xFF) << 56);
    buf.extend_from_slice(&size_with_flags.to_le_bytes());
    buf.extend_from_slice(&resource.offset.to_le_bytes());
    buf.extend_from_slice(&resource.raw_size.to_le_bytes());
}

fn write_lookup_entry(buf: &mut Vec<u8>, entry: &LookupEntry) {
    write_resource(buf, &entry.resource);
    buf.extend_from_slice(&entry.part_number.to_le_bytes());
    buf.extend_from_slice(&entry.ref_count.to_le_bytes());
    buf.extend_from_slice(&entry.hash);
}

/// Splits a raw lookup-table resource into its 50-byte entries. A partial
/// trailing entry (a truncated resource) is dropped rather than panicking.
pub fn parse_lookup_table(bytes: &[u8]) -> Vec<LookupEntry> {
    bytes
        .chunks_exact(LOOKUP_ENTRY_SIZE)
        .map(read_lookup_entry)
        .collect()
}

pub fn find_lookup_entry(entries: &[LookupEntry], hash: [u8; 20]) -> Option<&LookupEntry> {
    entries.iter().find(|e| e.hash == hash)
}

/// Finds the `boot_index`-th (1-based) entry flagged as metadata, matching
/// how a multi-image WIM orders its metadata resources by image index.
pub fn find_metadata_lookup_entry(entries: &[LookupEntry], boot_index: u32) -> Option<&LookupEntry> {
    entries
        .iter()
        .filter(|e| e.resource.flags & LOOKUP_METADATA_FLAG != 0)
        .nth(boot_index.saturating_sub(1) as usize)
}

/// Step 4 of the injection: points the old-file lookup entry at the
/// replacement binary's hash, and repoints the boot image's metadata lookup
/// entry at the rewritten metadata's location and SHA-1 (I9).
pub fn rewrite_lookup_table(
    lookup_bytes: &[u8],
    old_file_hash: [u8; 20],
    new_file_hash: [u8; 20],
    boot_index: u32,
    new_metadata_bytes: &[u8],
    new_metadata_offset: u64,
) -> Vec<u8> {
    let mut entries = parse_lookup_table(lookup_bytes);

    if let Some(pos) = entries.iter().position(|e| e.hash == old_file_hash) {
        entries[pos].hash = new_file_hash;
    }

    let digest = Sha1::digest(new_metadata_bytes);
    let mut metadata_hash = [0u8; 20];
    metadata_hash.copy_from_slice(&digest);

    let metadata_pos = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.resource.flags & LOOKUP_METADATA_FLAG != 0)
        .nth(boot_index.saturating_sub(1) as usize)
        .map(|(i, _)| i);

    if let Some(pos) = metadata_pos {
        entries[pos].hash = metadata_hash;
        entries[pos].resource.size_in_wim = new_metadata_bytes.len() as u64;
        entries[pos].resource.raw_size = new_metadata_bytes.len() as u64;
        entries[pos].resource.offset = new_metadata_offset;
    }

    let mut out = Vec::with_capacity(entries.len() * LOOKUP_ENTRY_SIZE);
    for entry in &entries {
        write_lookup_entry(&mut out, entry);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lookup_entry(flags: u32, part_number: u16, hash: [u8; 20]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LOOKUP_ENTRY_SIZE);
        write_lookup_entry(
            &mut buf,
            &LookupEntry {
                resource: ResourceHeader {
                    offset: 0x1000,
                    size_in_wim: 100,
                    raw_size: 100,
                    flags,
                },
                part_number,
                ref_count: 1,
                hash,
            },
        );
        buf
    }

    #[test]
    fn lookup_table_round_trips_through_parse() {
        let mut table = sample_lookup_entry(0, 1, [1u8; 20]);
        table.extend(sample_lookup_entry(LOOKUP_METADATA_FLAG, 1, [2u8; 20]));
        let entries = parse_lookup_table(&table);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].hash, [2u8; 20]);
        assert_eq!(entries[1].resource.flags & LOOKUP_METADATA_FLAG, LOOKUP_METADATA_FLAG);
    }

    #[test]
    fn metadata_entry_is_found_by_flag_and_boot_index() {
        let mut table = sample_lookup_entry(LOOKUP_METADATA_FLAG, 1, [1u8; 20]);
        table.extend(sample_lookup_entry(LOOKUP_METADATA_FLAG, 2, [2u8; 20]));
        let entries = parse_lookup_table(&table);
        let found = find_metadata_lookup_entry(&entries, 2).unwrap();
        assert_eq!(found.hash, [2u8; 20]);
    }

    #[test]
    fn rewrite_lookup_table_updates_both_target_entries() {
        let mut table = sample_lookup_entry(0, 0, [0xAA; 20]);
        table.extend(sample_lookup_entry(LOOKUP_METADATA_FLAG, 1, [0xBB; 20]));
        let new_metadata = alloc::vec![7u8; 64];
        let rewritten = rewrite_lookup_table(&table, [0xAA; 20], [0xCC; 20], 1, &new_metadata, 0x9000);

        let entries = parse_lookup_table(&rewritten);
        assert_eq!(entries[0].hash, [0xCC; 20]);

        let digest = Sha1::digest(&new_metadata);
        let mut expected_hash = [0u8; 20];
        expected_hash.copy_from_slice(&digest);
        assert_eq!(entries[1].hash, expected_hash);
        assert_eq!(entries[1].resource.offset, 0x9000);
        assert_eq!(entries[1].resource.raw_size, new_metadata.len() as u64);
    }

    fn sample_header(flags: u32) -> Vec<u8> {
        let mut bytes = alloc::vec![0u8; WIM_HEADER_SIZE];
        bytes[0..8].copy_from_slice(WIM_SIGNATURE);
        bytes[16..20].copy_from_slice(&flags.to_le_bytes());
        bytes
    }

    #[test]
    fn xpress_compression_is_rejected() {
        let bytes = sample_header(0x0002);
        assert_eq!(parse_header(&bytes), Err(WimError::UnsupportedCompression));
    }

    #[test]
    fn lzx_compression_parses() {
        let bytes = sample_header(0x0004);
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.compression, CompressionFlag::Lzx);
    }

    #[test]
    fn winpeshl_found_before_pecmd_fallback() {
        let entries = [
            ("Windows/System32/PECMD.exe", [1u8; 20]),
            ("Windows/System32/winpeshl.exe", [2u8; 20]),
        ];
        let (path, hash) = find_replacement_target(entries.into_iter()).unwrap();
        assert_eq!(path, "Windows/System32/winpeshl.exe");
        assert_eq!(hash, [2u8; 20]);
    }

    #[test]
    fn replacement_binary_is_2kib_aligned_and_hashes() {
        let (bytes, hash) = build_replacement_binary(&[1, 2, 3], &[0u8; 256], &[9, 9], &[0xAA; 100]);
        assert_eq!(bytes.len() % 2048, 0);
        assert_eq!(Sha1::digest(&bytes).as_slice(), hash.as_slice());
    }

    #[test]
    fn rewrite_matching_hashes_updates_all_occurrences() {
        let mut entries = alloc::vec![
            ("a".to_string(), [1u8; 20]),
            ("b".to_string(), [2u8; 20]),
            ("c".to_string(), [1u8; 20]),
        ];
        let count = rewrite_matching_hashes(&mut entries, [1u8; 20], [9u8; 20]);
        assert_eq!(count, 2);
        assert_eq!(entries[0].1, [9u8; 20]);
        assert_eq!(entries[2].1, [9u8; 20]);
    }
}
