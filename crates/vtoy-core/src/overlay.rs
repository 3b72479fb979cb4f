//! Assembles the per-selection cpio overlay (component G): the base ventoy
//! initramfs archives spliced together, with the image chunk list and OS
//! param appended as reserved regions and patched in place via
//! [`vtoy_cpio::OverlayCpio`] — the reuse-by-patching optimization the
//! boot-time latency budget depends on, since a full selection change never
//! re-renders the base archive.

use alloc::vec::Vec;

use vtoy_cpio::builder::splice_base_archives;
use vtoy_cpio::header::HEADER_LEN;
use vtoy_cpio::{CpioBuilder, CpioError, OverlayCpio, IMAGE_MAP_ENTRY_NAME};

use crate::chunk::ImageChunkList;
use crate::osparam::{OsParam, OS_PARAM_SIZE};

/// Byte length an entry with `name` and `data_len` occupies once rendered:
/// header (with its own 4-byte padding) plus 4-byte-padded data.
fn rendered_entry_len(name: &str, data_len: u32) -> usize {
    let header_and_name_len = HEADER_LEN + name.len() + 1;
    let padded_header_len = header_and_name_len.div_ceil(4) * 4;
    let padded_data_len = (data_len as usize).div_ceil(4) * 4;
    padded_header_len + padded_data_len
}

/// Builds the full per-selection overlay: splices the arch-independent and
/// arch-specific base archives, reserves the image-map and os_param regions,
/// then immediately patches both from `chunk_list`/`os_param` so the caller
/// gets a ready-to-boot archive back. Later selections reuse the returned
/// [`OverlayCpio`] by calling `set_initrd_entry`/`set_os_param` again instead
/// of calling this a second time.
pub fn build_selection_overlay(
    generic_base: &[u8],
    arch_specific_base: &[u8],
    chunk_list: &ImageChunkList,
    os_param: &OsParam,
) -> Result<OverlayCpio, CpioError> {
    let spliced = splice_base_archives(generic_base, arch_specific_base)?;

    let image_map_size = (chunk_list.len() as u32) * 24;
    let image_map_entry_len = rendered_entry_len(IMAGE_MAP_ENTRY_NAME, image_map_size);

    let mut builder = CpioBuilder::new();
    builder.push_placeholder(IMAGE_MAP_ENTRY_NAME, image_map_size);
    builder.push_os_param_placeholder(spliced.len() + image_map_entry_len, OS_PARAM_SIZE as u32);

    let (builder_bytes, placeholder_ranges) = builder.build()?;

    let base_len = spliced.len();
    let mut bytes = spliced;
    bytes.extend_from_slice(&builder_bytes);

    let absolute_ranges = placeholder_ranges
        .into_iter()
        .map(|(name, range)| (name, (range.start + base_len)..(range.end + base_len)))
        .collect();

    let mut overlay = OverlayCpio::new(bytes, absolute_ranges);
    overlay.set_os_param(&os_param.to_bytes());
    overlay.set_initrd_entry(&image_chunk_bytes(chunk_list));
    Ok(overlay)
}

fn image_chunk_bytes(chunk_list: &ImageChunkList) -> Vec<u8> {
    chunk_list
        .as_slice()
        .iter()
        .flat_map(|chunk| bytemuck::bytes_of(chunk).to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ImageChunk;
    use crate::osparam::DiskPartType;
    use vtoy_cpio::header::{render_header, REGULAR_FILE_MODE, TRAILER_NAME};

    fn minimal_base_archive() -> Vec<u8> {
        let mut bytes = render_header("ventoy/init", 0, 1, REGULAR_FILE_MODE);
        bytes.extend_from_slice(&render_header(TRAILER_NAME, 0, 0, 0));
        bytes
    }

    fn sample_os_param() -> OsParam {
        OsParam::new(
            1_048_576,
            1,
            DiskPartType::ExFat,
            b"/ubuntu.iso".to_vec(),
            [0u8; 16],
            [0u8; 4],
            2_097_152,
        )
    }

    #[test]
    fn build_selection_overlay_splices_and_patches_both_regions() {
        let generic = minimal_base_archive();
        let arch_specific = minimal_base_archive();
        let mut chunk_list = ImageChunkList::new();
        chunk_list.push(ImageChunk::new(0, 0, 100, 103));

        let overlay = build_selection_overlay(&generic, &arch_specific, &chunk_list, &sample_os_param())
            .unwrap();

        let bytes = overlay.bytes();
        let trailer_idx = bytes
            .windows(TRAILER_NAME.len())
            .rposition(|w| w == TRAILER_NAME.as_bytes());
        assert!(trailer_idx.is_some());
        assert!(bytes.len() > generic.len() + arch_specific.len() - HEADER_LEN);
    }

    #[test]
    fn rebuilding_with_a_different_os_param_only_patches_in_place() {
        let generic = minimal_base_archive();
        let arch_specific = minimal_base_archive();
        let chunk_list = ImageChunkList::new();

        let mut overlay =
            build_selection_overlay(&generic, &arch_specific, &chunk_list, &sample_os_param()).unwrap();
        let original_len = overlay.bytes().len();

        let next = sample_os_param();
        assert!(overlay.set_os_param(&next.to_bytes()));
        assert_eq!(overlay.bytes().len(), original_len);
    }
}
