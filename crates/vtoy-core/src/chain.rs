//! Virtual Disk Composer: assembles the Chain Head blob handed to the next
//! boot stage — a dense `[head | chunks | overrides | virt descriptors |
//! virt memory payload]` layout.

use crate::chunk::{ImageChunk, OverrideChunk, VirtChunk, VirtSource};
use crate::osparam::{OsParam, OS_PARAM_SIZE};

/// Swaps BIOS drive numbers so a legacy Windows guest sees the USB disk as
/// `hd0`. Only meaningful on BIOS boot.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveMap {
    pub enabled: bool,
    pub from_drive: u8,
    pub to_drive: u8,
}

pub struct ChainHeadInputs<'a> {
    pub chunks: &'a [ImageChunk],
    pub overrides: &'a [OverrideChunk],
    pub virt: &'a [VirtChunk],
    pub os_param: &'a OsParam,
    pub disk_drive: u32,
    pub disk_sector_size: u32,
    pub real_img_size_in_bytes: u64,
    pub virt_img_size_in_bytes: u64,
    pub boot_catalog: u32,
    pub boot_catalog_sector: Option<[u8; 512]>,
    pub drive_map: DriveMap,
}

/// Fixed-size header preceding the variable-length sections. Offsets below
/// are relative to the start of the whole blob, not this header.
#[derive(Debug, Clone, Copy)]
struct ChainHeadLayout {
    img_chunk_offset: u32,
    img_chunk_num: u32,
    override_chunk_offset: u32,
    override_chunk_num: u32,
    virt_chunk_offset: u32,
    virt_chunk_num: u32,
    virt_mem_offset: u32,
}

const HEADER_FIXED_LEN: usize = OS_PARAM_SIZE + 4 + 4 + 8 + 8 + 4 + 512 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 1 + 1 + 1;
const IMAGE_CHUNK_SIZE: usize = 24;
const OVERRIDE_HEADER_SIZE: usize = 8 + 4;
const VIRT_CHUNK_SIZE: usize = 4 + 4 + 1 + 4;

/// Builds the chain head blob. Pure function: no allocation state is
/// retained beyond the returned buffer, matching the "freed and reallocated
/// on each selection" lifetime the format requires.
pub fn build_chain_head(inputs: &ChainHeadInputs) -> alloc::vec::Vec<u8> {
    let img_chunk_offset = HEADER_FIXED_LEN as u32;
    let img_chunk_num = inputs.chunks.len() as u32;

    let override_chunk_offset = img_chunk_offset + img_chunk_num * IMAGE_CHUNK_SIZE as u32;
    let override_bytes_len: usize = inputs
        .overrides
        .iter()
        .map(|o| OVERRIDE_HEADER_SIZE + o.override_data.len())
        .sum();
    let override_chunk_num = inputs.overrides.len() as u32;

    let virt_chunk_offset = override_chunk_offset + override_bytes_len as u32;
    let virt_chunk_num = inputs.virt.len() as u32;

    let virt_mem_offset = virt_chunk_offset + virt_chunk_num * VIRT_CHUNK_SIZE as u32;

    let layout = ChainHeadLayout {
        img_chunk_offset,
        img_chunk_num,
        override_chunk_offset,
        override_chunk_num,
        virt_chunk_offset,
        virt_chunk_num,
        virt_mem_offset,
    };

    let mut buf = alloc::vec::Vec::new();
    write_header(&mut buf, inputs, &layout);

    for chunk in inputs.chunks {
        buf.extend_from_slice(bytemuck::bytes_of(chunk));
    }

    for ov in inputs.overrides {
        buf.extend_from_slice(&ov.img_offset.to_le_bytes());
        buf.extend_from_slice(&ov.size().to_le_bytes());
        buf.extend_from_slice(&ov.override_data);
    }

    for virt in inputs.virt {
        buf.extend_from_slice(&virt.remap_sector_start.to_le_bytes());
        buf.extend_from_slice(&virt.remap_sector_end.to_le_bytes());
        match virt.source {
            VirtSource::Memory { offset } => {
                buf.push(0);
                buf.extend_from_slice(&offset.to_le_bytes());
            }
            VirtSource::Remap { org_sector_start } => {
                buf.push(1);
                buf.extend_from_slice(&org_sector_start.to_le_bytes());
            }
        }
    }

    buf
}

fn write_header(buf: &mut alloc::vec::Vec<u8>, inputs: &ChainHeadInputs, layout: &ChainHeadLayout) {
    buf.extend_from_slice(&inputs.os_param.to_bytes());
    buf.extend_from_slice(&inputs.disk_drive.to_le_bytes());
    buf.extend_from_slice(&inputs.disk_sector_size.to_le_bytes());
    buf.extend_from_slice(&inputs.real_img_size_in_bytes.to_le_bytes());
    buf.extend_from_slice(&inputs.virt_img_size_in_bytes.to_le_bytes());
    buf.extend_from_slice(&inputs.boot_catalog.to_le_bytes());
    buf.extend_from_slice(&inputs.boot_catalog_sector.unwrap_or([0u8; 512]));
    buf.extend_from_slice(&layout.img_chunk_offset.to_le_bytes());
    buf.extend_from_slice(&layout.img_chunk_num.to_le_bytes());
    buf.extend_from_slice(&layout.override_chunk_offset.to_le_bytes());
    buf.extend_from_slice(&layout.override_chunk_num.to_le_bytes());
    buf.extend_from_slice(&layout.virt_chunk_offset.to_le_bytes());
    buf.extend_from_slice(&layout.virt_chunk_num.to_le_bytes());
    buf.extend_from_slice(&layout.virt_mem_offset.to_le_bytes());
    buf.push(inputs.drive_map.enabled as u8);
    buf.push(inputs.drive_map.from_drive);
    buf.push(inputs.drive_map.to_drive);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osparam::DiskPartType;

    #[test]
    fn chunk_section_offset_matches_header_and_count() {
        let os_param = OsParam::new(0, 1, DiskPartType::Fat, *b"/x.iso", [0; 16], [0; 4], 0);
        let chunks = [ImageChunk::new(0, 0, 2048, 2051)];
        let inputs = ChainHeadInputs {
            chunks: &chunks,
            overrides: &[],
            virt: &[],
            os_param: &os_param,
            disk_drive: 0x80,
            disk_sector_size: 512,
            real_img_size_in_bytes: 2048,
            virt_img_size_in_bytes: 2048,
            boot_catalog: 0,
            boot_catalog_sector: None,
            drive_map: DriveMap::default(),
        };
        let blob = build_chain_head(&inputs);
        assert_eq!(blob.len(), HEADER_FIXED_LEN + IMAGE_CHUNK_SIZE);

        let offset = u32::from_le_bytes(
            blob[OS_PARAM_SIZE + 4 + 4 + 8 + 8 + 4 + 512..OS_PARAM_SIZE + 4 + 4 + 8 + 8 + 4 + 512 + 4]
                .try_into()
                .unwrap(),
        );
        assert_eq!(offset as usize, HEADER_FIXED_LEN);
    }
}
