//! On-disk structures from ECMA-167 needed for read-only traversal: the
//! descriptor tag common to every UDF structure, the ICB tag, and short/long
//! allocation descriptors.

use vtoy_common::types::{
    endian::{Endian, LittleEndian},
    number::{U16, U32},
};

/// Common to every UDF descriptor: identifies its type and protects it with
/// a CRC the caller may choose to validate.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DescriptorTag {
    pub tag_identifier: U16<LittleEndian>,
    pub descriptor_version: U16<LittleEndian>,
    pub tag_checksum: u8,
    pub reserved: u8,
    pub tag_serial_number: U16<LittleEndian>,
    pub descriptor_crc: U16<LittleEndian>,
    pub descriptor_crc_length: U16<LittleEndian>,
    pub tag_location: U32<LittleEndian>,
}

static_assertions::assert_eq_size!(DescriptorTag, [u8; 16]);

pub const TAG_PRIMARY_VOLUME_DESCRIPTOR: u16 = 1;
pub const TAG_FILE_SET_DESCRIPTOR: u16 = 256;
pub const TAG_FILE_ENTRY: u16 = 261;
pub const TAG_EXTENDED_FILE_ENTRY: u16 = 266;

/// A `short_ad`: an extent length plus a block position relative to the
/// containing partition.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShortAllocationDescriptor {
    pub extent_length: U32<LittleEndian>,
    pub extent_position: U32<LittleEndian>,
}

static_assertions::assert_eq_size!(ShortAllocationDescriptor, [u8; 8]);

/// A `long_ad`: like a `short_ad` but carries its own partition reference
/// number instead of inheriting the containing descriptor's partition.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LongAllocationDescriptor {
    pub extent_length: U32<LittleEndian>,
    pub extent_position: U32<LittleEndian>,
    pub partition_reference_number: U16<LittleEndian>,
    pub implementation_use: [u8; 6],
}

static_assertions::assert_eq_size!(LongAllocationDescriptor, [u8; 16]);

/// One run of allocated blocks for a file, in whichever descriptor form the
/// File Entry used.
#[derive(Debug, Clone, Copy)]
pub enum AllocationDescriptor {
    Short(ShortAllocationDescriptor),
    Long(LongAllocationDescriptor),
}

impl AllocationDescriptor {
    pub fn extent_length_bytes(&self) -> u32 {
        match self {
            Self::Short(ad) => ad.extent_length.get(),
            Self::Long(ad) => ad.extent_length.get(),
        }
    }

    pub fn extent_position_blocks(&self) -> u32 {
        match self {
            Self::Short(ad) => ad.extent_position.get(),
            Self::Long(ad) => ad.extent_position.get(),
        }
    }
}

/// `icbtag`: identifies the ICB's strategy type and the allocation
/// descriptor form used by the File Entry that follows it.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IcbTag {
    pub prior_recorded_number_of_direct_entries: U32<LittleEndian>,
    pub strategy_type: U16<LittleEndian>,
    pub strategy_parameter: [u8; 2],
    pub number_of_entries: U16<LittleEndian>,
    pub reserved: u8,
    pub file_type: u8,
    pub parent_icb_location_partition: U16<LittleEndian>,
    pub parent_icb_location_block: U32<LittleEndian>,
    pub flags: U16<LittleEndian>,
}

static_assertions::assert_eq_size!(IcbTag, [u8; 20]);

/// Allocation descriptor form, from the low 3 bits of `icbtag.flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocDescriptorType {
    ShortAd,
    LongAd,
    Extended,
    Inline,
}

impl IcbTag {
    pub fn alloc_descriptor_type(&self) -> AllocDescriptorType {
        match self.flags.get() & 0x7 {
            0 => AllocDescriptorType::ShortAd,
            1 => AllocDescriptorType::LongAd,
            2 => AllocDescriptorType::Extended,
            _ => AllocDescriptorType::Inline,
        }
    }
}

/// The subset of a File Entry's fixed header needed to locate its
/// allocation descriptors: the total length, and where the descriptor list
/// starts after the extended attributes.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FileEntryHeader {
    pub tag: DescriptorTag,
    pub icb_tag: IcbTag,
    pub uid: U32<LittleEndian>,
    pub gid: U32<LittleEndian>,
    pub permissions: U32<LittleEndian>,
    pub file_link_count: U16<LittleEndian>,
    pub record_format: u8,
    pub record_display_attributes: u8,
    pub record_length: U32<LittleEndian>,
    pub information_length: vtoy_common::types::number::U64<LittleEndian>,
    pub logical_blocks_recorded: vtoy_common::types::number::U64<LittleEndian>,
    pub access_time: [u8; 12],
    pub modification_time: [u8; 12],
    pub attribute_time: [u8; 12],
    pub checkpoint: U32<LittleEndian>,
    pub extended_attribute_icb: [u8; 16],
    pub implementation_identifier: [u8; 32],
    pub unique_id: vtoy_common::types::number::U64<LittleEndian>,
    pub length_of_extended_attributes: U32<LittleEndian>,
    pub length_of_allocation_descriptors: U32<LittleEndian>,
}

/// A parsed File Entry: its declared byte size plus the allocation
/// descriptors covering it, already decoded into [`AllocationDescriptor`].
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub information_length: u64,
    pub descriptors: alloc::vec::Vec<AllocationDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;
    use vtoy_common::types::endian::Endian;

    #[test]
    fn icb_tag_flag_selects_short_ad() {
        let mut tag = IcbTag::zeroed();
        tag.flags = U16::new(0);
        assert_eq!(tag.alloc_descriptor_type(), AllocDescriptorType::ShortAd);
    }

    #[test]
    fn icb_tag_flag_selects_long_ad() {
        let mut tag = IcbTag::zeroed();
        tag.flags = U16::new(1);
        assert_eq!(tag.alloc_descriptor_type(), AllocDescriptorType::LongAd);
    }
}
