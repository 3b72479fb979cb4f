//! `OverlayCpio`: a built archive plus its named placeholder ranges, so the
//! per-selection fields can be patched in place without re-running
//! [`crate::CpioBuilder`] on every boot menu selection.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::ops::Range;

use crate::{CpioBuilder, CpioError};

/// Name of the reserved OS param placeholder, shared with `CpioBuilder::push_os_param_placeholder`.
pub const OS_PARAM_ENTRY_NAME: &str = "ventoy/ventoy_os_param";
/// Name of the reserved image chunk list placeholder.
pub const IMAGE_MAP_ENTRY_NAME: &str = "ventoy/ventoy_image_map";

pub struct OverlayCpio {
    bytes: Vec<u8>,
    placeholders: BTreeMap<String, Range<usize>>,
}

impl OverlayCpio {
    pub fn new(bytes: Vec<u8>, placeholder_ranges: Vec<(String, Range<usize>)>) -> Self {
        Self {
            bytes,
            placeholders: placeholder_ranges.into_iter().collect(),
        }
    }

    /// Builds directly from a [`CpioBuilder`], consuming it.
    pub fn from_builder(builder: CpioBuilder) -> Result<Self, CpioError> {
        let (bytes, ranges) = builder.build()?;
        Ok(Self::new(bytes, ranges))
    }

    /// Patches the `ventoy/ventoy_os_param` placeholder in place. Returns
    /// `false` if the archive reserved no such placeholder, or `os_param` is
    /// larger than the reserved region.
    pub fn set_os_param(&mut self, os_param: &[u8]) -> bool {
        self.patch(OS_PARAM_ENTRY_NAME, os_param)
    }

    /// Patches the `ventoy/ventoy_image_map` placeholder (the per-selection
    /// image chunk list) in place, reused across selections without
    /// rebuilding the whole archive.
    pub fn set_initrd_entry(&mut self, data: &[u8]) -> bool {
        self.patch(IMAGE_MAP_ENTRY_NAME, data)
    }

    fn patch(&mut self, name: &str, data: &[u8]) -> bool {
        let Some(range) = self.placeholders.get(name).cloned() else {
            return false;
        };
        if data.len() > range.len() {
            return false;
        }
        self.bytes[range.start..range.start + data.len()].copy_from_slice(data);
        true
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Swaps the active busybox binary in place; see
    /// [`crate::builder::select_busybox_arch`].
    pub fn select_busybox_arch(&mut self, active_64bit: bool) -> usize {
        crate::builder::select_busybox_arch(&mut self.bytes, active_64bit)
    }

    /// Applies the "noinit" rename variant in place; see
    /// [`crate::builder::apply_noinit_renames`].
    pub fn apply_noinit_renames(&mut self) -> usize {
        crate::builder::apply_noinit_renames(&mut self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_overlay() -> OverlayCpio {
        let mut builder = CpioBuilder::new();
        builder.push_placeholder(IMAGE_MAP_ENTRY_NAME, 48);
        builder.push_placeholder(OS_PARAM_ENTRY_NAME, 256);
        OverlayCpio::from_builder(builder).unwrap()
    }

    #[test]
    fn set_os_param_patches_reserved_region() {
        let mut overlay = sample_overlay();
        let os_param = [7u8; 256];
        assert!(overlay.set_os_param(&os_param));
        let range = overlay.placeholders.get(OS_PARAM_ENTRY_NAME).unwrap().clone();
        assert_eq!(&overlay.bytes[range], &os_param[..]);
    }

    #[test]
    fn set_initrd_entry_patches_image_map_region() {
        let mut overlay = sample_overlay();
        let chunks = [1u8; 24];
        assert!(overlay.set_initrd_entry(&chunks));
        let range = overlay.placeholders.get(IMAGE_MAP_ENTRY_NAME).unwrap().clone();
        assert_eq!(&overlay.bytes[range.start..range.start + 24], &chunks[..]);
    }

    #[test]
    fn patch_too_large_for_placeholder_is_rejected() {
        let mut overlay = sample_overlay();
        let oversized = alloc::vec![0u8; 512];
        assert!(!overlay.set_os_param(&oversized));
    }

    #[test]
    fn patch_of_unknown_name_is_rejected() {
        let mut overlay = sample_overlay();
        assert!(!overlay.patch("ventoy/does_not_exist", &[1]));
    }

    #[test]
    fn select_busybox_arch_renames_in_place_on_the_overlay() {
        let mut builder = CpioBuilder::new();
        builder.push_file("ventoy/busybox/ash", alloc::vec![0u8; 4]);
        let mut overlay = OverlayCpio::from_builder(builder).unwrap();
        let original_len = overlay.bytes().len();
        assert_eq!(overlay.select_busybox_arch(true), 1);
        assert_eq!(overlay.bytes().len(), original_len);
    }
}
