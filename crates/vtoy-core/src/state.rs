//! The single owned `CoreState`: the in-process equivalent of the original
//! named globals (chain-head pointer, cpio buffer, chunk list, VLNK cache,
//! plugin tables), held by whoever drives the command dispatcher.

use alloc::string::String;
use alloc::vec::Vec;

use vtoy_part::{BlockDevice, DiskError};

use crate::chunk::{ImageChunkList, OverrideChunk, VirtChunk};
use crate::linux_inject::ResolvedInitrd;
use crate::menu::MenuNode;
use crate::osparam::OsParam;
use crate::plugin::VentoyConfig;
use crate::vlnk::{self, VlnkPartitionIndex};
use crate::wim::WimHeader;
use vtoy_cpio::CpioError;

/// Freed and reallocated on every selection; absent between selections.
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    pub chain_head: Option<Vec<u8>>,
    pub image_path: Option<String>,
}

/// The whole-session state a single-threaded core owns. There is exactly
/// one of these; re-entrant menu handling for the secondary (boot-mode)
/// menu is kept disjoint by the caller, not by this struct.
#[derive(Debug, Clone, Default)]
pub struct CoreState {
    pub selection: SelectionState,
    pub cpio_overlay: Option<Vec<u8>>,
    pub plugin_config: VentoyConfig,
    pub vlnk_index: VlnkPartitionIndex,
    pub menu_tree: Vec<(String, MenuNode)>,

    /// The selected image's extents, staged by the caller's Extent Resolver
    /// call before any chain-data command runs.
    pub chunk_list: ImageChunkList,
    pub overrides: Vec<OverrideChunk>,
    pub virt: Vec<VirtChunk>,
    pub os_param: Option<OsParam>,

    /// The currently open WIM's parsed header, set by `open_wim`.
    pub open_wim: Option<WimHeader>,
    /// Raw 208-byte WIM header bytes, staged by the caller (who did the
    /// actual disk read) before invoking `open_wim`.
    pub pending_wim_header_bytes: Option<Vec<u8>>,
    /// The rewritten metadata+lookup-table header bytes produced by
    /// `wim::rewrite_lookup_table`, staged before `produce_windows_chain_data`.
    pub pending_new_wim_header_bytes: Option<Vec<u8>>,
    /// Initrd candidates already resolved to ISO9660 dirent offsets by the
    /// caller, consumed by `produce_linux_chain_data`.
    pub pending_initrd_candidates: Vec<ResolvedInitrd>,

    pub acpi_table: Option<Vec<u8>>,
    /// `(old_path, new_path)` pairs registered by `add_replace_file`.
    pub replace_files: Vec<(String, String)>,
    /// Lenovo EasyStartup `append_ext_sector` compatibility mode: a
    /// per-selection flag the caller sets explicitly. There is no automatic
    /// hardware detection; it is configured out-of-band.
    pub lenovo_append_ext_sector: bool,
    /// The menu's "last entry" stack, for the boot-mode secondary menu.
    pub entry_stack: Vec<String>,
    /// Nesting depth of `begin_password_context`/`end_password_context`.
    pub password_context_depth: u32,
}

impl CoreState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frees the current chain head before building a new one, matching the
    /// "never half-built" consistency rule: a failed rebuild leaves
    /// `selection` at its prior, fully-valid state via the caller not
    /// calling this until the replacement is ready.
    pub fn replace_chain_head(&mut self, new_head: Vec<u8>, image_path: String) {
        self.selection = SelectionState {
            chain_head: Some(new_head),
            image_path: Some(image_path),
        };
    }

    pub fn clear_chain_head(&mut self) {
        self.selection = SelectionState::default();
    }

    /// Fully frees the image list before every re-enumeration.
    pub fn clear_menu_tree(&mut self) {
        self.menu_tree.clear();
    }

    /// Replaces the cached menu tree with a freshly enumerated one, applying
    /// the currently loaded plugin config's `menu_alias`/`menu_class`/
    /// `menu_tip`/`menu_password` tables to every image before storing it.
    pub fn set_menu_tree(&mut self, mut tree: Vec<(String, MenuNode)>) {
        crate::menu::apply_plugin_tables(&mut tree, &self.plugin_config);
        self.menu_tree = tree;
    }

    pub fn reload_plugin_config(&mut self, config: VentoyConfig) {
        self.plugin_config = config;
    }

    /// Assembles the per-selection cpio overlay from the caller-staged base
    /// archives (read from disk by the embedding caller, since this crate
    /// never touches storage) plus the already-resolved chunk list, storing
    /// the result for `produce_linux_chain_data` to splice ahead of the
    /// resolved initrd candidates.
    pub fn assemble_cpio_overlay(
        &mut self,
        generic_base: &[u8],
        arch_specific_base: &[u8],
        os_param: &OsParam,
    ) -> Result<(), CpioError> {
        let overlay = crate::overlay::build_selection_overlay(
            generic_base,
            arch_specific_base,
            &self.chunk_list,
            os_param,
        )?;
        self.cpio_overlay = Some(overlay.into_bytes());
        Ok(())
    }

    /// Rebuilds the VLNK partition index from scratch by walking every
    /// attached disk, replacing whatever index was built before. Matches the
    /// "built lazily, never freed mid-session" rule: callers only invoke this
    /// once, on first VLNK resolution.
    pub fn rebuild_vlnk_index(
        &mut self,
        disks: &mut [&mut dyn BlockDevice],
        install_disk_signature: u32,
    ) -> Result<(), DiskError> {
        self.vlnk_index = vlnk::build_partition_index(disks, install_disk_signature)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacing_chain_head_overwrites_prior_selection() {
        let mut state = CoreState::new();
        state.replace_chain_head(alloc::vec![1, 2, 3], "/a.iso".into());
        assert!(state.selection.chain_head.is_some());
        state.replace_chain_head(alloc::vec![4, 5], "/b.iso".into());
        assert_eq!(state.selection.chain_head.as_ref().unwrap(), &alloc::vec![4, 5]);
    }

    #[test]
    fn clearing_menu_tree_empties_it() {
        let mut state = CoreState::new();
        state.menu_tree.push(("/".into(), MenuNode::default()));
        state.clear_menu_tree();
        assert!(state.menu_tree.is_empty());
    }

    #[test]
    fn setting_menu_tree_applies_loaded_plugin_config() {
        let mut state = CoreState::new();
        let mut config = VentoyConfig::default();
        config.menu_alias.push(crate::plugin::MatchKey::Image("/a.iso".into()), "Alpha".into());
        state.reload_plugin_config(config);

        let node = crate::menu::MenuNode {
            dirs: Vec::new(),
            images: alloc::vec![crate::menu::MenuImage {
                path: "/a.iso".into(),
                name: "a.iso".into(),
                ty: crate::menu::ImageType::Iso,
                size: 1,
                alias: None,
                class: None,
                tip1: None,
                tip2: None,
                password_protected: false,
            }],
        };
        state.set_menu_tree(alloc::vec![("/".to_string(), node)]);
        assert_eq!(state.menu_tree[0].1.images[0].alias.as_deref(), Some("Alpha"));
    }

    #[test]
    fn assembling_cpio_overlay_stages_real_bytes_for_sizing() {
        use vtoy_cpio::header::{render_header, REGULAR_FILE_MODE, TRAILER_NAME};

        let mut base = render_header("ventoy/init", 0, 1, REGULAR_FILE_MODE);
        base.extend_from_slice(&render_header(TRAILER_NAME, 0, 0, 0));

        let os_param = OsParam::new(
            1_048_576,
            1,
            crate::osparam::DiskPartType::ExFat,
            b"/ubuntu.iso".to_vec(),
            [0u8; 16],
            [0u8; 4],
            2_097_152,
        );

        let mut state = CoreState::new();
        state.chunk_list.push(crate::chunk::ImageChunk::new(0, 0, 100, 103));
        assert!(state.assemble_cpio_overlay(&base, &base, &os_param).is_ok());
        assert!(state.cpio_overlay.as_ref().unwrap().len() > base.len());
    }
}
