//! Command Dispatcher: the public surface invoked by the menu engine. A
//! table of `(name, handler)` pairs over a single [`CoreState`]; handlers
//! are stateless functions, all state lives in the `CoreState` they're
//! given.

use alloc::string::String;
use alloc::vec::Vec;

use crate::acpi::{build_acpi_table, ImageLocation};
use crate::chain::{build_chain_head, ChainHeadInputs, DriveMap};
use crate::chunk::{DISK_SECTOR_SIZE, IMG_SECTOR_SIZE};
use crate::linux_inject::{build_injection as build_linux_injection, filter_by_size};
use crate::osparam::OS_PARAM_GUID;
use crate::state::CoreState;
use crate::wim::{build_injection as build_wim_injection, parse_header as parse_wim_header, WimError};

/// Every public command returns a small integer: 0 for success, non-zero
/// halts the containing menu action (per the propagation policy).
pub type CommandResult = i32;

pub const OK: CommandResult = 0;
pub const ERR_BAD_DEVICE: CommandResult = 1;
pub const ERR_UNSUPPORTED_FS: CommandResult = 2;
pub const ERR_UNSUPPORTED_EXTENTS: CommandResult = 3;
pub const ERR_NOT_BOOTABLE: CommandResult = 4;
pub const ERR_MISSING_BOOT_RESOURCE: CommandResult = 5;
pub const ERR_CHECKSUM_MISMATCH: CommandResult = 6;
pub const ERR_OUT_OF_MEMORY: CommandResult = 7;
pub const ERR_CONFIG_ERROR: CommandResult = 8;
pub const ERR_WIM_UNSUPPORTED: CommandResult = 9;

pub type CommandFn = fn(&mut CoreState, &[String]) -> CommandResult;

/// A single named, callable command.
pub struct Command {
    pub name: &'static str,
    pub handler: CommandFn,
}

/// The dispatch table: built once at startup, looked up by name on every
/// menu action.
pub struct Dispatcher {
    commands: Vec<Command>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, handler: CommandFn) {
        self.commands.push(Command { name, handler });
    }

    pub fn dispatch(&self, state: &mut CoreState, name: &str, args: &[String]) -> Option<CommandResult> {
        self.commands
            .iter()
            .find(|c| c.name == name)
            .map(|c| (c.handler)(state, args))
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn cmd_clear_images(state: &mut CoreState, _args: &[String]) -> CommandResult {
    state.clear_menu_tree();
    OK
}

fn cmd_get_image_path(state: &mut CoreState, _args: &[String]) -> CommandResult {
    if state.selection.image_path.is_some() {
        OK
    } else {
        ERR_BAD_DEVICE
    }
}

fn cmd_list_images(state: &mut CoreState, _args: &[String]) -> CommandResult {
    if state.menu_tree.is_empty() {
        ERR_BAD_DEVICE
    } else {
        OK
    }
}

/// Parses the staged header bytes (read by the caller from the UDF/ISO9660
/// dirent the menu entry points at) and caches the result for the producer
/// commands to consume.
fn cmd_open_wim(state: &mut CoreState, _args: &[String]) -> CommandResult {
    let Some(bytes) = state.pending_wim_header_bytes.take() else {
        return ERR_MISSING_BOOT_RESOURCE;
    };
    match parse_wim_header(&bytes) {
        Ok(header) => {
            state.open_wim = Some(header);
            OK
        }
        Err(WimError::UnsupportedCompression) => ERR_WIM_UNSUPPORTED,
        Err(WimError::TooShort | WimError::BadSignature) => ERR_MISSING_BOOT_RESOURCE,
    }
}

fn parse_u64_args(args: &[String], count: usize) -> Option<Vec<u64>> {
    if args.len() < count {
        return None;
    }
    args[..count].iter().map(|s| s.parse::<u64>().ok()).collect()
}

/// Builds and stores the chain head from whatever the caller has
/// accumulated in `state.chunk_list`/`overrides`/`virt`/`os_param`. Shared by
/// every chain-data producer, which differ only in how they populate
/// `overrides`/`virt` beforehand.
fn store_chain_head(state: &mut CoreState) -> CommandResult {
    if state.chunk_list.is_empty() {
        return ERR_UNSUPPORTED_EXTENTS;
    }
    let Some(os_param) = state.os_param.clone() else {
        return ERR_CONFIG_ERROR;
    };

    let chunks = state.chunk_list.as_slice();
    let real_img_size_in_bytes = chunks.iter().map(|c| c.disk_sector_count() * DISK_SECTOR_SIZE).sum();
    let virt_img_size_in_bytes = chunks.iter().map(|c| c.img_sector_count() * IMG_SECTOR_SIZE).sum();

    let inputs = ChainHeadInputs {
        chunks,
        overrides: &state.overrides,
        virt: &state.virt,
        os_param: &os_param,
        disk_drive: 0x80,
        disk_sector_size: DISK_SECTOR_SIZE as u32,
        real_img_size_in_bytes,
        virt_img_size_in_bytes,
        boot_catalog: 0,
        boot_catalog_sector: None,
        drive_map: DriveMap::default(),
    };
    let head = build_chain_head(&inputs);
    let image_path = state.selection.image_path.clone().unwrap_or_default();
    state.replace_chain_head(head, image_path);
    OK
}

fn cmd_produce_raw_chain_data(state: &mut CoreState, _args: &[String]) -> CommandResult {
    state.overrides.clear();
    state.virt.clear();
    store_chain_head(state)
}

/// `args`: `[overlay_sector_start, overlay_sector_count]`. Splices the
/// staged cpio overlay in front of every resolved initrd candidate.
fn cmd_produce_linux_chain_data(state: &mut CoreState, args: &[String]) -> CommandResult {
    let Some(values) = parse_u64_args(args, 2) else {
        return ERR_CONFIG_ERROR;
    };
    let overlay_start = values[0] as u32;
    let overlay_sectors = values[1] as u32;

    let overlay_size = state.cpio_overlay.as_ref().map(|v| v.len() as u32).unwrap_or(0);
    let candidates = core::mem::take(&mut state.pending_initrd_candidates);
    let resolved = filter_by_size(candidates, overlay_size);
    if resolved.is_empty() {
        return ERR_NOT_BOOTABLE;
    }

    state.overrides.clear();
    state.virt.clear();
    let mut remap_cursor = overlay_start;
    for candidate in &resolved {
        let (virt, override_chunk) = build_linux_injection(
            candidate,
            overlay_start,
            overlay_sectors,
            remap_cursor,
            state.lenovo_append_ext_sector,
        );
        remap_cursor = virt.remap_sector_end + 1;
        state.virt.push(virt);
        state.overrides.push(override_chunk);
    }

    store_chain_head(state)
}

/// `args`: `[dirent_byte_offset, udf_partition_desc_offset,
/// udf_file_entry_offset, wim_header_byte_offset, remap_sector_start,
/// total_sector_count]`. Requires `open_wim` to have succeeded and the
/// caller to have staged the rewritten header (via
/// `wim::rewrite_lookup_table`) into `pending_new_wim_header_bytes`.
fn cmd_produce_windows_chain_data(state: &mut CoreState, args: &[String]) -> CommandResult {
    if state.open_wim.is_none() {
        return ERR_MISSING_BOOT_RESOURCE;
    }
    let Some(new_header_bytes) = state.pending_new_wim_header_bytes.take() else {
        return ERR_MISSING_BOOT_RESOURCE;
    };
    let Some(values) = parse_u64_args(args, 6) else {
        return ERR_CONFIG_ERROR;
    };

    let (mut overrides, virt) = build_wim_injection(
        values[0],
        values[1],
        values[2],
        values[3],
        &new_header_bytes,
        values[4] as u32,
        values[5] as u32,
    );

    state.overrides.clear();
    state.virt.clear();
    state.overrides.append(&mut overrides);
    state.virt.push(virt);

    store_chain_head(state)
}

fn cmd_acpi_param_publish(state: &mut CoreState, _args: &[String]) -> CommandResult {
    let Some(os_param) = state.os_param.clone() else {
        return ERR_CONFIG_ERROR;
    };
    let location = ImageLocation::from_chunks(OS_PARAM_GUID, 512, 512, state.chunk_list.as_slice());
    state.acpi_table = Some(build_acpi_table(&os_param, &location));
    OK
}

fn cmd_add_replace_file(state: &mut CoreState, args: &[String]) -> CommandResult {
    let (Some(old_path), Some(new_path)) = (args.first(), args.get(1)) else {
        return ERR_CONFIG_ERROR;
    };
    state.replace_files.push((old_path.clone(), new_path.clone()));
    OK
}

fn cmd_remove_replace_file(state: &mut CoreState, args: &[String]) -> CommandResult {
    let Some(old_path) = args.first() else {
        return ERR_CONFIG_ERROR;
    };
    let before = state.replace_files.len();
    state.replace_files.retain(|(old, _)| old != old_path);
    if state.replace_files.len() == before {
        ERR_CONFIG_ERROR
    } else {
        OK
    }
}

fn cmd_push_last_entry(state: &mut CoreState, args: &[String]) -> CommandResult {
    let Some(entry) = args.first() else {
        return ERR_CONFIG_ERROR;
    };
    state.entry_stack.push(entry.clone());
    OK
}

fn cmd_pop_last_entry(state: &mut CoreState, _args: &[String]) -> CommandResult {
    if state.entry_stack.pop().is_some() {
        OK
    } else {
        ERR_BAD_DEVICE
    }
}

fn cmd_begin_password_context(state: &mut CoreState, _args: &[String]) -> CommandResult {
    state.password_context_depth += 1;
    OK
}

fn cmd_end_password_context(state: &mut CoreState, _args: &[String]) -> CommandResult {
    if state.password_context_depth == 0 {
        return ERR_CONFIG_ERROR;
    }
    state.password_context_depth -= 1;
    OK
}

/// Builds the standard command table: every command spec.md's Command
/// Dispatcher names. Each handler is a pure function of `CoreState` — I/O
/// the original operation would have done directly (reading the WIM header
/// bytes, resolving an initrd's dirent offset) is staged into `CoreState`'s
/// `pending_*` fields by the caller before dispatch runs, since `CommandFn`
/// is a bare function pointer with no closure capture for a live device
/// handle.
pub fn standard_commands() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register("clear_images", cmd_clear_images);
    dispatcher.register("get_image_path", cmd_get_image_path);
    dispatcher.register("list_images", cmd_list_images);
    dispatcher.register("open_wim", cmd_open_wim);
    dispatcher.register("produce_raw_chain_data", cmd_produce_raw_chain_data);
    dispatcher.register("produce_linux_chain_data", cmd_produce_linux_chain_data);
    dispatcher.register("produce_windows_chain_data", cmd_produce_windows_chain_data);
    dispatcher.register("acpi_param_publish", cmd_acpi_param_publish);
    dispatcher.register("add_replace_file", cmd_add_replace_file);
    dispatcher.register("remove_replace_file", cmd_remove_replace_file);
    dispatcher.register("push_last_entry", cmd_push_last_entry);
    dispatcher.register("pop_last_entry", cmd_pop_last_entry);
    dispatcher.register("begin_password_context", cmd_begin_password_context);
    dispatcher.register("end_password_context", cmd_end_password_context);
    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_name_returns_none() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        assert!(dispatcher.dispatch(&mut state, "nonexistent", &[]).is_none());
    }

    #[test]
    fn clear_images_empties_menu_tree() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        state.menu_tree.push(("/".into(), crate::menu::MenuNode::default()));
        let result = dispatcher.dispatch(&mut state, "clear_images", &[]);
        assert_eq!(result, Some(OK));
        assert!(state.menu_tree.is_empty());
    }

    #[test]
    fn get_image_path_fails_with_no_selection() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        assert_eq!(dispatcher.dispatch(&mut state, "get_image_path", &[]), Some(ERR_BAD_DEVICE));
    }

    #[test]
    fn list_images_fails_when_menu_tree_is_empty() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        assert_eq!(dispatcher.dispatch(&mut state, "list_images", &[]), Some(ERR_BAD_DEVICE));
        state.menu_tree.push(("/".into(), crate::menu::MenuNode::default()));
        assert_eq!(dispatcher.dispatch(&mut state, "list_images", &[]), Some(OK));
    }

    fn sample_wim_header_bytes() -> Vec<u8> {
        let mut bytes = alloc::vec![0u8; crate::wim::WIM_HEADER_SIZE];
        bytes[0..8].copy_from_slice(b"MSWIM\0\0\0");
        bytes
    }

    #[test]
    fn open_wim_without_staged_bytes_is_missing_resource() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        assert_eq!(dispatcher.dispatch(&mut state, "open_wim", &[]), Some(ERR_MISSING_BOOT_RESOURCE));
    }

    #[test]
    fn open_wim_parses_staged_header_and_caches_it() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        state.pending_wim_header_bytes = Some(sample_wim_header_bytes());
        assert_eq!(dispatcher.dispatch(&mut state, "open_wim", &[]), Some(OK));
        assert!(state.open_wim.is_some());
        assert!(state.pending_wim_header_bytes.is_none());
    }

    fn sample_os_param() -> crate::osparam::OsParam {
        crate::osparam::OsParam::new(
            1_048_576,
            1,
            crate::osparam::DiskPartType::Fat,
            *b"/x.iso",
            [0u8; 16],
            [0u8; 4],
            524_288,
        )
    }

    #[test]
    fn produce_raw_chain_data_needs_os_param() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        state.chunk_list.push(crate::chunk::ImageChunk::new(0, 0, 100, 103));
        assert_eq!(dispatcher.dispatch(&mut state, "produce_raw_chain_data", &[]), Some(ERR_CONFIG_ERROR));
    }

    #[test]
    fn produce_raw_chain_data_builds_chain_head() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        state.chunk_list.push(crate::chunk::ImageChunk::new(0, 0, 100, 103));
        state.os_param = Some(sample_os_param());
        assert_eq!(dispatcher.dispatch(&mut state, "produce_raw_chain_data", &[]), Some(OK));
        assert!(state.selection.chain_head.is_some());
    }

    #[test]
    fn produce_linux_chain_data_fails_without_surviving_candidates() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        state.chunk_list.push(crate::chunk::ImageChunk::new(0, 0, 100, 103));
        state.os_param = Some(sample_os_param());
        state.cpio_overlay = Some(alloc::vec![0u8; 4096]);
        state.pending_initrd_candidates.push(crate::linux_inject::ResolvedInitrd {
            candidate: crate::linux_inject::InitrdCandidate { path: "/boot/initrd.img".into() },
            dirent_byte_offset: 1024,
            extent_sector: 16,
            extent_size: 100,
        });
        let args = alloc::vec!["16".to_string(), "8".to_string()];
        assert_eq!(dispatcher.dispatch(&mut state, "produce_linux_chain_data", &args), Some(ERR_NOT_BOOTABLE));
    }

    #[test]
    fn produce_linux_chain_data_splices_surviving_candidate() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        state.chunk_list.push(crate::chunk::ImageChunk::new(0, 0, 100, 103));
        state.os_param = Some(sample_os_param());
        state.cpio_overlay = Some(alloc::vec![0u8; 4096]);
        state.pending_initrd_candidates.push(crate::linux_inject::ResolvedInitrd {
            candidate: crate::linux_inject::InitrdCandidate { path: "/boot/initrd.img".into() },
            dirent_byte_offset: 1024,
            extent_sector: 16,
            extent_size: 10_000_000,
        });
        let args = alloc::vec!["16".to_string(), "8".to_string()];
        assert_eq!(dispatcher.dispatch(&mut state, "produce_linux_chain_data", &args), Some(OK));
        assert_eq!(state.overrides.len(), 1);
        assert_eq!(state.virt.len(), 1);
    }

    #[test]
    fn produce_windows_chain_data_requires_open_wim_and_staged_header() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        let args = alloc::vec!["0".to_string(); 6];
        assert_eq!(dispatcher.dispatch(&mut state, "produce_windows_chain_data", &args), Some(ERR_MISSING_BOOT_RESOURCE));

        state.pending_wim_header_bytes = Some(sample_wim_header_bytes());
        dispatcher.dispatch(&mut state, "open_wim", &[]);
        assert_eq!(dispatcher.dispatch(&mut state, "produce_windows_chain_data", &args), Some(ERR_MISSING_BOOT_RESOURCE));
    }

    #[test]
    fn produce_windows_chain_data_builds_chain_head_once_staged() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        state.chunk_list.push(crate::chunk::ImageChunk::new(0, 0, 100, 103));
        state.os_param = Some(sample_os_param());
        state.pending_wim_header_bytes = Some(sample_wim_header_bytes());
        dispatcher.dispatch(&mut state, "open_wim", &[]);
        state.pending_new_wim_header_bytes = Some(sample_wim_header_bytes());

        let args: Vec<String> = ["2048", "4096", "4104", "208", "900", "4"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(dispatcher.dispatch(&mut state, "produce_windows_chain_data", &args), Some(OK));
        assert_eq!(state.overrides.len(), 4);
        assert_eq!(state.virt.len(), 1);
    }

    #[test]
    fn acpi_param_publish_requires_os_param() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        assert_eq!(dispatcher.dispatch(&mut state, "acpi_param_publish", &[]), Some(ERR_CONFIG_ERROR));
        state.os_param = Some(sample_os_param());
        assert_eq!(dispatcher.dispatch(&mut state, "acpi_param_publish", &[]), Some(OK));
        assert!(state.acpi_table.is_some());
    }

    #[test]
    fn add_and_remove_replace_file_round_trip() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        let add_args = alloc::vec!["/boot.wim".to_string(), "/boot2.wim".to_string()];
        assert_eq!(dispatcher.dispatch(&mut state, "add_replace_file", &add_args), Some(OK));
        assert_eq!(state.replace_files.len(), 1);

        let remove_args = alloc::vec!["/boot.wim".to_string()];
        assert_eq!(dispatcher.dispatch(&mut state, "remove_replace_file", &remove_args), Some(OK));
        assert!(state.replace_files.is_empty());
        assert_eq!(dispatcher.dispatch(&mut state, "remove_replace_file", &remove_args), Some(ERR_CONFIG_ERROR));
    }

    #[test]
    fn push_and_pop_last_entry_stack() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        assert_eq!(dispatcher.dispatch(&mut state, "pop_last_entry", &[]), Some(ERR_BAD_DEVICE));
        let push_args = alloc::vec!["/menu/sub".to_string()];
        assert_eq!(dispatcher.dispatch(&mut state, "push_last_entry", &push_args), Some(OK));
        assert_eq!(dispatcher.dispatch(&mut state, "pop_last_entry", &[]), Some(OK));
    }

    #[test]
    fn password_context_rejects_unbalanced_end() {
        let dispatcher = standard_commands();
        let mut state = CoreState::new();
        assert_eq!(dispatcher.dispatch(&mut state, "end_password_context", &[]), Some(ERR_CONFIG_ERROR));
        assert_eq!(dispatcher.dispatch(&mut state, "begin_password_context", &[]), Some(OK));
        assert_eq!(dispatcher.dispatch(&mut state, "end_password_context", &[]), Some(OK));
    }
}
