//! Linux Injector: finds a boot image's initrd line(s) in its isolinux/grub
//! configs and produces the Virt+Override chunk pair that splices the
//! ventoy cpio overlay in front of the original initrd.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::chunk::{OverrideChunk, VirtChunk, VirtSource};
use crate::menu::TINY_INITRD_NAMES;

/// One initrd path found in a config file, already resolved relative to the
/// config's own directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitrdCandidate {
    pub path: String,
}

fn resolve_relative(config_dir: &str, token: &str) -> String {
    if token.starts_with('/') {
        token.to_string()
    } else if config_dir.ends_with('/') {
        alloc::format!("{config_dir}{token}")
    } else {
        alloc::format!("{config_dir}/{token}")
    }
}

/// Parses one isolinux-style `.cfg` file's text for `initrd=`, `INITRD `, or
/// the Xen `--- /install.img` / `--- initrd.img` syntax, splitting
/// comma-separated values.
pub fn scan_isolinux_cfg(config_dir: &str, text: &str) -> Vec<InitrdCandidate> {
    let mut out = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        let value = if let Some(rest) = trimmed.strip_prefix("initrd=") {
            Some(rest)
        } else if let Some(rest) = trimmed.strip_prefix("INITRD ") {
            Some(rest.trim())
        } else if let Some(idx) = trimmed.find("--- ") {
            Some(trimmed[idx + 4..].trim())
        } else {
            None
        };

        let Some(value) = value else { continue };
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            out.push(InitrdCandidate {
                path: resolve_relative(config_dir, token),
            });
        }
    }
    out
}

/// Parses one grub-style `.cfg`/`.conf` file's text for `initrd` lines.
/// Values containing `$` (a grub variable) are skipped individually, but
/// their presence signals the caller should additionally scan `/boot/` for
/// `initrd*.img`.
pub fn scan_grub_cfg(config_dir: &str, text: &str) -> (Vec<InitrdCandidate>, bool) {
    let mut out = Vec::new();
    let mut has_variable_initrd = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with("initrd") {
            continue;
        }
        let after_keyword = &trimmed["initrd".len()..];
        if !after_keyword.starts_with(|c: char| c.is_whitespace()) {
            continue;
        }
        for token in after_keyword.split_whitespace() {
            let token = token.trim_matches('"').trim_matches('\'');
            if token.contains('$') {
                has_variable_initrd = true;
                continue;
            }
            out.push(InitrdCandidate {
                path: resolve_relative(config_dir, token),
            });
        }
    }

    (out, has_variable_initrd)
}

/// A candidate after looking up its ISO9660 directory-entry position.
#[derive(Debug, Clone)]
pub struct ResolvedInitrd {
    pub candidate: InitrdCandidate,
    pub dirent_byte_offset: u64,
    pub extent_sector: u32,
    pub extent_size: u32,
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Drops candidates too small to plausibly hold the cpio overlay, unless
/// their basename is a known tiny-initrd exception.
pub fn filter_by_size(candidates: Vec<ResolvedInitrd>, overlay_size: u32) -> Vec<ResolvedInitrd> {
    let min_size = overlay_size as u64 + 2048;
    candidates
        .into_iter()
        .filter(|c| {
            c.extent_size as u64 > min_size || TINY_INITRD_NAMES.contains(&basename(&c.candidate.path))
        })
        .collect()
}

/// Extra sectors appended by the Lenovo EasyStartup `append_ext_sector`
/// compatibility mode: one 4 KiB zero region, in 2 KiB image-sector units.
pub const APPEND_EXT_SECTOR_COUNT: u32 = 4096 / 2048;

/// Produces the Virt+Override pair that splices the overlay in front of one
/// resolved initrd. `overlay_sector_start` is where the shared cpio overlay
/// buffer currently sits in the synthetic image's virt region.
///
/// `append_ext_sector` enables the Lenovo EasyStartup compatibility mode: an
/// extra 4 KiB zero region tacked onto the end of the virt range. It is a
/// per-selection flag set by the caller; nothing here auto-detects Lenovo
/// hardware.
pub fn build_injection(
    resolved: &ResolvedInitrd,
    overlay_sector_start: u32,
    overlay_sector_count: u32,
    remap_sector_start: u32,
    append_ext_sector: bool,
) -> (VirtChunk, OverrideChunk) {
    let mut new_sector_count = overlay_sector_count + resolved.extent_size.div_ceil(2048);
    if append_ext_sector {
        new_sector_count += APPEND_EXT_SECTOR_COUNT;
    }
    let virt = VirtChunk {
        remap_sector_start,
        remap_sector_end: remap_sector_start + new_sector_count - 1,
        source: VirtSource::Memory {
            offset: overlay_sector_start,
        },
    };

    let mut override_data = Vec::with_capacity(8);
    override_data.extend_from_slice(&remap_sector_start.to_le_bytes());
    override_data.extend_from_slice(&new_sector_count.to_le_bytes());

    let override_chunk = OverrideChunk {
        img_offset: resolved.dirent_byte_offset,
        override_data,
    };

    (virt, override_chunk)
}

/// A `conf_replace` plugin entry resolved to a byte offset: the ISO9660
/// dirent offset of `orgconf` when `img` is false, or the raw image byte
/// offset of the bytes to patch directly when `img` is true.
#[derive(Debug, Clone, Copy)]
pub struct ConfReplaceTarget {
    pub img: bool,
    pub org_offset: u64,
}

/// Applies one `conf_replace` entry. `img: true` patches the raw image bytes
/// at `target.org_offset` directly (no Virt indirection); `img: false`
/// redirects `orgconf`'s ISO9660 dirent through a Virt region holding
/// `replacement_data`, the same splice shape `build_injection` uses for the
/// initrd override.
pub fn build_conf_replace_injection(
    target: ConfReplaceTarget,
    replacement_data: &[u8],
    remap_sector_start: u32,
) -> (Option<VirtChunk>, OverrideChunk) {
    if target.img {
        let override_chunk = OverrideChunk {
            img_offset: target.org_offset,
            override_data: replacement_data.to_vec(),
        };
        return (None, override_chunk);
    }

    let sector_count = (replacement_data.len() as u32).div_ceil(2048).max(1);
    let virt = VirtChunk {
        remap_sector_start,
        remap_sector_end: remap_sector_start + sector_count - 1,
        source: VirtSource::Memory {
            offset: remap_sector_start,
        },
    };

    let mut override_data = Vec::with_capacity(8);
    override_data.extend_from_slice(&remap_sector_start.to_le_bytes());
    override_data.extend_from_slice(&sector_count.to_le_bytes());

    let override_chunk = OverrideChunk {
        img_offset: target.org_offset,
        override_data,
    };

    (Some(virt), override_chunk)
}

/// Marks a Supplementary Volume Descriptor (type 2) as invalid by zeroing
/// its type byte to `0xFF`, used to suppress Joliet so the patched dirent in
/// the primary tree is what gets read.
pub fn disable_svd(sector: &mut [u8; 2048]) -> bool {
    if sector[0] == 2 {
        sector[0] = 0xFF;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolinux_initrd_line_is_resolved_relative_to_config_dir() {
        let text = "label linux\n  kernel /casper/vmlinuz\n  append initrd=/casper/initrd,/casper/extra\n";
        let candidates = scan_isolinux_cfg("/isolinux", text);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].path, "/casper/initrd");
        assert_eq!(candidates[1].path, "/casper/extra");
    }

    #[test]
    fn grub_variable_initrd_is_skipped_but_flagged() {
        let text = "linux /boot/vmlinuz\ninitrd /boot/initrd.img-$version\n";
        let (candidates, flagged) = scan_grub_cfg("/boot/grub", text);
        assert!(candidates.is_empty());
        assert!(flagged);
    }

    #[test]
    fn grub_plain_initrd_is_resolved() {
        let text = "initrd /boot/initrd.img\n";
        let (candidates, flagged) = scan_grub_cfg("/boot/grub", text);
        assert_eq!(candidates[0].path, "/boot/initrd.img");
        assert!(!flagged);
    }

    #[test]
    fn tiny_known_initrd_survives_overlay_size_filter() {
        let resolved = ResolvedInitrd {
            candidate: InitrdCandidate {
                path: "/boot/initrd.gz".to_string(),
            },
            dirent_byte_offset: 0,
            extent_sector: 0,
            extent_size: 1024,
        };
        let filtered = filter_by_size(alloc::vec![resolved], 2_000_000);
        assert_eq!(filtered.len(), 1);
    }

    fn sample_resolved() -> ResolvedInitrd {
        ResolvedInitrd {
            candidate: InitrdCandidate {
                path: "/arch/boot/initrd.img".to_string(),
            },
            dirent_byte_offset: 8_388_608,
            extent_sector: 4096,
            extent_size: 67_108_864,
        }
    }

    #[test]
    fn append_ext_sector_extends_the_virt_range_by_two_sectors() {
        let resolved = sample_resolved();
        let (without, _) = build_injection(&resolved, 16, 8, 100, false);
        let (with, _) = build_injection(&resolved, 16, 8, 100, true);
        assert_eq!(
            with.remap_sector_end - without.remap_sector_end,
            APPEND_EXT_SECTOR_COUNT
        );
    }

    #[test]
    fn conf_replace_with_img_flag_patches_raw_bytes_directly() {
        let target = ConfReplaceTarget {
            img: true,
            org_offset: 4096,
        };
        let (virt, override_chunk) = build_conf_replace_injection(target, b"new text", 0);
        assert!(virt.is_none());
        assert_eq!(override_chunk.img_offset, 4096);
        assert_eq!(override_chunk.override_data, b"new text");
    }

    #[test]
    fn conf_replace_without_img_flag_redirects_through_a_virt_region() {
        let target = ConfReplaceTarget {
            img: false,
            org_offset: 2048,
        };
        let (virt, override_chunk) = build_conf_replace_injection(target, b"new text", 50);
        let virt = virt.expect("non-img conf_replace uses a virt region");
        assert_eq!(virt.remap_sector_start, 50);
        assert_eq!(override_chunk.img_offset, 2048);
    }

    #[test]
    fn disable_svd_flips_type_byte() {
        let mut sector = [0u8; 2048];
        sector[0] = 2;
        assert!(disable_svd(&mut sector));
        assert_eq!(sector[0], 0xFF);
    }
}
