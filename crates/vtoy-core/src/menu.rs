//! Menu Enumerator: breadth-first directory walk producing the boot menu
//! tree, plus the VLNK short-circuit and the file-type/size filters that
//! gate which files become menu entries.

use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// Minimum file size to be considered a bootable image, unless the name
/// matches a known tiny-initrd exception.
pub const MIN_FILE_SIZE: u64 = 32 * 1024;

/// Names exempt from [`MIN_FILE_SIZE`] — tiny initrds seen in the wild that
/// are still legitimate boot targets.
pub const TINY_INITRD_NAMES: &[&str] = &["initrd.gz", "initrd.xz", "minirt.gz"];

const TRASH_DIRS: &[&str] = &[
    "$RECYCLE.BIN",
    "$Extend",
    ".Trashes",
    "System Volume Information",
];

fn is_trash_dir(name: &str) -> bool {
    TRASH_DIRS.contains(&name) || name.starts_with(".trash-")
}

/// The image type suffixes the enumerator recognizes, individually
/// toggleable via plugin `control` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Iso,
    Wim,
    Efi,
    Img,
    Vhd,
    Vtoy,
}

impl ImageType {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "iso" => Some(Self::Iso),
            "wim" => Some(Self::Wim),
            "efi" => Some(Self::Efi),
            "img" => Some(Self::Img),
            "vhd" | "vhdx" => Some(Self::Vhd),
            "vtoy" => Some(Self::Vtoy),
            _ => None,
        }
    }

    pub fn class_str(self) -> &'static str {
        match self {
            Self::Iso => "vtoyiso",
            Self::Wim => "vtoywim",
            Self::Efi => "vtoyefi",
            Self::Img => "vtoyimg",
            Self::Vhd => "vtoyvhd",
            Self::Vtoy => "vtoyvtoy",
        }
    }

    pub fn menu_prefix(self) -> &'static str {
        match self {
            Self::Iso => "iso",
            Self::Wim => "wim",
            Self::Efi => "efi",
            Self::Img => "img",
            Self::Vhd => "vhd",
            Self::Vtoy => "vtoy",
        }
    }
}

/// Which extensions are currently enabled, one flag per [`ImageType`].
#[derive(Debug, Clone, Copy)]
pub struct TypeFilter {
    pub iso: bool,
    pub wim: bool,
    pub efi: bool,
    pub img: bool,
    pub vhd: bool,
    pub vtoy: bool,
}

impl Default for TypeFilter {
    fn default() -> Self {
        Self {
            iso: true,
            wim: true,
            efi: true,
            img: true,
            vhd: true,
            vtoy: true,
        }
    }
}

impl TypeFilter {
    pub fn allows(&self, ty: ImageType) -> bool {
        match ty {
            ImageType::Iso => self.iso,
            ImageType::Wim => self.wim,
            ImageType::Efi => self.efi,
            ImageType::Img => self.img,
            ImageType::Vhd => self.vhd,
            ImageType::Vtoy => self.vtoy,
        }
    }
}

/// Allow-list / deny-list membership, driven by the Plugin Store's
/// `image_list`/`image_blacklist` (exactly one is active at a time).
#[derive(Debug, Clone)]
pub enum ListPolicy {
    None,
    Allow(Vec<String>),
    Deny(Vec<String>),
}

impl ListPolicy {
    /// Returns `Some(index)` when an allow-list is active and the path is a
    /// member (used as the primary sort key, I7); `None` otherwise (for a
    /// deny-list, `None` means "not excluded").
    fn allow_index(&self, path: &str) -> Option<usize> {
        match self {
            Self::Allow(list) => list.iter().position(|p| p == path),
            _ => None,
        }
    }

    fn permits(&self, path: &str) -> bool {
        match self {
            Self::None => true,
            Self::Allow(list) => list.iter().any(|p| p == path),
            Self::Deny(list) => !list.iter().any(|p| p == path),
        }
    }
}

/// A single raw directory entry as handed back by an `fs.dir()` callback.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// What the directory walk decided to do with one entry.
#[derive(Debug, Clone)]
pub enum Decision {
    Directory { path: String },
    Image { path: String, ty: ImageType, size: u64 },
    VlnkCandidate { path: String },
    /// An `xxx.vcfg` file; `image_path` is `xxx` with the `.vcfg` suffix
    /// stripped, `vcfg_path` is the file actually found.
    CustomBootHook { image_path: String, vcfg_path: String },
    Ignored,
}

pub struct EnumeratorConfig {
    pub type_filter: TypeFilter,
    pub list_policy: ListPolicy,
    pub case_sensitive: bool,
    pub filter_dot_underscore: bool,
    pub filter_trash_dirs: bool,
    pub max_search_level: u32,
}

impl Default for EnumeratorConfig {
    fn default() -> Self {
        Self {
            type_filter: TypeFilter::default(),
            list_policy: ListPolicy::None,
            case_sensitive: false,
            filter_dot_underscore: true,
            filter_trash_dirs: true,
            max_search_level: u32::MAX,
        }
    }
}

const EXCLUDED_BASENAMES: &[&str] = &["ventoy_wimboot.img", "ventoy_vhdboot.img"];

/// Decides what to do with one directory entry. `ventoyignore_present`
/// short-circuits the whole directory by being checked by the caller before
/// iterating entries at all (a `.ventoyignore` file aborts with an empty
/// result, so it never reaches this function).
pub fn classify_entry(
    cfg: &EnumeratorConfig,
    dir_path: &str,
    entry: &RawEntry,
) -> Decision {
    if entry.name == "." || entry.name == ".." {
        return Decision::Ignored;
    }

    let full_path = join_path(dir_path, &entry.name);

    if entry.is_dir {
        if cfg.filter_trash_dirs && is_trash_dir(&entry.name) {
            return Decision::Ignored;
        }
        if cfg.filter_dot_underscore && entry.name.starts_with("._") {
            return Decision::Ignored;
        }
        if let ListPolicy::Allow(_) = &cfg.list_policy {
            if cfg.list_policy.allow_index(&full_path).is_none()
                && !path_has_listed_descendant(&cfg.list_policy, &full_path)
            {
                return Decision::Ignored;
            }
        }
        return Decision::Directory { path: full_path };
    }

    if EXCLUDED_BASENAMES.contains(&entry.name.as_str()) {
        return Decision::Ignored;
    }

    if is_vcfg_name(&entry.name) {
        let image_name = &entry.name[..entry.name.len() - ".vcfg".len()];
        return Decision::CustomBootHook {
            image_path: join_path(dir_path, image_name),
            vcfg_path: full_path,
        };
    }

    let ext = extension_of(&entry.name);
    let ty = ext.and_then(ImageType::from_extension);

    if is_vlnk_name(&entry.name) || entry.size == 0 {
        return Decision::VlnkCandidate { path: full_path };
    }

    let Some(ty) = ty else {
        return Decision::Ignored;
    };
    if !cfg.type_filter.allows(ty) {
        return Decision::Ignored;
    }
    if !cfg.list_policy.permits(&full_path) {
        return Decision::Ignored;
    }
    if entry.size < MIN_FILE_SIZE && !TINY_INITRD_NAMES.contains(&entry.name.as_str()) {
        return Decision::Ignored;
    }

    Decision::Image {
        path: full_path,
        ty,
        size: entry.size,
    }
}

fn path_has_listed_descendant(policy: &ListPolicy, dir_path: &str) -> bool {
    match policy {
        ListPolicy::Allow(list) => {
            let prefix = if dir_path.ends_with('/') {
                dir_path.to_string()
            } else {
                alloc::format!("{dir_path}/")
            };
            list.iter().any(|p| p.starts_with(&prefix))
        }
        _ => true,
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        alloc::format!("{dir}{name}")
    } else {
        alloc::format!("{dir}/{name}")
    }
}

fn extension_of(name: &str) -> Option<&str> {
    let dot = name.rfind('.')?;
    if dot == 0 {
        return None;
    }
    Some(&name[dot + 1..])
}

fn is_vlnk_name(name: &str) -> bool {
    name.contains(".vlnk.")
}

fn is_vcfg_name(name: &str) -> bool {
    name.ends_with(".vcfg")
}

/// A menu entry chosen for emission, paired with its sort key inputs.
#[derive(Debug, Clone)]
pub struct MenuImage {
    pub path: String,
    pub name: String,
    pub ty: ImageType,
    pub size: u64,
    /// `menu_alias` override for the displayed name, if the Plugin Store
    /// has one for this path.
    pub alias: Option<String>,
    /// `menu_class` override for the `--class=` string, if present.
    pub class: Option<String>,
    pub tip1: Option<String>,
    pub tip2: Option<String>,
    /// Set once `apply_plugin_tables` finds this path in `menu_password`;
    /// the password string itself is kept out of `MenuImage` and looked up
    /// again from `VentoyConfig` only when a boot attempt needs it.
    pub password_protected: bool,
}

#[derive(Debug, Clone)]
pub struct MenuDir {
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct MenuNode {
    pub dirs: Vec<MenuDir>,
    pub images: Vec<MenuImage>,
}

/// Stable sort per I7: when an allow-list is active its order wins;
/// otherwise names sort case-insensitively (default) by upper-cased
/// codepoints. Directories and files are sorted independently.
pub fn sort_siblings(node: &mut MenuNode, policy: &ListPolicy, case_sensitive: bool) {
    let key = |name: &str| -> String {
        if case_sensitive {
            name.to_string()
        } else {
            name.to_uppercase()
        }
    };

    node.dirs.sort_by(|a, b| key(&a.name).cmp(&key(&b.name)));

    if let ListPolicy::Allow(list) = policy {
        node.images.sort_by_key(|img| {
            list.iter()
                .position(|p| p == &img.path)
                .unwrap_or(usize::MAX)
        });
    } else {
        node.images.sort_by(|a, b| key(&a.name).cmp(&key(&b.name)));
    }
}

/// A pending directory in the breadth-first walk.
struct IteratorNode {
    path: String,
    depth: u32,
}

/// Walks `root` breadth-first, invoking `list_dir` for each directory and
/// folding its entries through [`classify_entry`]. Returns the built tree as
/// `(directory path, MenuNode)` pairs, the collected VLNK candidates (the
/// caller resolves those separately, per §4.E.1), and the collected
/// `(image_path, vcfg_path)` custom-boot hooks (the caller reads each
/// `vcfg_path`'s text and calls `plugin::register_custom_boot`).
pub fn enumerate(
    cfg: &EnumeratorConfig,
    root: &str,
    mut list_dir: impl FnMut(&str) -> Option<Vec<RawEntry>>,
    mut has_ventoyignore: impl FnMut(&str) -> bool,
) -> (Vec<(String, MenuNode)>, Vec<String>, Vec<(String, String)>) {
    let mut queue = VecDeque::new();
    queue.push_back(IteratorNode {
        path: root.to_string(),
        depth: 0,
    });

    let mut tree = Vec::new();
    let mut vlnk_candidates = Vec::new();
    let mut custom_boot_candidates = Vec::new();

    while let Some(node) = queue.pop_front() {
        if has_ventoyignore(&node.path) {
            tree.push((node.path, MenuNode::default()));
            continue;
        }

        let Some(entries) = list_dir(&node.path) else {
            continue;
        };

        let mut menu_node = MenuNode::default();
        for entry in &entries {
            match classify_entry(cfg, &node.path, entry) {
                Decision::Directory { path } => {
                    menu_node.dirs.push(MenuDir {
                        name: entry.name.clone(),
                        path: path.clone(),
                    });
                    if node.depth + 1 <= cfg.max_search_level {
                        queue.push_back(IteratorNode {
                            path,
                            depth: node.depth + 1,
                        });
                    }
                }
                Decision::Image { path, ty, size } => {
                    menu_node.images.push(MenuImage {
                        name: entry.name.clone(),
                        path,
                        ty,
                        size,
                        alias: None,
                        class: None,
                        tip1: None,
                        tip2: None,
                        password_protected: false,
                    });
                }
                Decision::VlnkCandidate { path } => vlnk_candidates.push(path),
                Decision::CustomBootHook { image_path, vcfg_path } => {
                    custom_boot_candidates.push((image_path, vcfg_path));
                }
                Decision::Ignored => {}
            }
        }

        sort_siblings(&mut menu_node, &cfg.list_policy, cfg.case_sensitive);
        tree.push((node.path, menu_node));
    }

    (tree, vlnk_candidates, custom_boot_candidates)
}

/// Fills in every [`MenuImage`]'s `alias`/`class`/`tip1`/`tip2`/
/// `password_protected` fields from the Plugin Store's keyed tables,
/// looked up by the image's own path (exact match or directory-prefix
/// match, per [`crate::plugin::MatchKey`]).
pub fn apply_plugin_tables(tree: &mut [(String, MenuNode)], config: &crate::plugin::VentoyConfig) {
    for (_, node) in tree.iter_mut() {
        for img in node.images.iter_mut() {
            img.alias = config.menu_alias.lookup(&img.path).cloned();
            img.class = config.menu_class.lookup(&img.path).cloned();
            if let Some((tip1, tip2)) = config.menu_tip.lookup(&img.path) {
                img.tip1 = Some(tip1.clone());
                img.tip2 = tip2.clone();
            }
            img.password_protected = config.menu_password.lookup(&img.path).is_some();
        }
    }
}

/// Renders one directory's menu node as grub menu text: a `submenu` block
/// per subdirectory and a `menuentry` block per image, as described by the
/// host's menu grammar. A `menu_alias` overrides the displayed name and a
/// `menu_class` overrides the `--class=` string; a password-protected entry
/// gets a trailing `--password` marker the boot agent's menuentry wrapper
/// checks before proceeding.
pub fn render_node(
    out: &mut impl core::fmt::Write,
    node: &MenuNode,
    display_name: &str,
) -> core::fmt::Result {
    if node.dirs.is_empty() && node.images.is_empty() {
        return Ok(());
    }

    writeln!(out, "submenu \"{display_name}\" {{")?;
    for img in &node.images {
        let name = img.alias.as_deref().unwrap_or(&img.name);
        let class = img.class.as_deref().unwrap_or_else(|| img.ty.class_str());
        write!(
            out,
            "  menuentry \"{}\" --class={} --id=\"{}\"",
            name, class, img.path,
        )?;
        if let Some(tip1) = &img.tip1 {
            write!(out, " --tip1=\"{tip1}\"")?;
            if let Some(tip2) = &img.tip2 {
                write!(out, " --tip2=\"{tip2}\"")?;
            }
        }
        if img.password_protected {
            write!(out, " --password")?;
        }
        writeln!(out, " {{ {}_common_menuentry }}", img.ty.menu_prefix())?;
    }
    writeln!(out, "}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_dir: bool, size: u64) -> RawEntry {
        RawEntry {
            name: name.to_string(),
            is_dir,
            size,
        }
    }

    #[test]
    fn vcfg_file_is_a_custom_boot_hook_not_an_image() {
        let cfg = EnumeratorConfig::default();
        let decision = classify_entry(&cfg, "/", &entry("ubuntu.iso.vcfg", false, 200));
        match decision {
            Decision::CustomBootHook { image_path, vcfg_path } => {
                assert_eq!(image_path, "/ubuntu.iso");
                assert_eq!(vcfg_path, "/ubuntu.iso.vcfg");
            }
            other => panic!("expected CustomBootHook, got {other:?}"),
        }
    }

    #[test]
    fn enumerate_collects_custom_boot_candidates() {
        let cfg = EnumeratorConfig::default();
        let (_, _, custom_boot) = enumerate(
            &cfg,
            "/",
            |dir| {
                if dir == "/" {
                    Some(alloc::vec![
                        entry("ubuntu.iso", false, 1_000_000),
                        entry("ubuntu.iso.vcfg", false, 50),
                    ])
                } else {
                    None
                }
            },
            |_| false,
        );
        assert_eq!(custom_boot, alloc::vec![("/ubuntu.iso".to_string(), "/ubuntu.iso.vcfg".to_string())]);
    }

    #[test]
    fn tiny_known_initrd_survives_size_filter() {
        let cfg = EnumeratorConfig::default();
        let decision = classify_entry(&cfg, "/", &entry("initrd.gz", false, 100));
        assert!(matches!(decision, Decision::VlnkCandidate { .. }));
    }

    #[test]
    fn small_unknown_file_is_dropped() {
        let cfg = EnumeratorConfig::default();
        let decision = classify_entry(&cfg, "/", &entry("tiny.iso", false, 100));
        assert!(matches!(decision, Decision::Ignored));
    }

    #[test]
    fn excluded_basenames_are_always_ignored() {
        let cfg = EnumeratorConfig::default();
        let decision = classify_entry(&cfg, "/", &entry("ventoy_wimboot.img", false, 1_000_000));
        assert!(matches!(decision, Decision::Ignored));
    }

    #[test]
    fn trash_directory_is_skipped() {
        let cfg = EnumeratorConfig::default();
        let decision = classify_entry(&cfg, "/", &entry("$RECYCLE.BIN", true, 0));
        assert!(matches!(decision, Decision::Ignored));
    }

    fn menu_image(path: &str, name: &str, ty: ImageType, size: u64) -> MenuImage {
        MenuImage {
            path: path.into(),
            name: name.into(),
            ty,
            size,
            alias: None,
            class: None,
            tip1: None,
            tip2: None,
            password_protected: false,
        }
    }

    #[test]
    fn sort_is_case_insensitive_by_default() {
        let mut node = MenuNode {
            dirs: alloc::vec![],
            images: alloc::vec![
                menu_image("/b.iso", "b.iso", ImageType::Iso, 1),
                menu_image("/A.iso", "A.iso", ImageType::Iso, 1),
            ],
        };
        sort_siblings(&mut node, &ListPolicy::None, false);
        assert_eq!(node.images[0].name, "A.iso");
    }

    #[test]
    fn allow_list_order_wins_over_name() {
        let policy = ListPolicy::Allow(alloc::vec!["/z.iso".to_string(), "/a.iso".to_string()]);
        let mut node = MenuNode {
            dirs: alloc::vec![],
            images: alloc::vec![
                menu_image("/a.iso", "a.iso", ImageType::Iso, 1),
                menu_image("/z.iso", "z.iso", ImageType::Iso, 1),
            ],
        };
        sort_siblings(&mut node, &policy, false);
        assert_eq!(node.images[0].path, "/z.iso");
    }

    #[test]
    fn apply_plugin_tables_sets_alias_class_tip_and_password() {
        let mut config = crate::plugin::VentoyConfig::default();
        config.menu_alias.push(crate::plugin::MatchKey::Image("/a.iso".into()), "Alpha".into());
        config.menu_class.push(crate::plugin::MatchKey::Image("/a.iso".into()), "custom".into());
        config.menu_tip.push(
            crate::plugin::MatchKey::Image("/a.iso".into()),
            ("line one".into(), Some("line two".into())),
        );
        config.menu_password.push(crate::plugin::MatchKey::Image("/a.iso".into()), "secret".into());

        let mut tree = alloc::vec![(
            "/".to_string(),
            MenuNode {
                dirs: alloc::vec![],
                images: alloc::vec![menu_image("/a.iso", "a.iso", ImageType::Iso, 1)],
            },
        )];
        apply_plugin_tables(&mut tree, &config);

        let img = &tree[0].1.images[0];
        assert_eq!(img.alias.as_deref(), Some("Alpha"));
        assert_eq!(img.class.as_deref(), Some("custom"));
        assert_eq!(img.tip1.as_deref(), Some("line one"));
        assert_eq!(img.tip2.as_deref(), Some("line two"));
        assert!(img.password_protected);
    }

    #[test]
    fn render_node_uses_alias_and_class_overrides() {
        let mut img = menu_image("/a.iso", "a.iso", ImageType::Iso, 1);
        img.alias = Some("Alpha".into());
        img.class = Some("custom".into());
        let node = MenuNode {
            dirs: alloc::vec![],
            images: alloc::vec![img],
        };
        let mut out = String::new();
        render_node(&mut out, &node, "root").unwrap();
        assert!(out.contains("menuentry \"Alpha\" --class=custom"));
    }
}
