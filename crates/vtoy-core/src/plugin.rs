//! Plugin Store: parses `/ventoy/ventoy.json` into the append-only tables
//! consumed by the menu enumerator and the injectors.
//!
//! The parser is deliberately tolerant: unrecognized top-level keys are
//! ignored (logged at debug level), and a malformed block is skipped rather
//! than failing the whole document, per the `ConfigError` policy.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ThemeConfig {
    pub file: Option<String>,
    pub gfxmode: Option<String>,
    #[serde(default)]
    pub ventoy_left: Option<i32>,
    #[serde(default)]
    pub ventoy_top: Option<i32>,
    #[serde(default)]
    pub ventoy_color: Option<String>,
    #[serde(default)]
    pub random_boot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoInstallEntry {
    pub image: String,
    #[serde(default)]
    pub template: Vec<String>,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub default: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceEntry {
    pub image: String,
    #[serde(default)]
    pub backend: Vec<String>,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub default: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InjectionEntry {
    #[serde(flatten)]
    pub target: InjectionTarget,
    pub archive: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InjectionTarget {
    Image { image: String },
    Parent { parent: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfReplaceEntry {
    pub image: String,
    pub orgconf: String,
    pub newconf: String,
    #[serde(default)]
    pub img: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoMemdiskEntry {
    pub image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DudEntry {
    pub image: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// One `xxx.vcfg` file found alongside `xxx` during enumeration: its
/// contents are custom boot script text substituted for the image's normal
/// boot commands, not parsed further here.
#[derive(Debug, Clone)]
pub struct CustomBootEntry {
    pub image: String,
    pub script: String,
}

/// Registers a `.vcfg` hook discovered by the menu enumerator. Unlike the
/// blocks parsed from `ventoy.json`, these are appended as they're found
/// during directory walk rather than all at once during config load.
pub fn register_custom_boot(config: &mut VentoyConfig, image: &str, vcfg_text: &str) {
    config.custom_boot.push(CustomBootEntry {
        image: image.to_string(),
        script: vcfg_text.to_string(),
    });
}

/// Lookup key used by `menu_alias`/`menu_class`/`menu_tip`/`menu_password`:
/// an exact image path, or a directory prefix (including its trailing `/`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKey {
    Image(String),
    DirPrefix(String),
}

impl MatchKey {
    fn from_json_key(key: &str) -> Self {
        if key.ends_with('/') {
            Self::DirPrefix(key.to_string())
        } else {
            Self::Image(key.to_string())
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Image(p) => p == path,
            Self::DirPrefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

/// An append-only, insertion-ordered table keyed by [`MatchKey`]. Lookups
/// return the *last* matching entry with ties broken by insertion order, per
/// the "last one wins" / "insertion order" rules in §4.F.
#[derive(Debug, Clone, Default)]
pub struct KeyedTable<V> {
    entries: Vec<(MatchKey, V)>,
}

impl<V> KeyedTable<V> {
    pub fn push(&mut self, key: MatchKey, value: V) {
        self.entries.push((key, value));
    }

    pub fn lookup(&self, path: &str) -> Option<&V> {
        self.entries
            .iter()
            .rev()
            .find(|(key, _)| key.matches(path))
            .map(|(_, v)| v)
    }
}

/// Exactly one of `image_list`/`image_blacklist` is active at a time; the
/// loaded config records which.
#[derive(Debug, Clone, Default)]
pub enum ImageListPolicy {
    #[default]
    None,
    Allow(Vec<String>),
    Deny(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct VentoyConfig {
    pub control: alloc::collections::BTreeMap<String, String>,
    pub theme: ThemeConfig,
    pub auto_install: Vec<AutoInstallEntry>,
    pub persistence: Vec<PersistenceEntry>,
    pub injection: Vec<InjectionEntry>,
    pub conf_replace: Vec<ConfReplaceEntry>,
    pub menu_alias: KeyedTable<String>,
    pub menu_class: KeyedTable<String>,
    pub menu_tip: KeyedTable<(String, Option<String>)>,
    pub menu_password: KeyedTable<String>,
    pub image_list_policy: ImageListPolicy,
    pub auto_memdisk: Vec<AutoMemdiskEntry>,
    pub dud: Vec<DudEntry>,
    pub custom_boot: Vec<CustomBootEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    NotAnObject,
}

/// Parses `text` into a [`VentoyConfig`]. Malformed individual blocks are
/// dropped (the caller should log them); only a document that isn't a JSON
/// object at all is a hard [`ConfigError`].
pub fn parse_config(text: &str) -> Result<VentoyConfig, ConfigError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| ConfigError::NotAnObject)?;
    let serde_json::Value::Object(map) = value else {
        return Err(ConfigError::NotAnObject);
    };

    let mut config = VentoyConfig::default();

    if let Some(control) = map.get("control") {
        if let Some(array) = control.as_array() {
            for obj in array {
                if let Some(obj) = obj.as_object() {
                    for (k, v) in obj {
                        if let Some(s) = v.as_str() {
                            config.control.insert(k.clone(), s.to_string());
                        }
                    }
                }
            }
        }
    }

    if let Some(theme) = map.get("theme") {
        if let Ok(parsed) = serde_json::from_value::<ThemeConfig>(theme.clone()) {
            config.theme = parsed;
        }
    }

    macro_rules! parse_array_block {
        ($key:expr, $field:expr) => {
            if let Some(v) = map.get($key) {
                if let Ok(parsed) = serde_json::from_value(v.clone()) {
                    $field = parsed;
                }
            }
        };
    }

    parse_array_block!("auto_install", config.auto_install);
    parse_array_block!("persistence", config.persistence);
    parse_array_block!("injection", config.injection);
    parse_array_block!("conf_replace", config.conf_replace);
    parse_array_block!("auto_memdisk", config.auto_memdisk);
    parse_array_block!("dud", config.dud);

    for (json_key, table_key) in [
        ("menu_alias", "menu_alias"),
        ("menu_class", "menu_class"),
        ("menu_password", "menu_password"),
    ] {
        if let Some(obj) = map.get(json_key).and_then(|v| v.as_object()) {
            for (k, v) in obj {
                if let Some(s) = v.as_str() {
                    let key = MatchKey::from_json_key(k);
                    match table_key {
                        "menu_alias" => config.menu_alias.push(key, s.to_string()),
                        "menu_class" => config.menu_class.push(key, s.to_string()),
                        "menu_password" => config.menu_password.push(key, s.to_string()),
                        _ => unreachable!(),
                    }
                }
            }
        }
    }

    if let Some(obj) = map.get("menu_tip").and_then(|v| v.as_object()) {
        for (k, v) in obj {
            let tip1 = v.get("tip1").and_then(|t| t.as_str()).unwrap_or_default();
            let tip2 = v.get("tip2").and_then(|t| t.as_str()).map(str::to_string);
            config
                .menu_tip
                .push(MatchKey::from_json_key(k), (tip1.to_string(), tip2));
        }
    }

    if let Some(list) = map.get("image_list").and_then(|v| v.as_array()) {
        config.image_list_policy = ImageListPolicy::Allow(
            list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        );
    } else if let Some(list) = map.get("image_blacklist").and_then(|v| v.as_array()) {
        config.image_list_policy = ImageListPolicy::Deny(
            list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        );
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_top_level_key_is_ignored() {
        let json = r#"{"made_up_key": 1, "control": [{"VTOY_MAX_SEARCH_LEVEL": "3"}]}"#;
        let config = parse_config(json).unwrap();
        assert_eq!(config.control.get("VTOY_MAX_SEARCH_LEVEL").unwrap(), "3");
    }

    #[test]
    fn menu_alias_directory_prefix_matches_nested_paths() {
        let json = r#"{"menu_alias": {"/iso/": "ISOs"}}"#;
        let config = parse_config(json).unwrap();
        assert_eq!(
            config.menu_alias.lookup("/iso/ubuntu.iso").unwrap(),
            "ISOs"
        );
    }

    #[test]
    fn last_entry_wins_on_duplicate_key() {
        let json = r#"{"menu_alias": {"/a.iso": "first"}}"#;
        let mut config = parse_config(json).unwrap();
        config
            .menu_alias
            .push(MatchKey::Image("/a.iso".to_string()), "second".to_string());
        assert_eq!(config.menu_alias.lookup("/a.iso").unwrap(), "second");
    }

    #[test]
    fn non_object_document_is_a_config_error() {
        assert!(matches!(parse_config("[1,2,3]"), Err(ConfigError::NotAnObject)));
    }

    #[test]
    fn register_custom_boot_appends_a_hook() {
        let mut config = VentoyConfig::default();
        register_custom_boot(&mut config, "/ubuntu.iso", "set timeout=0\n");
        assert_eq!(config.custom_boot.len(), 1);
        assert_eq!(config.custom_boot[0].image, "/ubuntu.iso");
        assert_eq!(config.custom_boot[0].script, "set timeout=0\n");
    }
}
