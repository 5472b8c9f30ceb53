//! Configuration loading from `~/.ferry/config.toml` with defaults.

use ferry_types::config::FerryConfig;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load configuration from a TOML file, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> FerryConfig {
    load_with_profiles(path, &[])
}

/// Load the base config file, then each profile over it in order.
pub fn load_with_profiles(path: Option<&Path>, profiles: &[PathBuf]) -> FerryConfig {
    load_layered(&config_layers(path, profiles))
}

/// Files read for a base config and its profiles, lowest precedence first.
pub fn config_layers(path: Option<&Path>, profiles: &[PathBuf]) -> Vec<PathBuf> {
    let base = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);
    std::iter::once(base).chain(profiles.iter().cloned()).collect()
}

/// Load configuration from several TOML files, later files overriding
/// earlier ones key by key. Missing files are skipped; unreadable or
/// malformed files are logged and skipped.
pub fn load_layered(paths: &[PathBuf]) -> FerryConfig {
    let mut root = toml::Value::Table(toml::map::Map::new());
    let mut loaded = 0usize;

    for path in paths {
        if !path.exists() {
            continue;
        }
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to read config file, skipping");
                continue;
            }
        };
        match toml::from_str::<toml::Value>(&contents) {
            Ok(layer) => {
                deep_merge_toml(&mut root, &layer);
                loaded += 1;
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to parse config, skipping");
            }
        }
    }

    if loaded == 0 {
        info!("No config file found, using defaults");
        return FerryConfig::default();
    }

    match root.try_into::<FerryConfig>() {
        Ok(config) => {
            info!(files = loaded, "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(error = %e, "Failed to deserialize merged config, using defaults");
            FerryConfig::default()
        }
    }
}

/// Deep-merge two TOML values. Tables merge recursively; any other overlay
/// value replaces the base value.
pub fn deep_merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, overlay_val) in overlay_tbl {
                if let Some(base_val) = base_tbl.get_mut(key) {
                    deep_merge_toml(base_val, overlay_val);
                } else {
                    base_tbl.insert(key.clone(), overlay_val.clone());
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// Get the default ferry home directory.
pub fn ferry_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".ferry")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    ferry_home().join("config.toml")
}
