//! `ferry config`: show the resolved configuration.

use crate::ui;
use ferry_kernel::config::config_layers;
use ferry_types::config::FerryConfig;
use std::path::{Path, PathBuf};

pub fn cmd_config(config: &FerryConfig, path: Option<&Path>, profiles: &[PathBuf]) {
    ui::section("Configuration");
    for (i, layer) in config_layers(path, profiles).iter().enumerate() {
        let label = if i == 0 { "File" } else { "Profile" };
        if layer.exists() {
            ui::kv_ok(label, &layer.display().to_string());
        } else {
            ui::kv(label, &format!("{} (not found, skipped)", layer.display()));
        }
    }
    ui::blank();
    match toml::to_string_pretty(config) {
        Ok(text) => println!("{text}"),
        Err(e) => ui::error(&format!("Failed to render config: {e}")),
    }
}
