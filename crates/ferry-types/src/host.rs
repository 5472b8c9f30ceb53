//! Host platforms a ferry context can run on.

use serde::{Deserialize, Serialize};

/// The host platform the current process is embedded in.
///
/// Proxies may be restricted to a subset of hosts; invoking a restricted proxy
/// anywhere else fails locally with a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostPlatform {
    /// Browser extension (popup, side panel, content script, service worker).
    #[default]
    Extension,
    /// Desktop shell with a main process and renderer windows.
    Desktop,
    /// Mobile native host with an embedded sandboxed document.
    Native,
    /// Plain web page.
    Web,
}

impl HostPlatform {
    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            HostPlatform::Extension => "extension",
            HostPlatform::Desktop => "desktop",
            HostPlatform::Native => "native",
            HostPlatform::Web => "web",
        }
    }
}

impl std::fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HostPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "extension" => Ok(HostPlatform::Extension),
            "desktop" => Ok(HostPlatform::Desktop),
            "native" => Ok(HostPlatform::Native),
            "web" => Ok(HostPlatform::Web),
            other => Err(format!("unknown host platform: {other}")),
        }
    }
}
