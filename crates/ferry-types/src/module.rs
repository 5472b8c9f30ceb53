//! Module keys and module interface declarations.
//!
//! A module is a named singleton living in the remote context. Both sides
//! agree on a module's shape through a [`ModuleInterface`] declaration: the
//! remote registry registers a factory under `KEY`, and client proxies use
//! `METHODS` to bound what they dispatch.

use crate::host::HostPlatform;
use serde::{Deserialize, Serialize};

/// Stable, unique name of a registered module namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleKey(String);

impl ModuleKey {
    /// Create a key from any string-like value.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModuleKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ModuleKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compile-time declaration of a module's public interface.
///
/// Implemented on a zero-sized marker type shared by the remote and client
/// crates, e.g.
///
/// ```
/// use ferry_types::module::ModuleInterface;
///
/// pub struct SettingsApi;
///
/// impl ModuleInterface for SettingsApi {
///     const KEY: &'static str = "settings";
///     const METHODS: &'static [&'static str] = &["get", "set"];
/// }
/// ```
pub trait ModuleInterface: Send + Sync + 'static {
    /// The module key the remote registry registers this module under.
    const KEY: &'static str;

    /// Names of the callable methods.
    const METHODS: &'static [&'static str];

    /// Hosts this module may be invoked from. Empty means every host.
    const HOSTS: &'static [HostPlatform] = &[];

    /// Whether call sites may resolve the proxy reference itself as a
    /// deferred value (see `ModuleProxy::resolve` in `ferry-client`).
    const DEFERRED_RESOLVE: bool = false;

    /// The key as a [`ModuleKey`].
    fn key() -> ModuleKey {
        ModuleKey::from(Self::KEY)
    }

    /// Whether `method` is part of this interface.
    fn has_method(method: &str) -> bool {
        Self::METHODS.contains(&method)
    }
}

/// The reserved, module-independent system interface every remote context
/// serves. Used by readiness probing and state bootstrap.
pub struct SystemApi;

impl SystemApi {
    /// `isReady() -> bool`.
    pub const IS_READY: &'static str = "isReady";
    /// `snapshot(slices: [string]) -> { slice: { value, rev } }`.
    pub const SNAPSHOT: &'static str = "snapshot";
}

impl ModuleInterface for SystemApi {
    const KEY: &'static str = "system";
    const METHODS: &'static [&'static str] = &[Self::IS_READY, Self::SNAPSHOT];
}
