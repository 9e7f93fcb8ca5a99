//! Loading the system configuration from `/system.yaml`.

use camino::Utf8Path;
use serde_yaml::Value;

use crate::errors::Error;

/// Seconds between update checks when `auto-update-interval` is unset.
pub(crate) const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 3600;

/// Parsed contents of `/system.yaml`.
///
/// Unknown keys are ignored. A recognised key holding a value of an
/// unexpected type is treated as if it were absent; this mirrors the
/// behavior the installers have always relied on (e.g. a scalar
/// `packages:` simply disables package installation).
#[derive(Debug, Clone, Default)]
pub(crate) struct SystemConfig {
    /// The currently tracked image reference.
    pub(crate) image: Option<String>,
    /// Gates the background update-check daemon.
    pub(crate) auto_update: Option<bool>,
    /// Seconds between background update checks.
    pub(crate) auto_update_interval: Option<u64>,
    /// Extra packages to install into the staged rootfs.
    pub(crate) packages: Option<Vec<String>>,
    /// System services to enable in the staged rootfs.
    pub(crate) services: Option<Vec<String>>,
    /// Per-user services to enable globally.
    pub(crate) user_services: Option<Vec<String>>,
}

impl SystemConfig {
    /// Read and parse the configuration file.
    pub(crate) fn load(path: &Utf8Path) -> Result<Self, Error> {
        let buf = std::fs::read_to_string(path).map_err(|_| Error::SystemConfig)?;
        let doc: Value = serde_yaml::from_str(&buf).map_err(|_| Error::SystemConfig)?;
        Ok(Self::from_value(&doc))
    }

    fn from_value(doc: &Value) -> Self {
        Self {
            image: typed(doc, "image"),
            auto_update: typed(doc, "auto-update"),
            auto_update_interval: typed(doc, "auto-update-interval"),
            packages: typed(doc, "packages"),
            services: typed(doc, "services"),
            user_services: typed(doc, "user-services"),
        }
    }

    /// The tracked image reference, required by `system update` and the
    /// update-check daemon.
    pub(crate) fn require_image(&self) -> Result<&str, Error> {
        self.image.as_deref().ok_or(Error::SystemConfig)
    }
}

fn typed<T: serde::de::DeserializeOwned>(doc: &Value, key: &str) -> Option<T> {
    doc.get(key)
        .cloned()
        .and_then(|v| serde_yaml::from_value(v).ok())
}
