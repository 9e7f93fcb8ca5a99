//! The filesystem landmarks owned by the updater.

use camino::Utf8PathBuf;

/// Every persistent path the updater reads or writes, derived from a
/// single root prefix. Production uses [`SystemPaths::default`] (rooted
/// at `/`); tests point the root at a sandbox.
#[derive(Debug, Clone)]
pub(crate) struct SystemPaths {
    root: Utf8PathBuf,
}

impl SystemPaths {
    pub(crate) fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn join(&self, rel: &str) -> Utf8PathBuf {
        self.root.join(rel)
    }

    /// The system configuration file, `/system.yaml`.
    pub(crate) fn system_config(&self) -> Utf8PathBuf {
        self.join("system.yaml")
    }

    /// Persistent state directory, `/var/lib/commonarch`.
    pub(crate) fn state_dir(&self) -> Utf8PathBuf {
        self.join("var/lib/commonarch")
    }

    /// Shared OCI blob store.
    pub(crate) fn blobs(&self) -> Utf8PathBuf {
        self.state_dir().join("blobs")
    }

    /// OCI image storage; its `blobs` entry is a symlink into
    /// [`Self::blobs`] after a pull.
    pub(crate) fn system_image(&self) -> Utf8PathBuf {
        self.state_dir().join("system-image")
    }

    /// The blob directory inside the image storage.
    pub(crate) fn system_image_blobs(&self) -> Utf8PathBuf {
        self.system_image().join("blobs")
    }

    /// The unpacked OCI bundle (config.json plus a rootfs directory).
    pub(crate) fn bundle(&self) -> Utf8PathBuf {
        self.state_dir().join("bundle")
    }

    /// Marker file recording the installed image revision.
    pub(crate) fn revision(&self) -> Utf8PathBuf {
        self.state_dir().join("revision")
    }

    /// The process-wide exclusive lock file.
    pub(crate) fn lock_file(&self) -> Utf8PathBuf {
        self.state_dir().join(".system-lock")
    }

    /// The staged replacement rootfs. Its existence is the ground truth
    /// that an update is pending.
    pub(crate) fn update_rootfs(&self) -> Utf8PathBuf {
        self.join(".update_rootfs")
    }

    /// Staged replacement for `/etc`.
    pub(crate) fn new_etc(&self) -> Utf8PathBuf {
        self.join(".new.etc")
    }

    /// Staged replacement for `/var/lib`.
    pub(crate) fn new_var_lib(&self) -> Utf8PathBuf {
        self.join(".new.var.lib")
    }

    /// Reserved sentinel, swept between runs.
    pub(crate) fn update_sentinel(&self) -> Utf8PathBuf {
        self.join(".update")
    }

    /// Baseline snapshot of the previously applied image's `/etc`, the
    /// middle leg of the three-way merge.
    pub(crate) fn usr_etc(&self) -> Utf8PathBuf {
        self.join("usr/etc")
    }

    /// The host's live `/etc`.
    pub(crate) fn etc(&self) -> Utf8PathBuf {
        self.join("etc")
    }

    /// The host's `/var/lib`.
    pub(crate) fn var_lib(&self) -> Utf8PathBuf {
        self.join("var/lib")
    }

    /// The host's `/boot`.
    pub(crate) fn boot(&self) -> Utf8PathBuf {
        self.join("boot")
    }
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self::new("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let p = SystemPaths::default();
        assert_eq!(p.system_config(), "/system.yaml");
        assert_eq!(p.blobs(), "/var/lib/commonarch/blobs");
        assert_eq!(p.system_image_blobs(), "/var/lib/commonarch/system-image/blobs");
        assert_eq!(p.lock_file(), "/var/lib/commonarch/.system-lock");
        assert_eq!(p.update_rootfs(), "/.update_rootfs");
        assert_eq!(p.new_etc(), "/.new.etc");
        assert_eq!(p.usr_etc(), "/usr/etc");
    }

    #[test]
    fn test_sandboxed_root() {
        let p = SystemPaths::new("/tmp/sandbox");
        assert_eq!(p.revision(), "/tmp/sandbox/var/lib/commonarch/revision");
        assert_eq!(p.new_var_lib(), "/tmp/sandbox/.new.var.lib");
        assert_eq!(p.boot(), "/tmp/sandbox/boot");
    }
}
