//! Operations on a staged root filesystem.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::task::Task;

/// A handle to a root filesystem tree staged on the host, with support
/// for running commands inside it via the container executor.
#[derive(Debug)]
pub(crate) struct Rootfs {
    path: Utf8PathBuf,
}

impl std::fmt::Display for Rootfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.path.fmt(f)
    }
}

impl Rootfs {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The absolute path of this tree on the host.
    pub(crate) fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Whether `relative` exists inside this tree.
    pub(crate) fn exists(&self, relative: impl AsRef<Utf8Path>) -> bool {
        self.path.join(relative.as_ref()).exists()
    }

    /// A [`Task`] that runs `argv0` inside this tree, in the manner of
    /// `systemd-nspawn -D <root> argv0 ...`.
    pub(crate) fn task(&self, description: impl AsRef<str>, argv0: &str) -> Task {
        Task::new(description, "systemd-nspawn")
            .quiet()
            .args(["-D", self.path.as_str(), argv0])
    }

    /// Install each kernel shipped under `usr/lib/modules` into the
    /// tree's own `/boot` as `vmlinuz-<version>`, clearing stale boot
    /// files first.
    ///
    /// Exit codes of the individual container commands are not checked;
    /// a tree that ends up without any kernel is rejected later by the
    /// pre-staging gate.
    #[context("Copying kernels into staged /boot")]
    pub(crate) fn copy_kernels_to_boot(&self) -> Result<()> {
        let boot = self.path.join("boot");
        for entry in boot
            .read_dir_utf8()
            .with_context(|| format!("Reading {boot}"))?
        {
            let entry = entry?;
            if entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let target = format!("/boot/{name}");
            let _ = self
                .task(format!("Removing stale /boot/{name}"), "rm")
                .args(["-f", target.as_str()])
                .status()?;
        }

        let modules = self.path.join("usr/lib/modules");
        for entry in modules
            .read_dir_utf8()
            .with_context(|| format!("Reading {modules}"))?
        {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let kver = entry.file_name();
            let _ = self
                .task(format!("Installing kernel {kver}"), "cp")
                .args([
                    format!("/usr/lib/modules/{kver}/vmlinuz"),
                    format!("/boot/vmlinuz-{kver}"),
                ])
                .quiet_output()
                .status()?;
        }
        Ok(())
    }

    /// Regenerate the initramfs for every kernel present in the tree.
    pub(crate) fn generate_initramfs(&self) -> Result<()> {
        let _ = self
            .task("Regenerating initramfs", "dracut")
            .args(["--force", "--regenerate-all"])
            .status()?;
        Ok(())
    }

    /// Whether the tree's `/boot` carries at least one kernel image.
    #[context("Checking for kernels in staged /boot")]
    pub(crate) fn has_kernel(&self) -> Result<bool> {
        let boot = self.path.join("boot");
        for entry in boot
            .read_dir_utf8()
            .with_context(|| format!("Reading {boot}"))?
        {
            let entry = entry?;
            if entry.file_name().starts_with("vmlinuz") {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
