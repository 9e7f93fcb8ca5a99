//! Materialising the staged rootfs's boot files into `/boot`.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use fn_error_context::context;

use crate::fsops;
use crate::paths::SystemPaths;
use crate::task::Task;

/// Move every boot file of the staged rootfs into `/boot`, then prune
/// the files the new image no longer ships. Directories (`grub/`,
/// `efi/`, ...) are left alone on both sides.
#[context("Replacing /boot files")]
pub(crate) fn replace_boot_files(paths: &SystemPaths) -> Result<()> {
    let staged_boot = paths.update_rootfs().join("boot");
    let boot = paths.boot();

    let mut moved = BTreeSet::new();
    for entry in staged_boot
        .read_dir_utf8()
        .with_context(|| format!("Reading {staged_boot}"))?
    {
        let entry = entry?;
        if entry.path().is_dir() {
            continue;
        }
        fsops::move_into(entry.path(), &boot)?;
        moved.insert(entry.file_name().to_string());
    }

    for entry in boot
        .read_dir_utf8()
        .with_context(|| format!("Reading {boot}"))?
    {
        let entry = entry?;
        if entry.path().is_dir() {
            continue;
        }
        if !moved.contains(entry.file_name()) {
            fsops::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Regenerate the boot-loader configuration against the new `/boot`
/// contents. The exit status is not checked, matching the rest of the
/// best-effort boot plumbing; a failure leaves the previous config in
/// place.
pub(crate) fn regenerate_config(paths: &SystemPaths) -> Result<()> {
    let out = paths.boot().join("grub/grub.cfg");
    let _ = Task::new("Regenerating boot-loader configuration", "grub-mkconfig")
        .quiet()
        .args(["-o", out.as_str()])
        .status()?;
    Ok(())
}
