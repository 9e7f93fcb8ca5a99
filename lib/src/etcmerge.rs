//! Merging `/etc` and `/var/lib` trees between the host and a staged
//! rootfs.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

use crate::fsops;
use crate::paths::SystemPaths;
use crate::rootfs::Rootfs;

/// Stage the new image's `/etc` with the host's local changes applied.
///
/// The staged tree starts as a copy of the image's `/etc`; every file
/// the administrator added or changed relative to the `/usr/etc`
/// baseline is then mirrored over it. The identity databases are
/// overwritten afterwards by the identity merge, which has its own
/// policy.
#[context("Merging /etc")]
pub(crate) fn merge_etc(paths: &SystemPaths, new_rootfs: &Rootfs) -> Result<()> {
    fsops::copy_tree(&new_rootfs.path().join("etc"), &paths.new_etc())?;

    // A freshly installed system has no baseline yet; snapshot the live
    // /etc so this and future rebases have a reference to diff against.
    if !paths.usr_etc().is_dir() {
        fsops::copy_tree(&paths.etc(), &paths.usr_etc())?;
    }

    let diff = compare_trees(&paths.etc(), &paths.usr_etc())?;
    for rel in diff.left_only.iter().chain(diff.changed.iter()) {
        let target_dir = match rel.parent() {
            Some(parent) if !parent.as_str().is_empty() => paths.new_etc().join(parent),
            _ => paths.new_etc(),
        };
        fsops::ensure_dir(&target_dir)?;
        fsops::copy_tree(&paths.etc().join(rel), &target_dir)?;
    }
    Ok(())
}

/// Stage `/var/lib`: a copy of the host's tree, plus the top-level
/// directories that exist only in the new image. Anything the host
/// already has wins; files (as opposed to directories) that only the
/// image has are not brought over.
#[context("Merging /var/lib")]
pub(crate) fn merge_var_lib(paths: &SystemPaths, new_rootfs: &Rootfs) -> Result<()> {
    fsops::copy_tree(&paths.var_lib(), &paths.new_var_lib())?;

    let image_var_lib = new_rootfs.path().join("var/lib");
    for entry in image_var_lib
        .read_dir_utf8()
        .with_context(|| format!("Reading {image_var_lib}"))?
    {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let staged = paths.new_var_lib().join(entry.file_name());
        if staged.symlink_metadata().is_ok() {
            continue;
        }
        fsops::copy_tree(entry.path(), &paths.new_var_lib())?;
    }
    Ok(())
}

/// Differences between two directory trees, as paths relative to the
/// tree roots.
#[derive(Debug, Default)]
pub(crate) struct TreeDiff {
    /// Entries (of any type) present only under the left tree.
    pub(crate) left_only: Vec<Utf8PathBuf>,
    /// Regular files present on both sides with differing bytes, and
    /// symlinks with differing targets.
    pub(crate) changed: Vec<Utf8PathBuf>,
}

/// Recursively compare two trees. Entries whose type differs between
/// the two sides, and entries that are neither regular files, symlinks
/// nor directories, are ignored.
#[context("Comparing {} and {}", left, right)]
pub(crate) fn compare_trees(left: &Utf8Path, right: &Utf8Path) -> Result<TreeDiff> {
    let mut diff = TreeDiff::default();
    compare_inner(left, right, Utf8Path::new(""), &mut diff)?;
    Ok(diff)
}

fn compare_inner(
    left: &Utf8Path,
    right: &Utf8Path,
    rel: &Utf8Path,
    diff: &mut TreeDiff,
) -> Result<()> {
    let mut entries = Vec::new();
    for entry in left
        .read_dir_utf8()
        .with_context(|| format!("Reading {left}"))?
    {
        entries.push(entry?);
    }
    entries.sort_by(|a, b| a.file_name().cmp(b.file_name()));

    for entry in entries {
        let name = entry.file_name();
        let left_path = entry.path();
        let right_path = right.join(name);
        let rel_path = rel.join(name);

        let left_meta = left_path
            .symlink_metadata()
            .with_context(|| format!("Reading metadata of {left_path}"))?;
        let Ok(right_meta) = right_path.symlink_metadata() else {
            diff.left_only.push(rel_path);
            continue;
        };

        if left_meta.is_dir() && right_meta.is_dir() {
            compare_inner(left_path, &right_path, &rel_path, diff)?;
        } else if left_meta.is_file() && right_meta.is_file() {
            if !file_eq(left_path, &right_path)? {
                diff.changed.push(rel_path);
            }
        } else if left_meta.is_symlink() && right_meta.is_symlink() {
            if left_path.read_link_utf8()? != right_path.read_link_utf8()? {
                diff.changed.push(rel_path);
            }
        }
    }
    Ok(())
}

fn file_eq(a: &Utf8Path, b: &Utf8Path) -> Result<bool> {
    if a.symlink_metadata()?.len() != b.symlink_metadata()?.len() {
        return Ok(false);
    }
    Ok(std::fs::read(a)? == std::fs::read(b)?)
}
