//! Filesystem effects, routed through the same coreutils the rest of
//! the distribution tooling uses.
//!
//! Tree copies must preserve permissions, ownership, xattrs and
//! symlinks and must not cross filesystems (`cp -ax`), and boot-file
//! moves may cross from the root filesystem onto a boot partition, so
//! these stay subprocess invocations rather than std::fs ports. Keeping
//! them behind one module also keeps every mutation of the host tree in
//! a single place.

use anyhow::Result;
use camino::Utf8Path;
use fn_error_context::context;

use crate::task::Task;

/// Recursively copy `src` to `dst` (`cp -ax`). When `dst` is an
/// existing directory the source is copied into it, keeping its name.
#[context("Copying {} to {}", src, dst)]
pub(crate) fn copy_tree(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    Task::new(format!("Copying {src}"), "cp")
        .quiet()
        .args(["-ax", "--", src.as_str(), dst.as_str()])
        .run()
}

/// Copy a single file, following symlinks (`cp`).
#[context("Copying {} to {}", src, dst)]
pub(crate) fn copy_file(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    Task::new(format!("Copying {src}"), "cp")
        .quiet()
        .args(["--", src.as_str(), dst.as_str()])
        .run()
}

/// Recursively delete `path` if it exists (`rm -rf`).
#[context("Removing {}", path)]
pub(crate) fn remove_all(path: &Utf8Path) -> Result<()> {
    Task::new(format!("Removing {path}"), "rm")
        .quiet()
        .args(["-rf", "--", path.as_str()])
        .run()
}

/// Delete a single file if it exists (`rm -f`).
#[context("Removing {}", path)]
pub(crate) fn remove_file(path: &Utf8Path) -> Result<()> {
    Task::new(format!("Removing {path}"), "rm")
        .quiet()
        .args(["-f", "--", path.as_str()])
        .run()
}

/// Move `src` into the directory `dst_dir` (`mv`); works across
/// filesystem boundaries.
#[context("Moving {} into {}", src, dst_dir)]
pub(crate) fn move_into(src: &Utf8Path, dst_dir: &Utf8Path) -> Result<()> {
    Task::new(format!("Moving {src}"), "mv")
        .quiet()
        .args(["--", src.as_str(), dst_dir.as_str()])
        .run()
}

/// Create `path` and any missing parents (`mkdir -p`).
#[context("Creating {}", path)]
pub(crate) fn ensure_dir(path: &Utf8Path) -> Result<()> {
    Task::new(format!("Creating {path}"), "mkdir")
        .quiet()
        .args(["-p", "--", path.as_str()])
        .run()
}

/// Create a symlink at `link` pointing to `target` (`ln -s`).
#[context("Linking {} to {}", link, target)]
pub(crate) fn symlink(target: &Utf8Path, link: &Utf8Path) -> Result<()> {
    Task::new(format!("Linking {link}"), "ln")
        .quiet()
        .args(["-s", "--", target.as_str(), link.as_str()])
        .run()
}
