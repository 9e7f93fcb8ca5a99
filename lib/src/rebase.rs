//! The rebase pipeline: stage a replacement root filesystem from an
//! OCI image reference.
//!
//! The sequence is strictly ordered and partially transactional: all
//! transient state from an interrupted run is swept at the *start* of
//! the next one, and the staged `/.update_rootfs` tree is the last
//! landmark created before `/boot` is touched, so a crash anywhere
//! earlier leaves the running system untouched.

use anyhow::Result;
use fn_error_context::context;
use system_utils::output;

use crate::bootloader;
use crate::config::SystemConfig;
use crate::errors::Error;
use crate::etcmerge;
use crate::fsops;
use crate::image;
use crate::paths::SystemPaths;
use crate::pkgmgr::PackageManager;
use crate::users;

/// Remove whatever a previous rebase or update left behind.
#[context("Cleaning up previous update state")]
fn cleanup(paths: &SystemPaths) -> Result<()> {
    for path in [
        paths.bundle(),
        paths.system_image(),
        paths.update_sentinel(),
        paths.update_rootfs(),
        paths.new_etc(),
        paths.new_var_lib(),
    ] {
        fsops::remove_all(&path)?;
    }
    Ok(())
}

/// Stage `image_ref` as the next boot's root filesystem.
///
/// The caller is responsible for holding the system lock.
pub(crate) fn rebase(paths: &SystemPaths, image_ref: &str) -> Result<()> {
    cleanup(paths)?;

    // First-time rebase has no config yet; synthesise one that tracks
    // the requested image.
    let config = SystemConfig::load(&paths.system_config()).unwrap_or_else(|_| SystemConfig {
        image: Some(image_ref.to_string()),
        ..Default::default()
    });

    let new_revision = match image::fetch_metadata(image_ref) {
        Ok(meta) => match meta.revision() {
            Some(revision) => revision.to_string(),
            None => return Err(Error::MissingRevisionLabel.into()),
        },
        Err(e) => {
            tracing::debug!("fetching metadata failed: {e}");
            output::error(format!(
                "failed to read remote metadata for image {image_ref}"
            ));
            output::warn("does the image exist, and are you connected to the internet?");
            std::process::exit(1);
        }
    };

    output::info("pulling image");
    image::pull(image_ref, paths)?;

    output::info("generating new rootfs");
    let new_rootfs = image::bundle_rootfs(paths)?;
    tracing::debug!("staged rootfs at {new_rootfs}");
    new_rootfs.copy_kernels_to_boot()?;
    new_rootfs.generate_initramfs()?;

    // Keep the host's locale selection in the staged system.
    fsops::copy_file(
        &paths.etc().join("locale.gen"),
        &new_rootfs.path().join("etc/locale.gen"),
    )?;
    let _ = new_rootfs.task("Generating locales", "locale-gen").status()?;

    etcmerge::merge_etc(paths, &new_rootfs)?;
    users::merge_identity(paths, &new_rootfs)?;
    etcmerge::merge_var_lib(paths, &new_rootfs)?;

    if let Some(packages) = config.packages.as_deref() {
        let mgr = PackageManager::detect(&new_rootfs)?;
        mgr.init(&new_rootfs)?;
        mgr.install(&new_rootfs, packages)?;
    }
    if let Some(services) = config.services.as_deref() {
        for service in services {
            let _ = new_rootfs
                .task(format!("Enabling {service}"), "systemctl")
                .args(["enable", service.as_str()])
                .status()?;
        }
    }
    if let Some(user_services) = config.user_services.as_deref() {
        for service in user_services {
            let _ = new_rootfs
                .task(format!("Enabling {service}"), "systemctl")
                .args(["enable", "--global", service.as_str()])
                .status()?;
        }
    }

    // The staged revision marker is advisory; losing it only means the
    // next run cannot skip an identical image.
    fsops::ensure_dir(&paths.new_var_lib().join("commonarch"))?;
    if let Err(e) = std::fs::write(
        paths.new_var_lib().join("commonarch/revision"),
        &new_revision,
    ) {
        tracing::debug!("ignoring failed revision write: {e}");
    }

    // Gate: never hand an unbootable tree to the next boot. Nothing
    // under /boot or /.update_rootfs has been touched yet.
    if !new_rootfs.has_kernel()? {
        output::error("new rootfs contains no kernel");
        output::error("refusing to proceed with applying update");
        std::process::exit(1);
    }

    // Seed the baseline the *next* rebase will diff against.
    new_rootfs
        .task("Seeding /usr/etc baseline", "cp")
        .args(["-ax", "/etc", "/usr/etc"])
        .run()?;

    fsops::copy_tree(new_rootfs.path(), &paths.update_rootfs())?;

    bootloader::replace_boot_files(paths)?;
    bootloader::regenerate_config(paths)?;

    Ok(())
}
