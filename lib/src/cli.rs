//! # Image-based system update CLI
//!
//! Command line surface of the `system` tool.

use std::ffi::OsString;

use anyhow::Result;
use clap::Parser;
use system_utils::output;

use crate::config::SystemConfig;
use crate::daemon;
use crate::errors::Error;
use crate::image;
use crate::lockfile::LockFile;
use crate::paths::SystemPaths;
use crate::rebase;

/// Perform an update operation
#[derive(Debug, Parser, PartialEq, Eq)]
pub(crate) struct UpdateOpts {
    /// Proceed even when already up-to-date or when a downloaded update
    /// is waiting for a reboot.
    #[clap(short = 'f', long)]
    pub(crate) force: bool,
}

/// Perform a rebase operation
#[derive(Debug, Parser, PartialEq, Eq)]
pub(crate) struct RebaseOpts {
    /// Image reference to switch to, e.g. `docker://registry/os:tag`.
    pub(crate) image: String,

    /// Proceed even when already on the target revision or when a
    /// downloaded update is waiting for a reboot.
    #[clap(short = 'f', long)]
    pub(crate) force: bool,
}

/// The `system` CLI.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "system")]
#[clap(rename_all = "kebab-case", version)]
pub(crate) enum Opt {
    /// Update your system to the latest available image.
    Update(UpdateOpts),
    /// Switch to a different OS image.
    Rebase(RebaseOpts),
    /// Background update poller; started by the user session.
    #[clap(hide = true)]
    UpdateCheck,
}

/// Require root privileges, erroring out before any state is touched.
pub(crate) fn require_root() -> Result<(), Error> {
    if !rustix::process::geteuid().is_root() {
        return Err(Error::NotRoot);
    }
    Ok(())
}

/// Refuse to start while a downloaded update is waiting for a reboot,
/// unless `--force` was given.
fn ensure_no_pending_update(paths: &SystemPaths, force: bool) {
    if force || !paths.update_rootfs().is_dir() {
        return;
    }
    output::error("an update has already been downloaded and is waiting to be applied");
    output::error("you must reboot before running this command");
    std::process::exit(1);
}

fn update(opts: UpdateOpts) -> Result<()> {
    require_root()?;
    let paths = SystemPaths::default();
    output::info("attempting to acquire system lock");
    output::info("if stuck for long, an update may be progressing in the background");
    ensure_no_pending_update(&paths, opts.force);

    let config = SystemConfig::load(&paths.system_config())?;
    let image_ref = config.require_image()?.to_string();
    if !opts.force && image::is_already_latest(&image_ref, &paths)? {
        return Err(Error::AlreadyLatest("your system is already up-to-date".into()).into());
    }

    let _lock = LockFile::acquire_exclusive(&paths.lock_file())?;
    rebase::rebase(&paths, &image_ref)?;
    output::info("update complete; you may now reboot.");
    Ok(())
}

fn rebase_to(opts: RebaseOpts) -> Result<()> {
    require_root()?;
    let paths = SystemPaths::default();
    output::info("attempting to acquire system lock");
    output::info("if stuck for long, an update may be progressing in the background");
    ensure_no_pending_update(&paths, opts.force);

    if !opts.force && image::is_already_latest(&opts.image, &paths)? {
        return Err(Error::AlreadyLatest(
            "your system is already on the latest revision of the specified image".into(),
        )
        .into());
    }

    let _lock = LockFile::acquire_exclusive(&paths.lock_file())?;
    rebase::rebase(&paths, &opts.image)?;
    output::info("update complete; you may now reboot.");
    Ok(())
}

/// Parse the provided arguments and execute.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args))
}

fn run_from_opt(opt: Opt) -> Result<()> {
    match opt {
        Opt::Update(opts) => update(opts),
        Opt::Rebase(opts) => rebase_to(opts),
        Opt::UpdateCheck => daemon::update_check(&SystemPaths::default()),
    }
}
