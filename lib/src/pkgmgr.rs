//! Package-manager detection and use inside a staged rootfs.

use anyhow::Result;
use fn_error_context::context;

use crate::errors::Error;
use crate::rootfs::Rootfs;

/// The package manager shipped in a target rootfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PackageManager {
    Pacman,
    Apt,
}

impl PackageManager {
    /// Detect the package manager present in `rootfs`.
    pub(crate) fn detect(rootfs: &Rootfs) -> Result<Self, Error> {
        if rootfs.exists("usr/bin/pacman") {
            Ok(Self::Pacman)
        } else if rootfs.exists("usr/bin/apt-get") {
            Ok(Self::Apt)
        } else {
            Err(Error::UnsupportedPkgManager)
        }
    }

    /// Prepare the manager for installs: keyring bootstrap for pacman,
    /// index refresh for apt.
    #[context("Initializing package manager")]
    pub(crate) fn init(&self, rootfs: &Rootfs) -> Result<()> {
        match self {
            Self::Pacman => {
                rootfs
                    .task("Initializing pacman keyring", "pacman-key")
                    .args(["--init"])
                    .run()?;
                rootfs
                    .task("Populating pacman keyring", "pacman-key")
                    .args(["--populate"])
                    .run()?;
            }
            Self::Apt => {
                rootfs
                    .task("Updating apt package indexes", "apt-get")
                    .args(["update"])
                    .run()?;
            }
        }
        Ok(())
    }

    /// Install `pkgs` inside the rootfs, non-interactively. Package
    /// names are passed as individual arguments.
    #[context("Installing packages")]
    pub(crate) fn install(&self, rootfs: &Rootfs, pkgs: &[String]) -> Result<()> {
        match self {
            Self::Pacman => {
                let mut args = vec!["-Sy".to_string(), "--ask=4".to_string()];
                args.extend(pkgs.iter().cloned());
                rootfs.task("Installing packages", "pacman").args(args).run()
            }
            Self::Apt => {
                let mut args = vec![
                    "DEBIAN_FRONTEND=noninteractive".to_string(),
                    "apt-get".to_string(),
                    "install".to_string(),
                    "-yq".to_string(),
                ];
                args.extend(pkgs.iter().cloned());
                rootfs.task("Installing packages", "env").args(args).run()
            }
        }
    }
}
