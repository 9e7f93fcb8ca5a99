//! Error kinds with dedicated user-visible handling.

use thiserror::Error;

/// Failure modes of the update pipeline that map to specific console
/// messages; everything else travels as plain [`anyhow::Error`].
#[derive(Debug, Error)]
pub(crate) enum Error {
    /// `/system.yaml` could not be read or parsed.
    #[error("failed to read or parse /system.yaml")]
    SystemConfig,

    /// `skopeo inspect` failed or produced unparseable output.
    #[error("failed to read remote metadata for image {0}")]
    ImageMetadata(String),

    /// One of the pull/unpack steps failed.
    #[error("failed to pull image {0}")]
    ImagePull(String),

    /// The remote image lacks the `org.opencontainers.image.revision` label.
    #[error("missing revision from remote image metadata")]
    MissingRevisionLabel,

    /// The target rootfs carries neither pacman nor apt-get.
    #[error("no supported package manager in target rootfs")]
    UnsupportedPkgManager,

    /// An identity database could not be parsed as expected.
    #[error("malformed /etc/{0}")]
    MalformedDatabase(&'static str),

    /// The caller is not root.
    #[error("must be run as root")]
    NotRoot,

    /// The system already runs the requested revision.
    #[error("{0}")]
    AlreadyLatest(String),
}
