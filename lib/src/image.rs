//! OCI image inspection, pull, and unpack, forking skopeo and umoci as
//! subprocesses.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use fn_error_context::context;
use serde::Deserialize;

use crate::errors::Error;
use crate::fsops;
use crate::paths::SystemPaths;
use crate::rootfs::Rootfs;
use crate::task::Task;

/// The OCI label identifying an image build; its value is the opaque
/// revision string this tool compares installations by.
pub(crate) const REVISION_LABEL: &str = "org.opencontainers.image.revision";

/// The tag under which the pulled image is stored locally.
const STORE_TAG: &str = "main";

/// The subset of `skopeo inspect` output we consume.
#[derive(Debug, Deserialize)]
pub(crate) struct ImageMetadata {
    /// Image labels; may be entirely absent.
    #[serde(rename = "Labels")]
    labels: Option<BTreeMap<String, String>>,
}

impl ImageMetadata {
    /// The value of the revision label, when present.
    pub(crate) fn revision(&self) -> Option<&str> {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(REVISION_LABEL))
            .map(|s| s.as_str())
    }
}

/// Inspect `image` remotely and parse its metadata.
pub(crate) fn fetch_metadata(image: &str) -> Result<ImageMetadata, Error> {
    let out = Task::new(format!("Inspecting {image}"), "skopeo")
        .quiet()
        .args(["inspect", image])
        .read()
        .map_err(|e| {
            tracing::debug!("skopeo inspect failed: {e:#}");
            Error::ImageMetadata(image.to_string())
        })?;
    serde_json::from_str(&out).map_err(|e| {
        tracing::debug!("parsing skopeo inspect output failed: {e}");
        Error::ImageMetadata(image.to_string())
    })
}

/// Pull `image` into the shared-blob OCI layout and unpack the bundle.
///
/// Four steps, all of which must succeed: copy into the image store,
/// drop the store's private blob directory, relink it to the shared
/// blob store, and unpack the bundle with umoci.
pub(crate) fn pull(image: &str, paths: &SystemPaths) -> Result<()> {
    let store = paths.system_image();
    let blob_dir_arg = format!("--dest-shared-blob-dir={}", paths.blobs());
    let store_arg = format!("oci:{store}:{STORE_TAG}");
    let st = Task::new(format!("Copying {image}"), "skopeo")
        .quiet()
        .args(["copy", image, blob_dir_arg.as_str(), store_arg.as_str()])
        .status()?;
    if !st.success() {
        return Err(Error::ImagePull(image.to_string()).into());
    }

    link_shared_blobs(paths)?;

    let image_arg = format!("{store}:{STORE_TAG}");
    let st = Task::new("Unpacking image", "umoci")
        .quiet()
        .args(["unpack", "--image", image_arg.as_str(), paths.bundle().as_str()])
        .status()?;
    if !st.success() {
        return Err(Error::ImagePull(image.to_string()).into());
    }
    Ok(())
}

/// Point the image store's blob directory at the shared one, replacing
/// whatever skopeo left there.
#[context("Relinking shared blobs")]
pub(crate) fn link_shared_blobs(paths: &SystemPaths) -> Result<()> {
    fsops::remove_all(&paths.system_image_blobs())?;
    fsops::symlink(&paths.blobs(), &paths.system_image_blobs())
}

/// The revision of the currently installed image, when known.
pub(crate) fn installed_revision(paths: &SystemPaths) -> Result<Option<String>> {
    let path = paths.revision();
    if !path.is_file() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path).with_context(|| format!("Reading {path}"))?;
    Ok(Some(s.trim().to_string()))
}

/// Whether the installed revision matches the remote image's revision.
/// An unknown installed revision always means "not latest".
pub(crate) fn is_already_latest(image: &str, paths: &SystemPaths) -> Result<bool> {
    let Some(current) = installed_revision(paths)? else {
        return Ok(false);
    };
    let meta = fetch_metadata(image)?;
    Ok(meta.revision() == Some(current.as_str()))
}

#[derive(Debug, Deserialize)]
struct BundleConfig {
    root: BundleRoot,
}

#[derive(Debug, Deserialize)]
struct BundleRoot {
    path: String,
}

/// Locate the unpacked root filesystem named by the bundle's
/// `config.json`.
#[context("Reading bundle config")]
pub(crate) fn bundle_rootfs(paths: &SystemPaths) -> Result<Rootfs> {
    let config = paths.bundle().join("config.json");
    let f = std::fs::File::open(&config).with_context(|| format!("Opening {config}"))?;
    let parsed: BundleConfig = serde_json::from_reader(std::io::BufReader::new(f))?;
    Ok(Rootfs::new(paths.bundle().join(parsed.root.path)))
}
