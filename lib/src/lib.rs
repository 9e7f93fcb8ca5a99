//! # CommonArch system updater
//!
//! This crate implements `system`, the image-based update tool for a
//! distribution whose root filesystem is delivered as an OCI container
//! image. A rebase stages a replacement rootfs while preserving local
//! identity and variable state; a reboot promotes it.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

mod bootloader;
pub mod cli;
mod config;
mod daemon;
mod errors;
mod etcmerge;
mod fsops;
mod image;
mod lockfile;
mod paths;
mod pkgmgr;
mod rebase;
mod rootfs;
mod task;
mod users;
