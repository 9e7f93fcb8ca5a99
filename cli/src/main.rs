//! The `system` binary.

// Good defaults
#![forbid(unused_must_use)]
#![deny(unsafe_code)]

use anyhow::Result;

fn run() -> Result<()> {
    system_utils::initialize_tracing();
    tracing::trace!("starting");
    system_lib::cli::run_from_iter(std::env::args())
}

fn main() {
    if let Err(e) = run() {
        system_utils::output::error(format!("{e:#}"));
        std::process::exit(1);
    }
}
