//! User-facing console output.
//!
//! The updater speaks a fixed line protocol that the distribution's
//! frontends parse: informational lines carry an `i: ` prefix on stdout,
//! warnings `w: ` and errors `E: ` on stderr. Colors are applied only
//! when the stream is a terminal (anstream strips them otherwise).

/// Print an informational message to stdout.
pub fn info(msg: impl AsRef<str>) {
    anstream::println!("i: {}", msg.as_ref());
}

/// Print a warning message to stderr.
pub fn warn(msg: impl AsRef<str>) {
    anstream::eprintln!(
        "{}w: {}{}",
        anstyle::AnsiColor::Yellow.render_fg(),
        msg.as_ref(),
        anstyle::Reset.render()
    );
}

/// Print an error message to stderr.
pub fn error(msg: impl AsRef<str>) {
    anstream::eprintln!(
        "{}E: {}{}",
        anstyle::AnsiColor::Red.render_fg(),
        msg.as_ref(),
        anstyle::Reset.render()
    );
}
