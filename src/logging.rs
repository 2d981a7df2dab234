//! Structured logging setup using `tracing-subscriber`.
//!
//! The service runs containerised, so everything goes to stderr. Output is
//! human-readable by default; set `LOG_FORMAT=json` for JSON lines.
//! Verbosity is controlled by `RUST_LOG` (default: `info`).

use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber.
///
/// Called once at startup, before any other component logs.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
