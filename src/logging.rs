//! Logging setup for the CLI.

use std::io::{self, IsTerminal};
use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Installs the tracing subscriber on stderr.
///
/// Verbosity: 0 = info, 1 = debug, 2+ = trace. `RUST_LOG` overrides the
/// flag entirely when set.
pub fn init(verbose: u8) {
    let default_directive = match verbose {
        0 => "burrow=info",
        1 => "burrow=debug",
        _ => "burrow=trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let fmt_layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
