//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber. `RUST_LOG` wins when set; otherwise
/// verbosity maps to info/debug/trace for this crate's targets.
pub fn init_logging(verbose: u8) {
    let default_directive = match verbose {
        0 => "snag=info",
        1 => "snag=debug",
        _ => "snag=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
