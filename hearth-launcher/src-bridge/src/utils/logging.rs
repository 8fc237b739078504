//! Logging setup for the bridge process.
//!
//! Stdout carries the bridge protocol, so every log line goes to stderr.

use log::LevelFilter;

/// Install the global logger. `RUST_LOG` overrides the configured level.
pub fn init(debug_logging: bool) {
    let level = if debug_logging {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let result = env_logger::Builder::new()
        .filter_level(level)
        // Keep HTTP internals quiet unless asked for.
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("reqwest", LevelFilter::Warn)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis()
        .try_init();

    if let Err(e) = result {
        eprintln!("Logger already initialised: {}", e);
    }
}
