//! Shared configuration, scheduling, transport, and file-rotation machinery used by both the
//! `daq-worker` and `daq-supervisor` binaries.

pub mod clock;
pub mod config;
pub mod error;
pub mod framer;
pub mod instrument_list;
pub mod schedule;
pub mod shutdown;
pub mod transport;
pub mod value;
pub mod writer;

use log::LevelFilter;

/// Initializes `pretty_env_logger` from `RUST_LOG` (defaulting to `info`) and installs a panic
/// hook that logs panics through the `log` facade instead of letting them print straight to
/// stderr. Both binaries call this first thing in `main`.
pub fn init_logging() {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    std::env::set_var("RUST_LOG", &level);

    pretty_env_logger::formatted_builder()
        .parse_filters(&level)
        .filter_module("mio", LevelFilter::Off)
        .format_timestamp_secs()
        .init();

    log_panics::init();
}
