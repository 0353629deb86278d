//! vstream CLI library
//!
//! Shared functionality for the `vstream-streamer` and `vstream-client`
//! tools.

pub mod config;
pub mod stats;

pub use config::{ClientSection, Config, ConfigError, LossSection, StreamerSection};
pub use stats::{
    display_client_summary, display_streamer_summary, format_bytes, format_client_line,
    format_duration, format_streamer_line,
};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise the level is `info`, or `debug`
/// with `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
