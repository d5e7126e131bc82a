//! Logging module
//!
//! Thin macros over `tracing` so every call site names its module the
//! same way: `log_info!(MODULE, "message {}", arg)`.

use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber.
///
/// INFO by default, DEBUG with `verbose`. `RUST_LOG` wins when set.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("codexctl={}", default_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[macro_export]
macro_rules! log_debug {
    ($module:expr, $($arg:tt)*) => {
        ::tracing::debug!(module = %$module, "{}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($module:expr, $($arg:tt)*) => {
        ::tracing::info!(module = %$module, "{}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($module:expr, $($arg:tt)*) => {
        ::tracing::warn!(module = %$module, "{}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($module:expr, $($arg:tt)*) => {
        ::tracing::error!(module = %$module, "{}", format_args!($($arg)*))
    };
}
