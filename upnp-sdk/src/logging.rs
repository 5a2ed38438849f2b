//! Logging infrastructure for the UPnP SDK
//!
//! Every crate in the workspace reports through `tracing`. This module owns
//! the process-wide subscriber: [`install`] sets it up once, [`uninstall`]
//! silences it again. Nothing in the SDK depends on a subscriber being
//! present; without one, events are simply dropped.

use parking_lot::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output at `info`
    Development,
    /// Pretty output with thread ids and source locations at `debug`
    Debug,
    /// Like `Debug`, at `trace`
    Trace,
}

impl LoggingMode {
    fn default_level(self) -> &'static str {
        match self {
            LoggingMode::Silent => "off",
            LoggingMode::Development => "info",
            LoggingMode::Debug => "debug",
            LoggingMode::Trace => "trace",
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Logging is already installed")]
    AlreadyInstalled,
}

struct Installed {
    filter: reload::Handle<EnvFilter, Registry>,
    active: bool,
}

static LOGGER: Mutex<Option<Installed>> = Mutex::new(None);

/// Install the process-wide subscriber for `mode`.
///
/// The output format is fixed by the first successful install; a later
/// install after [`uninstall`] only restores the level.
///
/// # Environment Variables
///
/// - `UPNP_LOG_LEVEL`: override the level or directives (e.g. `ssdp=trace`)
/// - `RUST_LOG`: used when `UPNP_LOG_LEVEL` is unset
pub fn install(mode: LoggingMode) -> Result<(), LoggingError> {
    if mode == LoggingMode::Silent {
        return Ok(());
    }

    let mut logger = LOGGER.lock();
    if let Some(installed) = logger.as_mut() {
        if installed.active {
            return Err(LoggingError::AlreadyInstalled);
        }
        installed
            .filter
            .reload(create_env_filter(mode.default_level()))
            .map_err(|e| LoggingError::TracingInit(e.to_string()))?;
        installed.active = true;
        return Ok(());
    }

    let (filter, handle) = reload::Layer::new(create_env_filter(mode.default_level()));
    let registry = Registry::default().with(filter);
    let result = match mode {
        LoggingMode::Development => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact(),
            )
            .try_init(),
        _ => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
    };
    result.map_err(|e| LoggingError::TracingInit(e.to_string()))?;

    *logger = Some(Installed {
        filter: handle,
        active: true,
    });
    Ok(())
}

/// Install from `UPNP_LOG_MODE` (`silent`, `development`, `debug`, `trace`).
///
/// Defaults to silent when unset or unrecognized.
pub fn install_from_env() -> Result<(), LoggingError> {
    let mode = std::env::var("UPNP_LOG_MODE")
        .ok()
        .and_then(|value| parse_mode(&value))
        .unwrap_or(LoggingMode::Silent);
    install(mode)
}

/// Silence the installed subscriber. A no-op when nothing is installed.
pub fn uninstall() {
    let mut logger = LOGGER.lock();
    if let Some(installed) = logger.as_mut() {
        if installed.filter.reload(EnvFilter::new("off")).is_ok() {
            installed.active = false;
        }
    }
}

/// Whether a subscriber installed by [`install`] is currently emitting.
pub fn is_installed() -> bool {
    LOGGER.lock().as_ref().is_some_and(|l| l.active)
}

/// Map a verbosity name to a mode.
pub fn parse_mode(value: &str) -> Option<LoggingMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "silent" | "off" => Some(LoggingMode::Silent),
        "development" | "info" => Some(LoggingMode::Development),
        "debug" => Some(LoggingMode::Debug),
        "trace" => Some(LoggingMode::Trace),
        _ => None,
    }
}

/// Map a numeric verbosity (as given to the command-line tools) to a mode.
pub fn mode_for_verbosity(level: u8) -> LoggingMode {
    match level {
        0 => LoggingMode::Silent,
        1 => LoggingMode::Development,
        2 => LoggingMode::Debug,
        _ => LoggingMode::Trace,
    }
}

// UPNP_LOG_LEVEL first, then RUST_LOG, then the mode's level
fn create_env_filter(default_level: &str) -> EnvFilter {
    if let Ok(level) = std::env::var("UPNP_LOG_LEVEL") {
        EnvFilter::new(level)
    } else if let Ok(rust_log) = std::env::var("RUST_LOG") {
        EnvFilter::new(rust_log)
    } else {
        EnvFilter::new(default_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_silent_mode_installs_nothing() {
        assert!(install(LoggingMode::Silent).is_ok());
    }

    #[test]
    fn test_uninstall_without_install_is_noop() {
        uninstall();
    }

    #[rstest]
    #[case("silent", Some(LoggingMode::Silent))]
    #[case("Development", Some(LoggingMode::Development))]
    #[case(" debug ", Some(LoggingMode::Debug))]
    #[case("TRACE", Some(LoggingMode::Trace))]
    #[case("loud", None)]
    fn test_parse_mode(#[case] value: &str, #[case] expected: Option<LoggingMode>) {
        assert_eq!(parse_mode(value), expected);
    }

    #[rstest]
    #[case(0, LoggingMode::Silent)]
    #[case(1, LoggingMode::Development)]
    #[case(2, LoggingMode::Debug)]
    #[case(9, LoggingMode::Trace)]
    fn test_mode_for_verbosity(#[case] level: u8, #[case] expected: LoggingMode) {
        assert_eq!(mode_for_verbosity(level), expected);
    }
}
