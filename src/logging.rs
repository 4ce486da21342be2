//! Structured logging for cpack
//!
//! Every event carries structured fields so runs can be grepped or shipped
//! to a log pipeline as JSON. Logs go to stderr; stdout is reserved for
//! command output such as `info --format json`.
//!
//! # Field conventions
//!
//! - `operation`: what is happening (`install`, `run`, `probe`, `pack`, ...)
//! - `status`: outcome (`success`, `cached`, `installed`, `timeout`, ...)
//! - `stage`: installation stage name
//! - `path`: file or directory the event is about
//! - `commit`: pinned commit for checkouts
//! - `size_bytes` / `entry_count`: sizes for hashing and archives
//!
//! ```rust,ignore
//! use tracing::info;
//!
//! info!(
//!     operation = "install",
//!     stage = "host-app",
//!     status = "installed",
//!     commit = %commit,
//!     "Host application ready"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Environment variable selecting the log format
pub const LOG_FORMAT_ENV: &str = "CPACK_LOG_FORMAT";

/// `timestamp LEVEL(cpack): fields message`
struct CpackFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for CpackFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let level = *event.metadata().level();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f")
        )?;

        if self.with_ansi {
            let color = match level {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(cpack)\x1b[0m: ", color, level)?;
        } else {
            write!(writer, "{:5}(cpack): ", level)?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored, for terminals
    Pretty,
    /// Plain text, for CI logs
    Compact,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Resolve a format name; unknown or empty names pick by environment
    pub fn parse(value: &str, in_ci: bool) -> Self {
        match value.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if in_ci => Self::Compact,
            _ => Self::Pretty,
        }
    }

    /// From `CPACK_LOG_FORMAT`, compact by default when `CI` is set
    pub fn from_env() -> Self {
        Self::parse(
            &std::env::var(LOG_FORMAT_ENV).unwrap_or_default(),
            std::env::var("CI").is_ok(),
        )
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` sets the filter (default `info`), `CPACK_LOG_FORMAT` the format.
/// Calling it twice is harmless; the second call is ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let format = LogFormat::from_env();
    let result = match format {
        LogFormat::Pretty | LogFormat::Compact => {
            let with_ansi = format == LogFormat::Pretty;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .event_format(CpackFormatter { with_ansi })
                        .with_writer(io::stderr),
                )
                .try_init()
        }
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("cpack: logging already initialized: {}", e);
    }
}

/// Operation names
pub mod operations {
    pub const HASH: &str = "hash";
    pub const SNAPSHOT: &str = "snapshot";
    pub const PACK: &str = "pack";
    pub const UNPACK: &str = "unpack";
    pub const INSTALL: &str = "install";
    pub const START: &str = "start";
    pub const PROBE: &str = "probe";
    pub const RUN: &str = "run";
    pub const STOP: &str = "stop";
    pub const WATCHDOG: &str = "watchdog";
}

/// Status values
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const CACHED: &str = "cached";
    pub const INSTALLED: &str = "installed";
    pub const TIMEOUT: &str = "timeout";
    pub const ERROR: &str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_names() {
        assert_eq!(LogFormat::parse("json", false), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON", true), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact", false), LogFormat::Compact);
        assert_eq!(LogFormat::parse(" pretty ", true), LogFormat::Pretty);
    }

    #[test]
    fn test_log_format_default_depends_on_ci() {
        assert_eq!(LogFormat::parse("", false), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("", true), LogFormat::Compact);
        assert_eq!(LogFormat::parse("rainbow", true), LogFormat::Compact);
    }
}
