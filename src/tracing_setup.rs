use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialize structured logging with JSON output for Kiln
pub fn init_tracing(filter: EnvFilter, include_spans: bool) -> Result<()> {
    Registry::default()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(include_spans)
                .with_span_list(include_spans)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .wrap_err("Failed to install JSON tracing subscriber")?;

    tracing::info!(spans = include_spans, "Kiln structured logging initialized");
    Ok(())
}

/// Initialize console-friendly logging for development
pub fn init_console_tracing(filter: EnvFilter) -> Result<()> {
    Registry::default()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .wrap_err("Failed to install console tracing subscriber")?;

    tracing::info!("Kiln console logging initialized");
    Ok(())
}

/// Initialize tracing with custom configuration
///
/// `RUST_LOG`, when set, takes precedence over `level`.
pub fn init_tracing_with_config(level: &str, json_format: bool, include_spans: bool) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?
        }
    };

    if json_format {
        init_tracing(env_filter, include_spans)
    } else {
        init_console_tracing(env_filter)
    }
}

/// Initialize tracing from the `[logging]` section
pub fn init_from_config(logging: &LoggingConfig) -> Result<()> {
    init_tracing_with_config(&logging.level, logging.json, logging.include_spans)
}

/// Span covering one administrative operation on an instance
pub fn create_instance_span(operation: &str, instance: &str) -> tracing::Span {
    tracing::info_span!(
        "instance",
        operation = operation,
        instance.name = instance,
    )
}

/// Span covering one compiled method call
pub fn create_method_span(xid: u64, instance: &str, method: &str) -> tracing::Span {
    tracing::debug_span!(
        "method",
        xid = xid,
        instance.name = instance,
        method = method,
        outcome = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_with_bad_level() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(init_tracing_with_config("kiln=loud", false, false).is_err());
        }
    }

    #[test]
    fn test_init_from_config_installs_once() {
        let logging = LoggingConfig {
            level: "kiln=debug".to_string(),
            json: true,
            include_spans: true,
        };
        // Only one global subscriber per process; this is the one test installing it.
        assert!(init_from_config(&logging).is_ok());
        assert!(init_console_tracing(EnvFilter::new("info")).is_err());
        assert!(init_tracing(EnvFilter::new("info"), false).is_err());
    }

    #[test]
    fn test_create_instance_span() {
        let span = create_instance_span("warm", "boot");
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "instance");
        }
    }

    #[test]
    fn test_create_method_span() {
        let span = create_method_span(1001, "boot", "RECV");
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "method");
        }
    }
}
