use cinderlite_shared::errors::{CinderliteError, CinderliteResult};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Level used when neither `RUST_LOG` nor an explicit level is given.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Check a log level from configuration and normalize it.
///
/// Accepts a level name (`off`, `error`, `warn`, `info`, `debug`, `trace`)
/// in any case, or filter directives like `cinderlite=debug,hyper=warn`.
/// Empty means [`DEFAULT_LOG_LEVEL`].
pub fn parse_log_level(level: &str) -> CinderliteResult<String> {
    let level = level.trim().to_ascii_lowercase();
    if level.is_empty() {
        return Ok(DEFAULT_LOG_LEVEL.to_string());
    }

    let valid = if level.contains('=') || level.contains(',') {
        EnvFilter::try_new(&level).is_ok()
    } else {
        level.parse::<LevelFilter>().is_ok()
    };
    if !valid {
        return Err(CinderliteError::Config(format!(
            "Failed to parse log level {:?}",
            level
        )));
    }

    Ok(level)
}

/// Build the log filter: `RUST_LOG` wins, then `level`, then [`DEFAULT_LOG_LEVEL`].
///
/// # Errors
///
/// Returns `Config` if `level` is not a valid log level.
pub fn env_filter(level: Option<&str>) -> CinderliteResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let level = parse_log_level(level.unwrap_or_default())?;
    EnvFilter::try_new(&level)
        .map_err(|e| CinderliteError::Config(format!("Failed to parse log level {:?}: {}", level, e)))
}

/// Install the global subscriber writing to stderr.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(level: Option<&str>) -> CinderliteResult<()> {
    let filter = env_filter(level)?;
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_levels() {
        // RUST_LOG is not set in the test environment.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }

        assert_eq!(env_filter(None).unwrap().to_string(), "info");
        assert_eq!(env_filter(Some("")).unwrap().to_string(), "info");
        assert_eq!(env_filter(Some("DEBUG")).unwrap().to_string(), "debug");
        assert_eq!(
            env_filter(Some("cinderlite=trace")).unwrap().to_string(),
            "cinderlite=trace"
        );
    }

    #[test]
    fn test_invalid_log_level_is_config_error() {
        for level in ["loud", "verbose", "cinderlite=loud"] {
            let err = parse_log_level(level).unwrap_err();
            assert!(matches!(err, CinderliteError::Config(_)), "{}", level);
            assert!(err.to_string().contains("Failed to parse log level"), "{}", level);
        }

        if std::env::var_os("RUST_LOG").is_none() {
            assert!(env_filter(Some("loud")).is_err());
            assert!(init_logging(Some("loud")).is_err());
        }
    }

    #[test]
    fn test_parse_log_level_normalizes() {
        assert_eq!(parse_log_level(" WARN ").unwrap(), "warn");
        assert_eq!(parse_log_level("off").unwrap(), "off");
        assert_eq!(parse_log_level("").unwrap(), DEFAULT_LOG_LEVEL);
        assert_eq!(
            parse_log_level("cinderlite=debug,hyper=warn").unwrap(),
            "cinderlite=debug,hyper=warn"
        );
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging(Some("warn")).unwrap();
        init_logging(Some("warn")).unwrap();
    }
}
