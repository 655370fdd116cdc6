//! Logging initialization.
//!
//! Sets up structured logging with tracing, pretty or JSON formatted,
//! optionally written to a file.

use std::path::Path;
use std::sync::Mutex;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

// The file writer flushes on drop, so the guard lives until exit.
static LOG_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

/// Initialize logging from the `[logging]` section.
pub fn init_from_config(config: &LoggingConfig) -> anyhow::Result<()> {
    let json_format = config.format()? == LogFormat::Json;
    match &config.log_file {
        Some(path) => init_telemetry_with_file(&config.level, path, json_format),
        None => init_telemetry(&config.level, json_format),
    }
}

/// Initialize logging to stderr.
pub fn init_telemetry(log_level: &str, json_format: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(log_level)?;

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}

/// Initialize logging with file output.
pub fn init_telemetry_with_file(
    log_level: &str,
    log_file: &Path,
    json_format: bool,
) -> anyhow::Result<()> {
    let (subscriber, guard) = file_subscriber(log_level, log_file, json_format)?;
    subscriber.try_init()?;

    if let Ok(mut g) = LOG_GUARD.lock() {
        *g = Some(guard);
    }

    Ok(())
}

type BoxedSubscriber = Box<dyn tracing::Subscriber + Send + Sync>;

/// Build a subscriber appending to `log_file` without installing it.
fn file_subscriber(
    log_level: &str,
    log_file: &Path,
    json_format: bool,
) -> anyhow::Result<(BoxedSubscriber, WorkerGuard)> {
    let filter = EnvFilter::try_new(log_level)?;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let subscriber: BoxedSubscriber = if json_format {
        Box::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(non_blocking)),
        )
    } else {
        Box::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking)),
        )
    };

    Ok((subscriber, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        assert!(init_telemetry("keystone=loud", false).is_err());
    }

    #[test]
    fn test_init_telemetry() {
        // A second global subscriber is refused, so only the first call
        // in this process can succeed.
        let _ = init_telemetry("info", false);
        assert!(init_telemetry("info", true).is_err());
    }

    #[test]
    fn test_file_output_honors_json_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keystone.log");

        let (subscriber, guard) = file_subscriber("info", &path, true).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(proposal = 7, "written as json");
        });
        drop(guard);

        let contents = std::fs::read_to_string(&path).unwrap();
        let line = contents.lines().next().unwrap();
        let record: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(record["fields"]["message"], "written as json");
        assert_eq!(record["fields"]["proposal"], 7);
    }

    #[test]
    fn test_file_output_pretty_is_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keystone.log");

        let (subscriber, guard) = file_subscriber("info", &path, false).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("written as text");
        });
        drop(guard);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("written as text"));
        assert!(serde_json::from_str::<serde_json::Value>(contents.trim()).is_err());
    }
}
