//! Structured logging setup.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::Result;

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level; with a log file configured, output goes there without
/// ANSI escapes. Safe to call more than once; later calls are no-ops.
pub fn init(cfg: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    match &cfg.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
                .ok();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .try_init()
                .ok();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn repeated_init_is_harmless() {
        let cfg = LoggingConfig::default();
        init(&cfg).unwrap();
        init(&cfg).unwrap();
    }

    #[test]
    fn file_sink_receives_output() {
        // A scoped subscriber sidesteps the process-global one, so this
        // holds regardless of which test installed the default first.
        let file = tempfile::NamedTempFile::new().unwrap();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("info"))
            .with_writer(Mutex::new(file.reopen().unwrap()))
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("telemetry file sink check");
        });

        let mut contents = String::new();
        file.reopen().unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("telemetry file sink check"));
    }
}
