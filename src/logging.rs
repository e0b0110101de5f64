//! tracing-subscriber setup for embedding processes.
//!
//! The crate itself only emits `tracing` events; hosts that want output
//! call [`init`] once at startup. Stderr follows `RUST_LOG` (defaulting
//! to `rudder=info`); when a log file is configured it captures
//! `rudder=debug` in append mode, so a quiet terminal still leaves a
//! debuggable trail.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::RudderError;

pub fn init(log_file: Option<&Path>) -> Result<(), RudderError> {
    let stderr_filter = EnvFilter::from_default_env()
        .add_directive("rudder=info".parse().expect("valid log directive"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| RudderError::ConfigLoad {
                    path: path.display().to_string(),
                    source,
                })?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| RudderError::ConfigLoad {
                    path: path.display().to_string(),
                    source,
                })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file)
                    .with_filter(EnvFilter::new("rudder=debug")),
            )
        }
        None => None,
    };

    // try_init: embedding hosts (and tests) may already have a subscriber.
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_with_log_file_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/rudder.log");
        init(Some(&path)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn init_twice_is_harmless() {
        init(None).unwrap();
        init(None).unwrap();
    }
}
