//! Structured logging for the Qubee session engine
//!
//! Every Qubee crate logs through `tracing`. This crate installs the
//! subscriber that turns those events into console output, rolling JSONL
//! files, or both.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **Pretty Console**: Human-readable output for development
//! - **Session Context**: Stamp `peer_id` and `session_id` on every event of an operation
//! - **File Rotation**: Daily/hourly rotation with retention via tracing-appender
//! - **TOML Config**: [`LogConfig`] loads from the same files as the engine config
//!
//! # Quick Start
//!
//! ```no_run
//! use qubee_logging::{LogConfig, QubeeSubscriberBuilder};
//!
//! // Development mode with pretty human-readable output
//! let _guard = QubeeSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .try_init()
//!     .expect("subscriber installed");
//! ```
//!
//! Keep the returned guard alive for as long as file output should be
//! flushed; dropping it stops the background writer.

pub mod config;
pub mod context;
pub mod error;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, FilterConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{SessionContextData, SessionContextGuard};
pub use error::{LoggingError, LoggingResult};
pub use layers::{SessionContextExtension, SessionContextLayer};
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::LevelFilter, layer::Layered, layer::SubscriberExt,
    util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// The fully assembled subscriber type
pub type QubeeSubscriber = Layered<EnvFilter, Layered<Vec<BoxedLayer>, Registry>>;

/// Builder for the Qubee tracing subscriber
#[derive(Debug, Clone, Default)]
pub struct QubeeSubscriberBuilder {
    config: LogConfig,
}

impl QubeeSubscriberBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Add rolling JSONL file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Assemble the subscriber without installing it
    ///
    /// `RUST_LOG` takes precedence over the configured levels and filters.
    /// The guard is present when file output is configured.
    pub fn build(self) -> LoggingResult<(QubeeSubscriber, Option<WorkerGuard>)> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.config.filter_directives())
                .map_err(|e| LoggingError::Config(e.to_string()))?,
        };

        let mut stack: Vec<BoxedLayer> = vec![SessionContextLayer::new().boxed()];

        let console = &self.config.console;
        if console.enabled {
            let level = match &console.level {
                Some(level) => level
                    .parse::<LevelFilter>()
                    .map_err(|e| LoggingError::Config(format!("console level {:?}: {}", level, e)))?,
                None => LevelFilter::TRACE,
            };

            let layer = if console.pretty {
                tracing_subscriber::fmt::layer()
                    .with_ansi(console.ansi)
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .with_filter(level)
                    .boxed()
            } else {
                layers::jsonl_layer::<Registry, _>(std::io::stderr, &self.config.jsonl)
                    .with_filter(level)
                    .boxed()
            };
            stack.push(layer);
        }

        let mut guard = None;
        if let Some(file) = &self.config.file {
            fs::create_dir_all(&file.directory)?;

            let rotation = match file.rotation {
                RotationStrategy::Daily => Rotation::DAILY,
                RotationStrategy::Hourly => Rotation::HOURLY,
                RotationStrategy::Never => Rotation::NEVER,
            };
            let mut appender = RollingFileAppender::builder()
                .rotation(rotation)
                .filename_prefix(file.prefix.clone())
                .filename_suffix("jsonl");
            if let Some(max_files) = file.max_files {
                appender = appender.max_log_files(max_files);
            }
            let appender = appender
                .build(&file.directory)
                .map_err(|e| LoggingError::Appender(e.to_string()))?;

            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            stack.push(layers::jsonl_layer::<Registry, _>(writer, &self.config.jsonl).boxed());
            guard = Some(worker_guard);
        }

        let subscriber = Registry::default().with(stack).with(filter);
        Ok((subscriber, guard))
    }

    /// Install the subscriber as the global default
    pub fn try_init(self) -> LoggingResult<Option<WorkerGuard>> {
        let (subscriber, guard) = self.build()?;
        subscriber
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }
}

/// Install JSONL console logging with default settings
pub fn init_default() -> LoggingResult<()> {
    QubeeSubscriberBuilder::new().try_init().map(|_| ())
}

/// Install pretty console logging at debug level
pub fn init_development() -> LoggingResult<()> {
    QubeeSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .try_init()
        .map(|_| ())
}

/// Install minimal logging for tests
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_testing() {
    let _ = QubeeSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creation() {
        let builder = QubeeSubscriberBuilder::new();
        assert_eq!(builder.config().default_level, "info");
    }

    #[test]
    fn test_default_is_jsonl() {
        let builder = QubeeSubscriberBuilder::new();
        assert!(!builder.config().console.pretty);
    }

    #[test]
    fn test_builder_with_config() {
        let builder = QubeeSubscriberBuilder::new().with_config(LogConfig::development());
        assert_eq!(builder.config().default_level, "debug");
        assert!(builder.config().console.pretty);
    }

    #[test]
    fn test_builder_with_level_and_console() {
        let builder = QubeeSubscriberBuilder::new()
            .with_level("trace")
            .with_console(false);
        assert_eq!(builder.config().default_level, "trace");
        assert!(!builder.config().console.enabled);
    }

    #[test]
    fn test_invalid_console_level_rejected() {
        let mut config = LogConfig::testing();
        config.console.level = Some("loud".to_string());
        let err = QubeeSubscriberBuilder::new()
            .with_config(config)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, LoggingError::Config(_)));
    }

    #[test]
    fn test_file_output_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let (subscriber, guard) = QubeeSubscriberBuilder::new()
            .with_console(false)
            .with_level("info")
            .with_file_output(FileConfig {
                directory: dir.path().join("logs"),
                prefix: "engine".to_string(),
                rotation: RotationStrategy::Never,
                max_files: None,
            })
            .build()
            .unwrap();
        assert!(guard.is_some());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(peer = "bob", "session established");
        });
        drop(guard);

        let entries: Vec<_> = fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("engine"));

        let contents = fs::read_to_string(&entries[0]).unwrap();
        assert!(contents.contains("session established"));
        assert!(contents.contains("\"peer\":\"bob\""));
    }
}
