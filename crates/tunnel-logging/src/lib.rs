//! Structured logging setup for the tunnel gateway
//!
//! One place that turns a [`LogConfig`] into a global `tracing` subscriber.
//!
//! The gateway logs JSON lines to stdout (and optionally a daily file);
//! command line tools use [`LogConfig::operator`] so that their stdout
//! carries only command output. `RUST_LOG` overrides the configured level.
//!
//! ```ignore
//! use tunnel_logging::{LogConfig, TunnelSubscriberBuilder};
//!
//! let _guard = TunnelSubscriberBuilder::new()
//!     .with_config(LogConfig::operator())
//!     .init()?;
//! ```

pub mod config;

pub use config::{ConsoleConfig, ConsoleFormat, ConsoleTarget, FileConfig, FileRotation, LogConfig};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Errors raised while installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Log directory or file could not be created
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The rolling appender rejected its configuration
    #[error("Failed to create rolling appender: {0}")]
    Appender(String),

    /// A global subscriber is already installed
    #[error("Subscriber already initialized: {0}")]
    AlreadyInitialized(String),
}

type Base = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync + 'static>;

/// Fully assembled subscriber, ready to install
pub type TunnelSubscriber = Layered<Vec<BoxedLayer>, Base>;

/// Turns a [`LogConfig`] into a subscriber
#[derive(Debug, Default)]
pub struct TunnelSubscriberBuilder {
    config: LogConfig,
}

impl TunnelSubscriberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Filter directive used when `RUST_LOG` is unset
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Also write JSON lines to a file
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Assemble the subscriber without installing it
    ///
    /// The returned guard (present with file output) must be kept alive for
    /// buffered lines to reach the file.
    pub fn build(&self) -> Result<(TunnelSubscriber, Option<WorkerGuard>), LoggingError> {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.level));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        let console = &self.config.console;
        let location = self.config.with_location;
        if console.enabled {
            let layer = match (console.format, console.target) {
                (ConsoleFormat::Pretty, ConsoleTarget::Stdout) => {
                    pretty_layer(console.ansi, std::io::stdout)
                }
                (ConsoleFormat::Pretty, ConsoleTarget::Stderr) => {
                    pretty_layer(console.ansi, std::io::stderr)
                }
                (ConsoleFormat::Json, ConsoleTarget::Stdout) => json_layer(location, std::io::stdout),
                (ConsoleFormat::Json, ConsoleTarget::Stderr) => json_layer(location, std::io::stderr),
            };
            layers.push(layer);
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(json_layer(location, writer));
        }

        let subscriber = Registry::default().with(env_filter).with(layers);
        Ok((subscriber, guard))
    }

    /// Install the subscriber globally
    pub fn init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let (subscriber, guard) = self.build()?;
        subscriber
            .try_init()
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }
}

fn pretty_layer<W>(ansi: bool, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(ansi)
        .with_target(true)
        .with_writer(writer)
        .boxed()
}

/// Event fields flattened to the top level, with the span list
fn json_layer<W>(location: bool, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .flatten_event(true)
        .with_file(location)
        .with_line_number(location)
        .with_writer(writer)
        .boxed()
}

fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;

    if config.rotation == FileRotation::Never {
        let path = config.directory.join(format!("{}.log", config.prefix));
        return Ok(tracing_appender::non_blocking(File::create(path)?));
    }

    let mut builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(config.prefix.as_str())
        .filename_suffix("log");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder
        .build(&config.directory)
        .map_err(|e| LoggingError::Appender(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}
