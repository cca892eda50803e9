use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tunnel_eventlog::EventLogConfig;
use tunnel_logging::{FileConfig, LogConfig};

/// Contents of the optional TOML configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub eventlog: EventLogConfig,
    pub logging: LoggingSection,
    /// Where `tail --resume` keeps reader positions
    pub positions_directory: Option<PathBuf>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            eventlog: EventLogConfig::default(),
            logging: LoggingSection::default(),
            positions_directory: None,
        }
    }
}

/// `[logging]` table; the console always goes to stderr because stdout
/// carries command output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub file: Option<FileConfig>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        let operator = LogConfig::operator();
        Self {
            level: operator.level,
            file: operator.file,
        }
    }
}

impl LoggingSection {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            level: self.level.clone(),
            file: self.file.clone(),
            ..LogConfig::operator()
        }
    }
}

impl ReaderConfig {
    /// Load from `path`, or defaults when no file is given or it is missing
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply command line overrides
    pub fn apply(&mut self, cli: &Cli) {
        if let Some(directory) = &cli.directory {
            self.eventlog.directory = directory.clone();
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Position store directory, defaulting to `<eventlog dir>/positions`
    pub fn positions_directory(&self) -> PathBuf {
        self.positions_directory
            .clone()
            .unwrap_or_else(|| self.eventlog.directory.join("positions"))
    }
}

#[derive(Parser)]
#[command(name = "tunnel-eventreader", about = "Inspect and tail tunnel event logs")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,
    /// Event log directory (overrides the configuration file)
    #[arg(long, short)]
    pub directory: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List log files in the directory, oldest first
    Ls,
    /// Print every record of one log file as JSON lines
    Dump {
        /// Log id, or a path to a log file
        log: String,
    },
    /// Append one event
    Push {
        /// Event type name (peer_add, peer_update, ...) or number
        #[arg(long = "type", value_parser = parse_event_type)]
        event_type: tunnel_eventlog::EventType,
        /// JSON payload
        data: String,
        /// Unix timestamp in seconds; now when omitted
        #[arg(long, default_value_t = 0)]
        timestamp: i64,
    },
    /// Follow the log and print events as JSON lines
    Tail {
        /// Start at this log id (earliest retained log when omitted)
        #[arg(long)]
        log_id: Option<String>,
        /// Start offset inside `--log-id`
        #[arg(long, requires = "log_id")]
        offset: Option<i64>,
        /// Only follow events written to the current log
        #[arg(long, conflicts_with_all = ["log_id", "resume"])]
        active: bool,
        /// Comma separated event types to print
        #[arg(long, value_delimiter = ',', value_parser = parse_event_type)]
        types: Vec<tunnel_eventlog::EventType>,
        /// Resume after the position stored for `--subscriber-id`
        #[arg(long, requires = "subscriber_id", conflicts_with = "log_id")]
        resume: bool,
        /// Reader id used for position tracking
        #[arg(long)]
        subscriber_id: Option<String>,
        /// Stop after this many events
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn parse_event_type(s: &str) -> Result<tunnel_eventlog::EventType, String> {
    tunnel_eventlog::EventType::parse(s).ok_or_else(|| format!("unknown event type `{}`", s))
}
