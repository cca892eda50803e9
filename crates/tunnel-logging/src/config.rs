//! Logging configuration
//!
//! Deserializes from the `[logging]` table of a service's TOML file. Every
//! field is optional; missing ones take the service defaults (JSON lines on
//! stdout at `info`).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub console: ConsoleConfig,
    /// JSON lines written to a file as well as the console
    pub file: Option<FileConfig>,
    /// Add source file and line to JSON lines
    pub with_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: ConsoleConfig::default(),
            file: None,
            with_location: true,
        }
    }
}

impl LogConfig {
    /// Command line tools: warnings and errors as plain text on stderr,
    /// leaving stdout to the command's own output
    pub fn operator() -> Self {
        Self {
            level: "warn".to_string(),
            console: ConsoleConfig {
                enabled: true,
                format: ConsoleFormat::Pretty,
                target: ConsoleTarget::Stderr,
                ansi: false,
            },
            file: None,
            with_location: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: ConsoleFormat,
    pub target: ConsoleTarget,
    /// Colors; only honored by the pretty format
    pub ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ConsoleFormat::Json,
            target: ConsoleTarget::Stdout,
            ansi: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleTarget {
    #[default]
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name is `<prefix>.log`, or `<prefix>.<date>.log` when rolling
    pub prefix: String,
    pub rotation: FileRotation,
    /// Rolled files kept on disk; all of them when unset
    pub max_files: Option<usize>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "tunnel-gateway".to_string(),
            rotation: FileRotation::Daily,
            max_files: Some(14),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    #[default]
    Daily,
    /// One file, truncated at startup
    Never,
}
