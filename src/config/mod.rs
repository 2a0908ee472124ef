use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub graph: GraphConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// How the relationship mapper treats a second temporal edge into an
/// already-linked slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalConflictPolicy {
    /// Later relationships overwrite earlier ones, in supplied order.
    #[default]
    LastWriteWins,
    /// A second edge into an occupied slot fails the build.
    Reject,
}

impl std::fmt::Display for TemporalConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemporalConflictPolicy::LastWriteWins => write!(f, "last_write_wins"),
            TemporalConflictPolicy::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for TemporalConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "last_write_wins" | "last-write-wins" => Ok(TemporalConflictPolicy::LastWriteWins),
            "reject" => Ok(TemporalConflictPolicy::Reject),
            _ => Err(format!("Unknown temporal conflict policy: {}", s)),
        }
    }
}

/// Graph construction and validation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Maximum length of the lead text in a node label.
    #[serde(default = "default_label_max_length")]
    pub label_max_length: usize,
    /// Characters of full text kept in a node summary.
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
    /// Largest tolerated index distance between a speaker's appearances.
    #[serde(default = "default_speaker_gap_threshold")]
    pub speaker_gap_threshold: usize,
    /// Precedence rule for conflicting temporal edges.
    #[serde(default)]
    pub temporal_conflicts: TemporalConflictPolicy,
    /// Refuse to persist a graph that fails any invariant.
    #[serde(default = "default_fail_on_violation")]
    pub fail_on_violation: bool,
    /// Turns grouped per level-3 node by default; 0 builds no level 3.
    #[serde(default = "default_turns_per_segment")]
    pub turns_per_segment: usize,
}

fn default_label_max_length() -> usize {
    60
}

fn default_summary_max_chars() -> usize {
    150
}

fn default_speaker_gap_threshold() -> usize {
    50
}

fn default_fail_on_violation() -> bool {
    true
}

fn default_turns_per_segment() -> usize {
    5
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            label_max_length: default_label_max_length(),
            summary_max_chars: default_summary_max_chars(),
            speaker_gap_threshold: default_speaker_gap_threshold(),
            temporal_conflicts: TemporalConflictPolicy::default(),
            fail_on_violation: default_fail_on_violation(),
            turns_per_segment: default_turns_per_segment(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH")
                    .unwrap_or_else(|_| "./data/conversation_graph.db".to_string()),
            ),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS").unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let temporal_conflicts = match env::var("GRAPH_TEMPORAL_CONFLICTS") {
            Ok(raw) => raw
                .parse::<TemporalConflictPolicy>()
                .map_err(|message| AppError::Config { message })?,
            Err(_) => TemporalConflictPolicy::default(),
        };

        let graph = GraphConfig {
            label_max_length: parse_env("GRAPH_LABEL_MAX_LENGTH")
                .unwrap_or_else(default_label_max_length),
            summary_max_chars: parse_env("GRAPH_SUMMARY_MAX_CHARS")
                .unwrap_or_else(default_summary_max_chars),
            speaker_gap_threshold: parse_env("GRAPH_SPEAKER_GAP_THRESHOLD")
                .unwrap_or_else(default_speaker_gap_threshold),
            temporal_conflicts,
            fail_on_violation: parse_env("GRAPH_FAIL_ON_VIOLATION")
                .unwrap_or_else(default_fail_on_violation),
            turns_per_segment: parse_env("GRAPH_TURNS_PER_SEGMENT")
                .unwrap_or_else(default_turns_per_segment),
        };

        Ok(Config {
            database,
            logging,
            graph,
        })
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}
