//! Command-line interface.
//!
//! Thin wrappers over [`GraphService`] that render results as text and map
//! failures to exit codes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::{AppError, InvariantReport};
use crate::graph::{speaker_legend, Node, TURN_LEVEL};
use crate::service::{default_level_specs, GraphService, Transcript};
use crate::storage::Storage;

const RULE: &str = "═══════════════════════════════════════════════════════════════════════════════\n";

/// Build and inspect multi-resolution conversation graphs.
#[derive(Parser, Debug)]
#[command(name = "conversation-graph", version, about)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List stored conversations
    List,

    /// Import a diarized transcript (JSON)
    Import {
        /// Path to the transcript file
        file: PathBuf,
    },

    /// Rebuild the graph of a conversation
    Build {
        /// Conversation to rebuild
        conversation_id: String,

        /// Turns per level-3 node; 0 builds no level 3
        #[arg(long)]
        turns_per_segment: Option<usize>,
    },

    /// Re-validate the stored graph of a conversation
    Check {
        /// Conversation to check
        conversation_id: String,
    },

    /// Print the nodes of one zoom level
    Show {
        /// Conversation to show
        conversation_id: String,

        /// Zoom level to print
        #[arg(long, default_value = "2")]
        level: u32,
    },
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a CLI command against the service.
pub async fn execute_command<S: Storage>(command: Commands, service: &GraphService<S>) -> CliResult {
    match command {
        Commands::List => execute_list(service).await,
        Commands::Import { file } => execute_import(service, file).await,
        Commands::Build {
            conversation_id,
            turns_per_segment,
        } => execute_build(service, &conversation_id, turns_per_segment).await,
        Commands::Check { conversation_id } => execute_check(service, &conversation_id).await,
        Commands::Show {
            conversation_id,
            level,
        } => execute_show(service, &conversation_id, level).await,
    }
}

async fn execute_list<S: Storage>(service: &GraphService<S>) -> CliResult {
    let conversations = match service.conversations().await {
        Ok(c) => c,
        Err(e) => return CliResult::error(format!("Failed to list conversations: {}", e)),
    };

    if conversations.is_empty() {
        return CliResult::success("No conversations stored.\n");
    }

    let mut output = String::new();
    output.push_str("\nConversations\n");
    output.push_str(RULE);
    for c in conversations {
        let built = c
            .built_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never built".to_string());
        output.push_str(&format!(
            "{:<30} {:>6} utterances {:>5} relationships {:>6} nodes  {}\n",
            c.conversation_id, c.utterance_count, c.relationship_count, c.node_count, built
        ));
    }
    CliResult::success(output)
}

async fn execute_import<S: Storage>(service: &GraphService<S>, file: PathBuf) -> CliResult {
    let transcript = match Transcript::from_path(&file) {
        Ok(t) => t,
        Err(e) => return CliResult::error(e.to_string()),
    };

    match service.import(&transcript).await {
        Ok(outcome) => {
            let relationships = match outcome.relationships {
                Some(n) => format!("replaced relationships with {}", n),
                None => "kept stored relationships".to_string(),
            };
            CliResult::success(format!(
                "Imported {} utterance(s) into {}; {}\n",
                outcome.utterances, outcome.conversation_id, relationships
            ))
        }
        Err(e) => CliResult::error(format!("Import failed: {}", e)),
    }
}

async fn execute_build<S: Storage>(
    service: &GraphService<S>,
    conversation_id: &str,
    turns_per_segment: Option<usize>,
) -> CliResult {
    let specs = default_level_specs(
        turns_per_segment.unwrap_or(service.config().turns_per_segment),
    );

    match service.rebuild(conversation_id, &specs).await {
        Ok(outcome) => {
            let mut output = String::new();
            output.push_str(&format!("\nGraph for {}\n", conversation_id));
            output.push_str(RULE);
            output.push_str(&format!("Build: {}\n", outcome.snapshot.build_id));
            for (zoom, nodes) in &outcome.snapshot.levels {
                output.push_str(&format!("  Level {}: {} node(s)\n", zoom, nodes.len()));
            }
            output.push_str(&format!("Relationships: {}\n", outcome.snapshot.relationships.len()));
            output.push('\n');
            output.push_str(&render_report(&outcome.report));
            CliResult::success(output)
        }
        Err(AppError::InvariantsFailed { report }) => CliResult::error(format!(
            "Graph for {} not persisted.\n{}",
            conversation_id,
            render_report(&report)
        )),
        Err(e) => CliResult::error(format!("Build failed: {}", e)),
    }
}

async fn execute_check<S: Storage>(service: &GraphService<S>, conversation_id: &str) -> CliResult {
    match service.check(conversation_id).await {
        Ok(report) if report.is_clean() => CliResult::success(render_report(&report)),
        Ok(report) => CliResult::error(render_report(&report)),
        Err(e) => CliResult::error(format!("Check failed: {}", e)),
    }
}

async fn execute_show<S: Storage>(
    service: &GraphService<S>,
    conversation_id: &str,
    level: u32,
) -> CliResult {
    let nodes = match service.nodes(conversation_id, level).await {
        Ok(n) => n,
        Err(e) => return CliResult::error(format!("Failed to load nodes: {}", e)),
    };

    if nodes.is_empty() {
        return CliResult::error(format!(
            "No level {} nodes for {}; run `build` first.\n",
            level, conversation_id
        ));
    }

    let mut output = String::new();
    output.push_str(&format!("\n{} - level {}\n", conversation_id, level));
    output.push_str(RULE);
    output.push_str(&render_nodes(&nodes));

    if level == TURN_LEVEL {
        output.push_str("\nSpeakers:\n");
        for entry in speaker_legend(&nodes) {
            output.push_str(&format!(
                "  {:<12} {} turn(s), {} utterance(s)\n",
                entry.speaker_id, entry.turn_count, entry.utterance_count
            ));
        }
    }
    CliResult::success(output)
}

fn render_nodes(nodes: &[Node]) -> String {
    let mut output = String::new();
    for node in nodes {
        output.push_str(&format!(
            "{:>6}  {}  ({} utterance(s))\n",
            node.sequence_number,
            node.label,
            node.utterance_count()
        ));
        for (peer, explanation) in &node.contextual_relation {
            output.push_str(&format!("          ~ {}: {}\n", explanation, peer));
        }
    }
    output
}

fn render_report(report: &InvariantReport) -> String {
    if report.is_clean() {
        return "Invariants: all passed ✓\n".to_string();
    }
    let mut output = format!("Invariants: {} violation(s) ✗\n", report.violations.len());
    for violation in &report.violations {
        output.push_str(&format!("  {}\n", violation));
    }
    output
}
