//! # Conversation Graph
//!
//! Turns diarized, speaker-attributed transcripts into multi-resolution
//! graphs and checks that no utterance or speaker is lost on the way.
//!
//! ## Features
//!
//! - **Turn segmentation**: consecutive same-speaker utterances become one turn
//! - **Zoom levels**: utterances (level 1), turns (level 2) and coarser
//!   partitions above, each verified to cover every utterance exactly once
//! - **Relationship maps**: temporal predecessor/successor chains and
//!   contextual links with explanations
//! - **Invariant checks**: completeness, lossless aggregation, chain
//!   linearity, bidirectional symmetry and speaker stability
//! - **Persistence**: SQLite storage with rebuild-not-patch semantics
//!
//! ## Architecture
//!
//! ```text
//! Transcript JSON → Storage (SQLite) → GraphService → GraphBuilder
//!                        ↑                  ↓
//!                   replace_graph ← InvariantChecker
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use conversation_graph::{Config, GraphService};
//! use conversation_graph::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let service = GraphService::new(storage, config.graph);
//!     let outcome = service.rebuild_default("standup-2025-01-06").await?;
//!     println!("{} nodes", outcome.snapshot.node_count());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Command-line interface.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Graph construction and invariant checking.
pub mod graph;
/// Build orchestration over storage.
pub mod service;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use graph::{GraphBuilder, GraphSnapshot, InvariantChecker, Node, Relationship, Utterance};
pub use service::GraphService;
