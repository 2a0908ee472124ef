//! Storage layer for conversation graph persistence.
//!
//! The graph core never performs I/O; this module supplies the fetch and
//! persist collaborators around it. Utterances are upserted per
//! conversation, a conversation's relationship set is replaced as a whole,
//! and nodes are replaced wholesale by every rebuild.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::graph::{GraphSnapshot, Node, Relationship, Utterance, ZoomLevels};

/// Per-conversation counts for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation identifier.
    pub conversation_id: String,
    /// Stored utterances.
    pub utterance_count: usize,
    /// Stored relationships.
    pub relationship_count: usize,
    /// Persisted nodes across all levels; 0 before the first build.
    pub node_count: usize,
    /// When the persisted graph was built.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_at: Option<DateTime<Utc>>,
}

/// Storage backend trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    // Ingestion side

    /// Insert or replace utterances, keyed by conversation and id.
    /// Returns the number written.
    async fn insert_utterances(&self, utterances: &[Utterance]) -> StorageResult<usize>;
    /// Atomically replace the conversation's relationships with
    /// `relationships`, keeping their order. Returns the number stored.
    async fn replace_relationships(
        &self,
        conversation_id: &str,
        relationships: &[Relationship],
    ) -> StorageResult<usize>;

    // Build inputs

    /// All utterances of a conversation, ordered by sequence number.
    async fn fetch_utterances(&self, conversation_id: &str) -> StorageResult<Vec<Utterance>>;
    /// All relationships of a conversation, in insertion order.
    async fn fetch_relationships(&self, conversation_id: &str)
        -> StorageResult<Vec<Relationship>>;

    // Graph

    /// Atomically replace every node of the snapshot's conversation.
    async fn replace_graph(&self, snapshot: &GraphSnapshot) -> StorageResult<()>;
    /// Persisted nodes at one zoom level, ordered by sequence number.
    async fn get_nodes(&self, conversation_id: &str, zoom_level: u32) -> StorageResult<Vec<Node>>;
    /// Every persisted node of a conversation, grouped by level.
    async fn get_graph(&self, conversation_id: &str) -> StorageResult<ZoomLevels>;
    /// Known conversations with their counts.
    async fn list_conversations(&self) -> StorageResult<Vec<ConversationSummary>>;
}
