use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{ConversationSummary, Storage};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::graph::{GraphSnapshot, Node, Relationship, RelationshipType, Utterance, ZoomLevels};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const NODE_COLUMNS: &str = "id, conversation_id, zoom_level, label, summary, full_text, speaker_id, \
     utterance_ids, sequence_number, predecessor_id, successor_id, contextual_relation, \
     linked_nodes, chunk_id, is_utterance_node";

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database, mainly for tests.
    ///
    /// Uses a single connection that is never recycled, since every
    /// in-memory connection is its own database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert_utterances(&self, utterances: &[Utterance]) -> StorageResult<usize> {
        let mut tx = self.pool.begin().await?;

        for utterance in utterances {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO utterances
                    (id, conversation_id, speaker_id, speaker_name, text,
                     timestamp_start, timestamp_end, sequence_number)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&utterance.id)
            .bind(&utterance.conversation_id)
            .bind(&utterance.speaker_id)
            .bind(&utterance.speaker_name)
            .bind(&utterance.text)
            .bind(utterance.timestamp_start)
            .bind(utterance.timestamp_end)
            .bind(utterance.sequence_number)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(utterances.len())
    }

    async fn replace_relationships(
        &self,
        conversation_id: &str,
        relationships: &[Relationship],
    ) -> StorageResult<usize> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM relationships WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for (position, rel) in relationships.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO relationships
                    (conversation_id, position, from_node_id, to_node_id,
                     relationship_type, explanation, is_bidirectional)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(conversation_id)
            .bind(position as i64)
            .bind(&rel.from_node_id)
            .bind(&rel.to_node_id)
            .bind(rel.relationship_type.to_string())
            .bind(&rel.explanation)
            .bind(rel.is_bidirectional)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            conversation_id = %conversation_id,
            removed = removed,
            inserted = relationships.len(),
            "Replaced relationships"
        );
        Ok(relationships.len())
    }

    async fn fetch_utterances(&self, conversation_id: &str) -> StorageResult<Vec<Utterance>> {
        let rows: Vec<UtteranceRow> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, speaker_id, speaker_name, text,
                   timestamp_start, timestamp_end, sequence_number
            FROM utterances
            WHERE conversation_id = ?
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Utterance::from).collect())
    }

    async fn fetch_relationships(
        &self,
        conversation_id: &str,
    ) -> StorageResult<Vec<Relationship>> {
        let rows: Vec<RelationshipRow> = sqlx::query_as(
            r#"
            SELECT from_node_id, to_node_id, relationship_type, explanation, is_bidirectional
            FROM relationships
            WHERE conversation_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Relationship::from).collect())
    }

    async fn replace_graph(&self, snapshot: &GraphSnapshot) -> StorageResult<()> {
        let build_id = snapshot.build_id.to_string();
        let created_at = snapshot.built_at.to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM nodes WHERE conversation_id = ?")
            .bind(&snapshot.conversation_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        for node in snapshot.nodes() {
            sqlx::query(
                r#"
                INSERT INTO nodes
                    (id, conversation_id, zoom_level, label, summary, full_text, speaker_id,
                     utterance_ids, sequence_number, predecessor_id, successor_id,
                     contextual_relation, linked_nodes, chunk_id, is_utterance_node,
                     build_id, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&node.id)
            .bind(&node.conversation_id)
            .bind(i64::from(node.zoom_level))
            .bind(&node.label)
            .bind(&node.summary)
            .bind(&node.full_text)
            .bind(&node.speaker_id)
            .bind(serde_json::to_string(&node.utterance_ids)?)
            .bind(node.sequence_number)
            .bind(&node.predecessor_id)
            .bind(&node.successor_id)
            .bind(serde_json::to_string(&node.contextual_relation)?)
            .bind(serde_json::to_string(&node.linked_nodes)?)
            .bind(&node.chunk_id)
            .bind(node.is_utterance_node)
            .bind(&build_id)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            conversation_id = %snapshot.conversation_id,
            build_id = %build_id,
            removed = removed,
            inserted = snapshot.node_count(),
            "Replaced persisted graph"
        );
        Ok(())
    }

    async fn get_nodes(&self, conversation_id: &str, zoom_level: u32) -> StorageResult<Vec<Node>> {
        let rows: Vec<NodeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM nodes WHERE conversation_id = ? AND zoom_level = ? \
             ORDER BY sequence_number ASC",
            NODE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(i64::from(zoom_level))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Node::try_from).collect()
    }

    async fn get_graph(&self, conversation_id: &str) -> StorageResult<ZoomLevels> {
        let rows: Vec<NodeRow> = sqlx::query_as(&format!(
            "SELECT {} FROM nodes WHERE conversation_id = ? \
             ORDER BY zoom_level ASC, sequence_number ASC",
            NODE_COLUMNS
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut levels = ZoomLevels::new();
        for row in rows {
            let node = Node::try_from(row)?;
            levels.entry(node.zoom_level).or_default().push(node);
        }
        Ok(levels)
    }

    async fn list_conversations(&self) -> StorageResult<Vec<ConversationSummary>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            r#"
            SELECT u.conversation_id AS conversation_id,
                   COUNT(*) AS utterance_count,
                   (SELECT COUNT(*) FROM relationships r
                     WHERE r.conversation_id = u.conversation_id) AS relationship_count,
                   (SELECT COUNT(*) FROM nodes n
                     WHERE n.conversation_id = u.conversation_id) AS node_count,
                   (SELECT MAX(n.created_at) FROM nodes n
                     WHERE n.conversation_id = u.conversation_id) AS built_at
            FROM utterances u
            GROUP BY u.conversation_id
            ORDER BY u.conversation_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ConversationSummary::from).collect())
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct UtteranceRow {
    id: String,
    conversation_id: String,
    speaker_id: String,
    speaker_name: String,
    text: String,
    timestamp_start: f64,
    timestamp_end: f64,
    sequence_number: i64,
}

impl From<UtteranceRow> for Utterance {
    fn from(row: UtteranceRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            speaker_id: row.speaker_id,
            speaker_name: row.speaker_name,
            text: row.text,
            timestamp_start: row.timestamp_start,
            timestamp_end: row.timestamp_end,
            sequence_number: row.sequence_number,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RelationshipRow {
    from_node_id: String,
    to_node_id: String,
    relationship_type: String,
    explanation: Option<String>,
    is_bidirectional: bool,
}

impl From<RelationshipRow> for Relationship {
    fn from(row: RelationshipRow) -> Self {
        Self {
            from_node_id: row.from_node_id,
            to_node_id: row.to_node_id,
            relationship_type: RelationshipType::from(row.relationship_type),
            explanation: row.explanation,
            is_bidirectional: row.is_bidirectional,
        }
    }
}

#[derive(sqlx::FromRow)]
struct NodeRow {
    id: String,
    conversation_id: String,
    zoom_level: i64,
    label: String,
    summary: String,
    full_text: String,
    speaker_id: Option<String>,
    utterance_ids: String,
    sequence_number: i64,
    predecessor_id: Option<String>,
    successor_id: Option<String>,
    contextual_relation: String,
    linked_nodes: String,
    chunk_id: Option<String>,
    is_utterance_node: bool,
}

impl TryFrom<NodeRow> for Node {
    type Error = StorageError;

    fn try_from(row: NodeRow) -> Result<Self, Self::Error> {
        let zoom_level = u32::try_from(row.zoom_level).map_err(|_| StorageError::Query {
            message: format!("Node {} has invalid zoom level {}", row.id, row.zoom_level),
        })?;

        Ok(Self {
            zoom_level,
            utterance_ids: serde_json::from_str(&row.utterance_ids)?,
            contextual_relation: serde_json::from_str(&row.contextual_relation)?,
            linked_nodes: serde_json::from_str(&row.linked_nodes)?,
            id: row.id,
            conversation_id: row.conversation_id,
            label: row.label,
            summary: row.summary,
            full_text: row.full_text,
            speaker_id: row.speaker_id,
            sequence_number: row.sequence_number,
            predecessor_id: row.predecessor_id,
            successor_id: row.successor_id,
            chunk_id: row.chunk_id,
            is_utterance_node: row.is_utterance_node,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    conversation_id: String,
    utterance_count: i64,
    relationship_count: i64,
    node_count: i64,
    built_at: Option<String>,
}

impl From<ConversationRow> for ConversationSummary {
    fn from(row: ConversationRow) -> Self {
        Self {
            conversation_id: row.conversation_id,
            utterance_count: row.utterance_count.max(0) as usize,
            relationship_count: row.relationship_count.max(0) as usize,
            node_count: row.node_count.max(0) as usize,
            built_at: row.built_at.as_deref().and_then(parse_timestamp),
        }
    }
}
