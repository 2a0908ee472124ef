//! Graph service: fetch, build, check and persist.
//!
//! [`GraphService`] is the only place where the pure graph core meets
//! storage. Rebuilds of one conversation are serialized through
//! [`RebuildLocks`] and always replace the persisted node set wholesale.

mod locks;
mod transcript;

pub use locks::{RebuildGuard, RebuildLocks};
pub use transcript::{Transcript, TranscriptUtterance};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::GraphConfig;
use crate::error::{AppError, AppResult, InvariantReport, StorageError};
use crate::graph::{
    speaker_legend, validate_utterances, GraphBuilder, GraphSnapshot, InvariantChecker,
    LevelSpec, Node, RelationshipMapper, Utterance, TURN_LEVEL, UTTERANCE_LEVEL,
};
use crate::storage::{ConversationSummary, Storage};

/// Zoom level produced by the default turn-window partitioner.
pub const SEGMENT_LEVEL: u32 = 3;

/// What an import wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    /// Conversation the transcript was filed under.
    pub conversation_id: String,
    /// Utterances inserted or replaced.
    pub utterances: usize,
    /// Size of the replacement relationship set, or `None` when the
    /// transcript carried none and the stored set was kept.
    pub relationships: Option<usize>,
}

/// A persisted (or, with violations tolerated, persisted-anyway) rebuild.
#[derive(Debug, Clone)]
pub struct RebuildOutcome {
    /// The graph that was written.
    pub snapshot: GraphSnapshot,
    /// Invariant results for that graph.
    pub report: InvariantReport,
}

/// Level specs used when the caller supplies none: one level of
/// `turns_per_segment` turn windows, or nothing when that is 0.
pub fn default_level_specs(turns_per_segment: usize) -> Vec<LevelSpec> {
    if turns_per_segment == 0 {
        return Vec::new();
    }
    vec![LevelSpec::turn_windows(SEGMENT_LEVEL, turns_per_segment)]
}

/// Orchestrates graph builds against a storage backend.
pub struct GraphService<S: Storage> {
    storage: S,
    config: GraphConfig,
    builder: GraphBuilder,
    checker: InvariantChecker,
    locks: RebuildLocks,
}

impl<S: Storage> GraphService<S> {
    /// Create a service over `storage`.
    pub fn new(storage: S, config: GraphConfig) -> Self {
        Self {
            builder: GraphBuilder::new(&config),
            checker: InvariantChecker::new(&config),
            locks: RebuildLocks::new(),
            storage,
            config,
        }
    }

    /// Replace the invariant checker, e.g. to fail fast.
    pub fn with_checker(mut self, checker: InvariantChecker) -> Self {
        self.checker = checker;
        self
    }

    /// Graph configuration in effect
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Underlying storage
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Store a transcript's utterances and, when it carries any, replace
    /// the conversation's relationships with its own.
    ///
    /// Utterances are validated first, so a malformed transcript writes
    /// nothing. A transcript without a `relationships` key leaves the stored
    /// set untouched; an empty list clears it. The graph is not rebuilt.
    pub async fn import(&self, transcript: &Transcript) -> AppResult<ImportOutcome> {
        let conversation_id = transcript.conversation_id.as_str();
        let utterances = transcript.utterances();
        validate_utterances(Some(conversation_id), &utterances)?;

        let written = self.storage.insert_utterances(&utterances).await?;
        let relationships = match &transcript.relationships {
            Some(rels) => Some(
                self.storage
                    .replace_relationships(conversation_id, rels)
                    .await?,
            ),
            None => None,
        };

        info!(
            conversation_id = %conversation_id,
            utterances = written,
            relationships = ?relationships,
            "Transcript imported"
        );
        Ok(ImportOutcome {
            conversation_id: conversation_id.to_string(),
            utterances: written,
            relationships,
        })
    }

    /// Rebuild and persist the graph of one conversation.
    ///
    /// Holds the conversation's rebuild lock across fetch, build, check and
    /// persist. When `fail_on_violation` is set a graph with any violation
    /// is not persisted and the report is returned as
    /// [`AppError::InvariantsFailed`].
    pub async fn rebuild(
        &self,
        conversation_id: &str,
        level_specs: &[LevelSpec],
    ) -> AppResult<RebuildOutcome> {
        let _guard = self.locks.acquire(conversation_id).await;

        let utterances = self.fetch_existing(conversation_id).await?;
        let relationships = self.storage.fetch_relationships(conversation_id).await?;

        let snapshot =
            self.builder
                .build(conversation_id, &utterances, &relationships, level_specs)?;
        let report = self.checker.check_snapshot(&snapshot, &utterances);

        if !report.is_clean() {
            if self.config.fail_on_violation {
                return Err(AppError::InvariantsFailed { report });
            }
            warn!(
                conversation_id = %conversation_id,
                violations = report.violations.len(),
                "Persisting graph despite invariant violations"
            );
        }

        self.storage.replace_graph(&snapshot).await?;

        info!(
            conversation_id = %conversation_id,
            build_id = %snapshot.build_id,
            nodes = snapshot.node_count(),
            "Graph rebuilt"
        );
        Ok(RebuildOutcome { snapshot, report })
    }

    /// Rebuild with [`default_level_specs`] from configuration.
    pub async fn rebuild_default(&self, conversation_id: &str) -> AppResult<RebuildOutcome> {
        let specs = default_level_specs(self.config.turns_per_segment);
        self.rebuild(conversation_id, &specs).await
    }

    /// Re-validate the persisted graph, including the rendered-view checks:
    /// the timeline is the level-1 node list and the legend is rendered
    /// from level-2 turns.
    pub async fn check(&self, conversation_id: &str) -> AppResult<InvariantReport> {
        let _guard = self.locks.acquire(conversation_id).await;

        let utterances = self.fetch_existing(conversation_id).await?;
        let relationships = self.storage.fetch_relationships(conversation_id).await?;
        let levels = self.storage.get_graph(conversation_id).await?;

        let maps = RelationshipMapper::new(self.config.temporal_conflicts)
            .build_maps(levels.values().flatten(), &relationships)?;

        let timeline_count = levels.get(&UTTERANCE_LEVEL).map(Vec::len).unwrap_or(0);
        let legend = speaker_legend(levels.get(&TURN_LEVEL).map(Vec::as_slice).unwrap_or(&[]));

        let mut report = self
            .checker
            .check_graph(&utterances, &levels, &relationships, &maps);
        let rendered = self
            .checker
            .check_rendered(&utterances, timeline_count, &legend);
        report.violations.extend(rendered.violations);

        info!(
            conversation_id = %conversation_id,
            violations = report.violations.len(),
            "Persisted graph checked"
        );
        Ok(report)
    }

    /// Persisted nodes of one level.
    pub async fn nodes(&self, conversation_id: &str, zoom_level: u32) -> AppResult<Vec<Node>> {
        Ok(self.storage.get_nodes(conversation_id, zoom_level).await?)
    }

    /// Known conversations with their counts.
    pub async fn conversations(&self) -> AppResult<Vec<ConversationSummary>> {
        Ok(self.storage.list_conversations().await?)
    }

    async fn fetch_existing(&self, conversation_id: &str) -> AppResult<Vec<Utterance>> {
        let utterances = self.storage.fetch_utterances(conversation_id).await?;
        if utterances.is_empty() {
            return Err(StorageError::ConversationNotFound {
                conversation_id: conversation_id.to_string(),
            }
            .into());
        }
        Ok(utterances)
    }
}
