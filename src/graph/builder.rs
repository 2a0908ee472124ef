//! Full graph build for one conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::relationships::{RelationshipMapper, RelationshipMaps};
use super::segmenter::TurnSegmenter;
use super::zoom::{LevelSpec, ZoomAggregator, ZoomLevels};
use super::{validate_utterances, Node, Relationship, Utterance};
use crate::config::GraphConfig;
use crate::error::GraphResult;

/// The result of one build: every zoom level plus the relationship maps
/// that were applied to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Unique identifier of this build.
    pub build_id: Uuid,
    /// Conversation the graph was built for.
    pub conversation_id: String,
    /// When the build finished.
    pub built_at: DateTime<Utc>,
    /// Nodes per zoom level, with relationship maps applied.
    pub levels: ZoomLevels,
    /// Relationships the maps were derived from, in input order.
    pub relationships: Vec<Relationship>,
    /// Adjacency maps derived from `relationships`.
    pub maps: RelationshipMaps,
}

impl GraphSnapshot {
    /// Nodes at `zoom_level`; empty when the level was not built.
    pub fn level(&self, zoom_level: u32) -> &[Node] {
        self.levels
            .get(&zoom_level)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every node, finest level first.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.levels.values().flatten()
    }

    /// Total node count across levels.
    pub fn node_count(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    /// Built zoom levels in ascending order.
    pub fn zoom_levels(&self) -> Vec<u32> {
        self.levels.keys().copied().collect()
    }
}

/// Runs segmentation, aggregation and relationship mapping end to end.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    aggregator: ZoomAggregator,
    mapper: RelationshipMapper,
}

impl GraphBuilder {
    /// Create a builder from graph configuration.
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            aggregator: ZoomAggregator::new(config),
            mapper: RelationshipMapper::new(config.temporal_conflicts),
        }
    }

    /// Build the full graph for `conversation_id`.
    ///
    /// Fails without producing anything when the utterances are malformed,
    /// a level is not a partition, or a relationship names an unknown node.
    pub fn build(
        &self,
        conversation_id: &str,
        utterances: &[Utterance],
        relationships: &[Relationship],
        level_specs: &[LevelSpec],
    ) -> GraphResult<GraphSnapshot> {
        validate_utterances(Some(conversation_id), utterances)?;

        let levels = self.aggregator.build_levels(utterances, level_specs)?;
        let maps = self
            .mapper
            .build_maps(levels.values().flatten(), relationships)?;
        let levels: ZoomLevels = levels
            .into_iter()
            .map(|(zoom, nodes)| (zoom, maps.apply(nodes)))
            .collect();

        let snapshot = GraphSnapshot {
            build_id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            built_at: Utc::now(),
            levels,
            relationships: relationships.to_vec(),
            maps,
        };

        info!(
            conversation_id = %conversation_id,
            build_id = %snapshot.build_id,
            utterances = utterances.len(),
            nodes = snapshot.node_count(),
            relationships = relationships.len(),
            "Graph built"
        );
        Ok(snapshot)
    }
}

/// Group an ordered utterance stream into speaker turns with default limits.
pub fn segment_turns(utterances: &[Utterance]) -> Vec<Node> {
    TurnSegmenter::default().segment(utterances)
}

/// Build and verify zoom levels with default limits.
pub fn build_zoom_levels(
    utterances: &[Utterance],
    level_specs: &[LevelSpec],
) -> GraphResult<ZoomLevels> {
    ZoomAggregator::default().build_levels(utterances, level_specs)
}

/// Derive relationship maps with the default conflict policy.
pub fn build_relationship_maps<'a>(
    nodes: impl IntoIterator<Item = &'a Node>,
    relationships: &[Relationship],
) -> GraphResult<RelationshipMaps> {
    RelationshipMapper::default().build_maps(nodes, relationships)
}
