//! Zoom-level aggregation - layered partitions over the utterance stream.
//!
//! Level 1 is the identity partition and level 2 the turn segmentation.
//! Coarser levels come from an external [`Partitioner`]; the aggregator
//! only verifies that what it is given is still a partition.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::invariants::check_lossless_aggregation;
use super::segmenter::TurnSegmenter;
use super::text::{compose_node, TextLimits};
use super::{validate_utterances, Node, Utterance, TURN_LEVEL, UTTERANCE_LEVEL};
use crate::config::GraphConfig;
use crate::error::{AggregationIncompleteError, GraphError, GraphResult, InvariantResult};

/// Nodes of every zoom level, keyed by level.
pub type ZoomLevels = BTreeMap<u32, Vec<Node>>;

/// One node's worth of utterances as proposed by a [`Partitioner`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UtteranceGroup {
    /// Utterances aggregated by the node.
    pub utterance_ids: Vec<String>,
    /// Explicit label; generated from the text when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// External chunk the group came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
}

impl UtteranceGroup {
    /// Create a group from utterance ids
    pub fn new<I, S>(utterance_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            utterance_ids: utterance_ids.into_iter().map(Into::into).collect(),
            label: None,
            chunk_id: None,
        }
    }

    /// Set the label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the chunk id
    pub fn with_chunk(mut self, chunk_id: impl Into<String>) -> Self {
        self.chunk_id = Some(chunk_id.into());
        self
    }
}

/// Supplies the grouping for a zoom level above the turn level.
///
/// Implementations must return a partition of the utterances; the
/// aggregator rejects anything else.
pub trait Partitioner: Send + Sync {
    /// Group `utterances` (with their `turns`, for convenience) into nodes.
    fn partition(&self, utterances: &[Utterance], turns: &[Node]) -> Vec<UtteranceGroup>;
}

/// Groups every `turns_per_node` consecutive turns into one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnWindowPartitioner {
    turns_per_node: usize,
}

impl TurnWindowPartitioner {
    /// Create a window partitioner; a window of 0 is treated as 1.
    pub fn new(turns_per_node: usize) -> Self {
        Self {
            turns_per_node: turns_per_node.max(1),
        }
    }
}

impl Partitioner for TurnWindowPartitioner {
    fn partition(&self, _utterances: &[Utterance], turns: &[Node]) -> Vec<UtteranceGroup> {
        turns
            .chunks(self.turns_per_node)
            .map(|window| {
                UtteranceGroup::new(window.iter().flat_map(|turn| turn.utterance_ids.iter().cloned()))
            })
            .collect()
    }
}

/// Caller-supplied groups, e.g. topic segments from an external extractor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplicitPartition {
    groups: Vec<UtteranceGroup>,
}

impl ExplicitPartition {
    /// Wrap precomputed groups
    pub fn new(groups: Vec<UtteranceGroup>) -> Self {
        Self { groups }
    }
}

impl Partitioner for ExplicitPartition {
    fn partition(&self, _utterances: &[Utterance], _turns: &[Node]) -> Vec<UtteranceGroup> {
        self.groups.clone()
    }
}

/// A requested zoom level above the turn level and its partitioner.
pub struct LevelSpec {
    /// Target zoom level, must be greater than 2.
    pub zoom_level: u32,
    partitioner: Box<dyn Partitioner>,
}

impl LevelSpec {
    /// Create a level spec
    pub fn new(zoom_level: u32, partitioner: impl Partitioner + 'static) -> Self {
        Self {
            zoom_level,
            partitioner: Box::new(partitioner),
        }
    }

    /// Level built from windows of consecutive turns
    pub fn turn_windows(zoom_level: u32, turns_per_node: usize) -> Self {
        Self::new(zoom_level, TurnWindowPartitioner::new(turns_per_node))
    }

    /// Level built from explicit groups
    pub fn explicit(zoom_level: u32, groups: Vec<UtteranceGroup>) -> Self {
        Self::new(zoom_level, ExplicitPartition::new(groups))
    }
}

impl fmt::Debug for LevelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelSpec")
            .field("zoom_level", &self.zoom_level)
            .finish_non_exhaustive()
    }
}

/// Builds and verifies the zoom levels of a conversation.
#[derive(Debug, Clone, Default)]
pub struct ZoomAggregator {
    segmenter: TurnSegmenter,
    limits: TextLimits,
}

impl ZoomAggregator {
    /// Create an aggregator using the configured text limits.
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            segmenter: TurnSegmenter::new(config),
            limits: TextLimits::from(config),
        }
    }

    /// Build level 1, level 2 and every requested higher level, verifying
    /// the partition property of each.
    pub fn build_levels(
        &self,
        utterances: &[Utterance],
        level_specs: &[LevelSpec],
    ) -> GraphResult<ZoomLevels> {
        validate_utterances(None, utterances)?;
        let specs = ordered_specs(level_specs)?;

        let mut levels = ZoomLevels::new();

        let identity = self.utterance_level(utterances);
        verify_partition(UTTERANCE_LEVEL, &identity, utterances)?;
        levels.insert(UTTERANCE_LEVEL, identity);

        let turns = self.segmenter.segment(utterances);
        verify_partition(TURN_LEVEL, &turns, utterances)?;

        for spec in specs {
            let groups = spec.partitioner.partition(utterances, &turns);
            let nodes = self.group_level(spec.zoom_level, utterances, &groups)?;
            debug!(zoom_level = spec.zoom_level, nodes = nodes.len(), "Built zoom level");
            levels.insert(spec.zoom_level, nodes);
        }
        levels.insert(TURN_LEVEL, turns);

        info!(
            utterances = utterances.len(),
            levels = levels.len(),
            "Zoom levels built and verified"
        );
        Ok(levels)
    }

    /// Level 1: one node per utterance, chained in sequence order.
    pub fn utterance_level(&self, utterances: &[Utterance]) -> Vec<Node> {
        let nodes = utterances
            .iter()
            .filter_map(|u| compose_node(UTTERANCE_LEVEL, &[u], None, self.limits))
            .map(|mut node| {
                node.is_utterance_node = true;
                node
            })
            .collect();
        chain(nodes)
    }

    /// Build a level from externally supplied groups.
    ///
    /// The groups are verified before any node is built, so a rejected
    /// level never yields nodes. Nodes are ordered by their first
    /// utterance and chained.
    pub fn group_level(
        &self,
        zoom_level: u32,
        utterances: &[Utterance],
        groups: &[UtteranceGroup],
    ) -> GraphResult<Vec<Node>> {
        if let Some(index) = groups.iter().position(|g| g.utterance_ids.is_empty()) {
            return Err(GraphError::InvalidLevelSpec {
                zoom_level,
                reason: format!("group {} has no utterances", index),
            });
        }
        verify_coverage(
            zoom_level,
            groups.iter().map(|g| g.utterance_ids.as_slice()),
            utterances,
        )?;

        let by_id: HashMap<&str, &Utterance> =
            utterances.iter().map(|u| (u.id.as_str(), u)).collect();

        let mut nodes: Vec<Node> = groups
            .iter()
            .filter_map(|group| {
                let mut members: Vec<&Utterance> = group
                    .utterance_ids
                    .iter()
                    .filter_map(|id| by_id.get(id.as_str()).copied())
                    .collect();
                members.sort_by_key(|u| u.sequence_number);

                let mut node =
                    compose_node(zoom_level, &members, group.label.as_deref(), self.limits)?;
                node.chunk_id = group.chunk_id.clone();
                Some(node)
            })
            .collect();
        nodes.sort_by_key(|n| n.sequence_number);

        Ok(chain(nodes))
    }

    /// Cross-level lossless check (INV-1.3) between two built levels.
    pub fn verify_lossless(levels: &ZoomLevels, zoom_from: u32, zoom_to: u32) -> InvariantResult {
        check_lossless_aggregation(levels, zoom_from, zoom_to)
    }
}

/// Verify that `nodes` partition the utterance ids of the conversation:
/// no gaps, no overlaps, no foreign ids.
pub fn verify_partition(
    zoom_level: u32,
    nodes: &[Node],
    utterances: &[Utterance],
) -> Result<(), AggregationIncompleteError> {
    verify_coverage(
        zoom_level,
        nodes.iter().map(|n| n.utterance_ids.as_slice()),
        utterances,
    )
}

fn verify_coverage<'a>(
    zoom_level: u32,
    id_sets: impl IntoIterator<Item = &'a [String]>,
    utterances: &[Utterance],
) -> Result<(), AggregationIncompleteError> {
    let expected: HashSet<&str> = utterances.iter().map(|u| u.id.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(expected.len());
    let mut duplicated = Vec::new();
    let mut unexpected = Vec::new();

    for id in id_sets.into_iter().flatten() {
        if !expected.contains(id.as_str()) {
            if !unexpected.contains(id) {
                unexpected.push(id.clone());
            }
        } else if !seen.insert(id.as_str()) && !duplicated.contains(id) {
            duplicated.push(id.clone());
        }
    }

    let missing: Vec<String> = utterances
        .iter()
        .filter(|u| !seen.contains(u.id.as_str()))
        .map(|u| u.id.clone())
        .collect();

    let error = AggregationIncompleteError {
        zoom_level,
        missing,
        duplicated,
        unexpected,
    };
    if error.is_empty() {
        Ok(())
    } else {
        Err(error)
    }
}

fn ordered_specs(level_specs: &[LevelSpec]) -> GraphResult<Vec<&LevelSpec>> {
    let mut specs: Vec<&LevelSpec> = level_specs.iter().collect();
    specs.sort_by_key(|s| s.zoom_level);

    for (i, spec) in specs.iter().enumerate() {
        if spec.zoom_level <= TURN_LEVEL {
            return Err(GraphError::InvalidLevelSpec {
                zoom_level: spec.zoom_level,
                reason: "levels 1 and 2 are built from the utterances themselves".to_string(),
            });
        }
        if i > 0 && specs[i - 1].zoom_level == spec.zoom_level {
            return Err(GraphError::InvalidLevelSpec {
                zoom_level: spec.zoom_level,
                reason: "level requested more than once".to_string(),
            });
        }
    }
    Ok(specs)
}

/// Link nodes into a predecessor/successor chain in their current order.
fn chain(mut nodes: Vec<Node>) -> Vec<Node> {
    let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
    for (i, node) in nodes.iter_mut().enumerate() {
        node.predecessor_id = i.checked_sub(1).map(|p| ids[p].clone());
        node.successor_id = ids.get(i + 1).cloned();
    }
    nodes
}
