//! Post-construction invariant checks.
//!
//! Every check is a pure function over an already-fetched snapshot and
//! returns a distinct [`InvariantViolation`]. [`InvariantChecker`] runs the
//! battery and either collects every violation or stops at the first.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::builder::GraphSnapshot;
use super::relationships::RelationshipMaps;
use super::zoom::ZoomLevels;
use super::{Node, Relationship, Utterance, UTTERANCE_LEVEL};
use crate::config::GraphConfig;
use crate::error::{
    InvariantId, InvariantReport, InvariantResult, InvariantViolation, SpeakerGap,
    ViolationContext,
};

#[cfg(test)]
#[path = "invariants_tests.rs"]
mod invariants_tests;

/// Default INV-3.2 threshold, in utterance-index distance.
pub const DEFAULT_SPEAKER_GAP_THRESHOLD: usize = 50;

/// One row of a rendered speaker legend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerLegendEntry {
    /// Speaker identifier.
    pub speaker_id: String,
    /// Display label of the speaker's first turn.
    pub label: String,
    /// Turns owned by the speaker.
    pub turn_count: usize,
    /// Utterances across those turns.
    pub utterance_count: usize,
}

/// Render the speaker legend from turn-like nodes, in order of first
/// appearance. Nodes without a speaker are skipped.
pub fn speaker_legend(turns: &[Node]) -> Vec<SpeakerLegendEntry> {
    let mut entries: Vec<SpeakerLegendEntry> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for turn in turns {
        let Some(speaker) = turn.speaker_id.as_deref() else {
            continue;
        };
        let slot = *index.entry(speaker).or_insert_with(|| {
            entries.push(SpeakerLegendEntry {
                speaker_id: speaker.to_string(),
                label: turn.label.clone(),
                turn_count: 0,
                utterance_count: 0,
            });
            entries.len() - 1
        });
        entries[slot].turn_count += 1;
        entries[slot].utterance_count += turn.utterance_count();
    }
    entries
}

/// INV-1.1: every stored utterance appears in some level-1 node.
pub fn check_completeness(utterances: &[Utterance], level_one: &[Node]) -> InvariantResult {
    let covered: HashSet<&str> = level_one
        .iter()
        .flat_map(|n| n.utterance_ids.iter().map(String::as_str))
        .collect();
    let missing: Vec<String> = utterances
        .iter()
        .filter(|u| !covered.contains(u.id.as_str()))
        .map(|u| u.id.clone())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }
    Err(InvariantViolation::new(
        InvariantId::UtteranceCompleteness,
        format!(
            "{} of {} utterances missing from level-1 nodes: {}",
            missing.len(),
            utterances.len(),
            missing.join(", ")
        ),
        ViolationContext::MissingUtterances {
            stored_count: utterances.len(),
            missing,
        },
    ))
}

/// INV-1.2: a rendered timeline shows every stored utterance.
pub fn check_timeline_completeness(stored_count: usize, timeline_count: usize) -> InvariantResult {
    if stored_count == timeline_count {
        return Ok(());
    }
    Err(InvariantViolation::new(
        InvariantId::TimelineCompleteness,
        format!(
            "timeline shows {} utterances but {} are stored",
            timeline_count, stored_count
        ),
        ViolationContext::CountMismatch {
            expected: stored_count,
            actual: timeline_count,
        },
    ))
}

/// INV-1.3: the utterances at `zoom_to` are a superset of those at
/// `zoom_from`. A level absent from `levels` covers nothing.
pub fn check_lossless_aggregation(
    levels: &ZoomLevels,
    zoom_from: u32,
    zoom_to: u32,
) -> InvariantResult {
    let empty: Vec<Node> = Vec::new();
    let from_nodes = levels.get(&zoom_from).unwrap_or(&empty);
    let to_ids: HashSet<&str> = levels
        .get(&zoom_to)
        .unwrap_or(&empty)
        .iter()
        .flat_map(|n| n.utterance_ids.iter().map(String::as_str))
        .collect();

    let mut lost: Vec<String> = Vec::new();
    for id in from_nodes.iter().flat_map(|n| n.utterance_ids.iter()) {
        if !to_ids.contains(id.as_str()) && !lost.contains(id) {
            lost.push(id.clone());
        }
    }

    if lost.is_empty() {
        return Ok(());
    }
    Err(InvariantViolation::new(
        InvariantId::LosslessAggregation,
        format!(
            "{} utterance(s) at level {} lost at level {}: {}",
            lost.len(),
            zoom_from,
            zoom_to,
            lost.join(", ")
        ),
        ViolationContext::LostUtterances {
            zoom_from,
            zoom_to,
            lost,
        },
    ))
}

/// INV-2.1: within a level, predecessor/successor links form one linear
/// chain in `sequence_number` order.
pub fn check_chain_linearity(zoom_level: u32, nodes: &[Node]) -> InvariantResult {
    let mut ordered: Vec<&Node> = nodes.iter().collect();
    ordered.sort_by_key(|n| n.sequence_number);

    let broken: Vec<String> = ordered
        .iter()
        .enumerate()
        .filter(|(i, node)| {
            let expected_pred = i.checked_sub(1).map(|p| ordered[p].id.as_str());
            let expected_succ = ordered.get(i + 1).map(|n| n.id.as_str());
            node.predecessor_id.as_deref() != expected_pred
                || node.successor_id.as_deref() != expected_succ
        })
        .map(|(_, node)| node.id.clone())
        .collect();

    if broken.is_empty() {
        return Ok(());
    }
    Err(InvariantViolation::new(
        InvariantId::ChainLinearity,
        format!(
            "{} node(s) at level {} break the temporal chain: {}",
            broken.len(),
            zoom_level,
            broken.join(", ")
        ),
        ViolationContext::BrokenChain {
            zoom_level,
            node_ids: broken,
        },
    ))
}

/// INV-2.2: every bidirectional relationship is linked from both endpoints
/// and never appears in the temporal maps.
pub fn check_bidirectional_symmetry<'a>(
    nodes: impl IntoIterator<Item = &'a Node>,
    relationships: &[Relationship],
    maps: &RelationshipMaps,
) -> InvariantResult {
    let by_id: HashMap<&str, &Node> = nodes.into_iter().map(|n| (n.id.as_str(), n)).collect();
    let mut pairs: Vec<(String, String)> = Vec::new();

    for rel in relationships.iter().filter(|r| r.is_bidirectional) {
        let (Some(&from), Some(&to)) = (
            by_id.get(rel.from_node_id.as_str()),
            by_id.get(rel.to_node_id.as_str()),
        ) else {
            continue;
        };

        let sees = |node: &Node, peer: &Node| node.linked_nodes.iter().any(|l| *l == peer.label);
        let leaked = maps.successor(&from.id) == Some(to.id.as_str())
            || maps.successor(&to.id) == Some(from.id.as_str())
            || maps.predecessor(&from.id) == Some(to.id.as_str())
            || maps.predecessor(&to.id) == Some(from.id.as_str());

        if !sees(from, to) || !sees(to, from) || leaked {
            pairs.push((from.id.clone(), to.id.clone()));
        }
    }

    if pairs.is_empty() {
        return Ok(());
    }
    let listed: Vec<String> = pairs.iter().map(|(a, b)| format!("{} <-> {}", a, b)).collect();
    Err(InvariantViolation::new(
        InvariantId::BidirectionalSymmetry,
        format!(
            "{} bidirectional relationship(s) not symmetric: {}",
            pairs.len(),
            listed.join(", ")
        ),
        ViolationContext::AsymmetricLinks { pairs },
    ))
}

/// INV-3.1: distinct speakers among stored utterances equal the legend
/// entry count.
pub fn check_participant_consistency(
    utterances: &[Utterance],
    legend: &[SpeakerLegendEntry],
) -> InvariantResult {
    let speakers: HashSet<&str> = utterances.iter().map(|u| u.speaker_id.as_str()).collect();
    if speakers.len() == legend.len() {
        return Ok(());
    }
    Err(InvariantViolation::new(
        InvariantId::ParticipantConsistency,
        format!(
            "{} distinct speakers stored but legend lists {}",
            speakers.len(),
            legend.len()
        ),
        ViolationContext::CountMismatch {
            expected: speakers.len(),
            actual: legend.len(),
        },
    ))
}

/// INV-3.2: no speaker's consecutive appearances are more than
/// `gap_threshold` utterances apart. Long gaps usually mean a diarizer
/// split one speaker or merged two.
pub fn check_speaker_stability(utterances: &[Utterance], gap_threshold: usize) -> InvariantResult {
    let mut last_seen: HashMap<&str, usize> = HashMap::new();
    let mut worst: HashMap<&str, SpeakerGap> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for (index, utterance) in utterances.iter().enumerate() {
        let speaker = utterance.speaker_id.as_str();
        match last_seen.insert(speaker, index) {
            None => order.push(speaker),
            Some(previous) => {
                let gap = index - previous;
                let current = worst.get(speaker).map(|g| g.gap).unwrap_or(0);
                if gap > gap_threshold && gap > current {
                    worst.insert(
                        speaker,
                        SpeakerGap {
                            speaker_id: speaker.to_string(),
                            gap,
                            last_seen_index: previous,
                            reappeared_index: index,
                        },
                    );
                }
            }
        }
    }

    let gaps: Vec<SpeakerGap> = order.iter().filter_map(|s| worst.remove(s)).collect();
    if gaps.is_empty() {
        return Ok(());
    }
    let listed: Vec<String> = gaps
        .iter()
        .map(|g| format!("{} (gap {})", g.speaker_id, g.gap))
        .collect();
    Err(InvariantViolation::new(
        InvariantId::SpeakerStability,
        format!(
            "speaker(s) absent for more than {} utterances: {}",
            gap_threshold,
            listed.join(", ")
        ),
        ViolationContext::SpeakerGaps {
            threshold: gap_threshold,
            gaps,
        },
    ))
}

/// INV-3.3: every turn-like node names exactly one speaker, the speaker of
/// each utterance it aggregates.
pub fn check_speaker_attribution<'a>(
    utterances: &[Utterance],
    nodes: impl IntoIterator<Item = &'a Node>,
) -> InvariantResult {
    let speakers: HashMap<&str, &str> = utterances
        .iter()
        .map(|u| (u.id.as_str(), u.speaker_id.as_str()))
        .collect();

    let misattributed: Vec<String> = nodes
        .into_iter()
        .filter(|n| n.is_turn_like())
        .filter(|n| match n.speaker_id.as_deref() {
            None => true,
            Some(owner) => n
                .utterance_ids
                .iter()
                .filter_map(|id| speakers.get(id.as_str()))
                .any(|speaker| *speaker != owner),
        })
        .map(|n| n.id.clone())
        .collect();

    if misattributed.is_empty() {
        return Ok(());
    }
    Err(InvariantViolation::new(
        InvariantId::SpeakerAttribution,
        format!(
            "{} turn-like node(s) with missing or inconsistent speaker: {}",
            misattributed.len(),
            misattributed.join(", ")
        ),
        ViolationContext::Misattributed {
            node_ids: misattributed,
        },
    ))
}

/// Whether the checker keeps going after a violation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    /// Run every check and collect all violations.
    #[default]
    CollectAll,
    /// Stop at the first violation.
    FailFast,
}

/// Runs the invariant battery over a graph.
#[derive(Debug, Clone, Copy)]
pub struct InvariantChecker {
    gap_threshold: usize,
    mode: CheckMode,
}

impl Default for InvariantChecker {
    fn default() -> Self {
        Self {
            gap_threshold: DEFAULT_SPEAKER_GAP_THRESHOLD,
            mode: CheckMode::default(),
        }
    }
}

impl InvariantChecker {
    /// Create a checker using the configured gap threshold.
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            gap_threshold: config.speaker_gap_threshold,
            mode: CheckMode::default(),
        }
    }

    /// Set the check mode
    pub fn with_mode(mut self, mode: CheckMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the INV-3.2 gap threshold
    pub fn with_gap_threshold(mut self, gap_threshold: usize) -> Self {
        self.gap_threshold = gap_threshold;
        self
    }

    /// Run every graph-only check against a freshly built snapshot.
    pub fn check_snapshot(&self, snapshot: &GraphSnapshot, utterances: &[Utterance]) -> InvariantReport {
        self.check_graph(
            utterances,
            &snapshot.levels,
            &snapshot.relationships,
            &snapshot.maps,
        )
    }

    /// Run every graph-only check: INV-1.1, INV-1.3 from the finest level
    /// to each coarser one, INV-2.1 per level, INV-2.2, INV-3.2, INV-3.3.
    pub fn check_graph(
        &self,
        utterances: &[Utterance],
        levels: &ZoomLevels,
        relationships: &[Relationship],
        maps: &RelationshipMaps,
    ) -> InvariantReport {
        let mut run = CheckRun::new(self.mode);
        let empty: Vec<Node> = Vec::new();

        run.record(|| {
            check_completeness(utterances, levels.get(&UTTERANCE_LEVEL).unwrap_or(&empty))
        });

        if let Some(&finest) = levels.keys().next() {
            for &coarser in levels.keys().skip(1) {
                run.record(|| check_lossless_aggregation(levels, finest, coarser));
            }
        }

        for (&zoom_level, nodes) in levels {
            run.record(|| check_chain_linearity(zoom_level, nodes));
        }

        run.record(|| check_bidirectional_symmetry(levels.values().flatten(), relationships, maps));
        run.record(|| check_speaker_stability(utterances, self.gap_threshold));
        run.record(|| check_speaker_attribution(utterances, levels.values().flatten()));

        run.finish()
    }

    /// Checks that compare the graph against rendered views: INV-1.2 and
    /// INV-3.1.
    pub fn check_rendered(
        &self,
        utterances: &[Utterance],
        timeline_count: usize,
        legend: &[SpeakerLegendEntry],
    ) -> InvariantReport {
        let mut run = CheckRun::new(self.mode);
        run.record(|| check_timeline_completeness(utterances.len(), timeline_count));
        run.record(|| check_participant_consistency(utterances, legend));
        run.finish()
    }
}

struct CheckRun {
    mode: CheckMode,
    report: InvariantReport,
}

impl CheckRun {
    fn new(mode: CheckMode) -> Self {
        Self {
            mode,
            report: InvariantReport::default(),
        }
    }

    fn record(&mut self, check: impl FnOnce() -> InvariantResult) {
        if self.mode == CheckMode::FailFast && !self.report.is_clean() {
            return;
        }
        if let Err(violation) = check() {
            warn!(
                invariant = %violation.invariant,
                message = %violation.message,
                "Invariant violated"
            );
            self.report.violations.push(violation);
        }
    }

    fn finish(self) -> InvariantReport {
        self.report
    }
}
