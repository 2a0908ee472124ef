//! Conversation graph construction.
//!
//! This module turns an ordered utterance stream into a multi-resolution
//! graph:
//! - [`TurnSegmenter`]: groups consecutive same-speaker utterances into turns
//! - [`ZoomAggregator`]: builds and verifies the zoom-level partitions
//! - [`RelationshipMapper`]: derives temporal and contextual adjacency maps
//! - [`InvariantChecker`]: validates a built graph snapshot
//! - [`GraphBuilder`]: runs the whole pipeline for one conversation
//!
//! Every component is a synchronous, side-effect-free transformation over
//! caller-supplied snapshots. Builds replace, never patch, a conversation's
//! node set.

mod builder;
mod invariants;
mod relationships;
mod segmenter;
mod text;
mod zoom;

pub use builder::*;
pub use invariants::*;
pub use relationships::*;
pub use segmenter::*;
pub use text::*;
pub use zoom::*;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{GraphResult, MalformedInputError};

/// Zoom level holding one node per utterance.
pub const UTTERANCE_LEVEL: u32 = 1;
/// Zoom level holding one node per speaker turn.
pub const TURN_LEVEL: u32 = 2;

/// An atomic, timestamped, speaker-attributed unit of speech.
///
/// Owned by the ingestion side; the graph core only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Unique utterance identifier.
    pub id: String,
    /// Conversation this utterance belongs to.
    pub conversation_id: String,
    /// Diarized speaker identifier.
    pub speaker_id: String,
    /// Display name of the speaker.
    pub speaker_name: String,
    /// Transcribed text.
    pub text: String,
    /// Start offset in seconds.
    #[serde(default)]
    pub timestamp_start: f64,
    /// End offset in seconds.
    #[serde(default)]
    pub timestamp_end: f64,
    /// Position within the conversation.
    pub sequence_number: i64,
}

impl Utterance {
    /// Create a new utterance with zeroed timestamps
    pub fn new(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        speaker_id: impl Into<String>,
        speaker_name: impl Into<String>,
        text: impl Into<String>,
        sequence_number: i64,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            speaker_id: speaker_id.into(),
            speaker_name: speaker_name.into(),
            text: text.into(),
            timestamp_start: 0.0,
            timestamp_end: 0.0,
            sequence_number,
        }
    }

    /// Set the start and end offsets
    pub fn with_timestamps(mut self, start: f64, end: f64) -> Self {
        self.timestamp_start = start;
        self.timestamp_end = end;
        self
    }
}

/// A grouping of one or more utterances at a given zoom level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Deterministic node identifier, see [`node_id`].
    pub id: String,
    /// Conversation the node belongs to.
    pub conversation_id: String,
    /// Resolution layer; 1 is finest.
    pub zoom_level: u32,
    /// Display label, `[INITIALS] lead text` for single-speaker nodes.
    pub label: String,
    /// Truncated full text.
    pub summary: String,
    /// Utterance texts joined by newlines.
    pub full_text: String,
    /// Speaker of a turn-like node.
    pub speaker_id: Option<String>,
    /// Aggregated utterances, in sequence order. Never empty.
    pub utterance_ids: Vec<String>,
    /// Sequence number of the first aggregated utterance.
    pub sequence_number: i64,
    /// Previous node in the temporal chain.
    pub predecessor_id: Option<String>,
    /// Next node in the temporal chain.
    pub successor_id: Option<String>,
    /// Peer label to explanation, for contextual links.
    #[serde(default)]
    pub contextual_relation: BTreeMap<String, String>,
    /// Peer labels in relationship order.
    #[serde(default)]
    pub linked_nodes: Vec<String>,
    /// Optional external chunk this node was derived from.
    pub chunk_id: Option<String>,
    /// True for level-1 identity nodes.
    pub is_utterance_node: bool,
}

impl Node {
    /// Number of utterances aggregated by this node.
    pub fn utterance_count(&self) -> usize {
        self.utterance_ids.len()
    }

    /// Whether this node sits at a level where one speaker owns every node.
    pub fn is_turn_like(&self) -> bool {
        self.zoom_level <= TURN_LEVEL
    }
}

/// Deterministic id for a node: `{conversation}/L{zoom}/{first_sequence}`.
///
/// Stable across rebuilds of identical input, so relationship records can
/// address nodes before they are built.
pub fn node_id(conversation_id: &str, zoom_level: u32, first_sequence_number: i64) -> String {
    format!("{}/L{}/{}", conversation_id, zoom_level, first_sequence_number)
}

/// Type of relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationshipType {
    /// Source leads to target in conversational order.
    LeadsTo,
    /// Generic temporal ordering.
    Temporal,
    /// Source supports target.
    Supports,
    /// Source contradicts target.
    Contradicts,
    /// Topical relatedness.
    Related,
    /// Any type produced by an extractor that has no dedicated variant.
    Other(String),
}

impl RelationshipType {
    /// Temporal types feed the predecessor/successor maps; everything else
    /// is contextual.
    pub fn is_temporal(&self) -> bool {
        matches!(self, RelationshipType::LeadsTo | RelationshipType::Temporal)
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationshipType::LeadsTo => write!(f, "leads_to"),
            RelationshipType::Temporal => write!(f, "temporal"),
            RelationshipType::Supports => write!(f, "supports"),
            RelationshipType::Contradicts => write!(f, "contradicts"),
            RelationshipType::Related => write!(f, "related"),
            RelationshipType::Other(other) => write!(f, "{}", other),
        }
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "leads_to" => RelationshipType::LeadsTo,
            "temporal" => RelationshipType::Temporal,
            "supports" => RelationshipType::Supports,
            "contradicts" => RelationshipType::Contradicts,
            "related" => RelationshipType::Related,
            _ => RelationshipType::Other(s.to_string()),
        })
    }
}

impl From<String> for RelationshipType {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        }
    }
}

impl From<RelationshipType> for String {
    fn from(value: RelationshipType) -> Self {
        value.to_string()
    }
}

/// A directed (or bidirectional) link between two nodes, produced by an
/// external relationship extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Source node ID.
    pub from_node_id: String,
    /// Target node ID.
    pub to_node_id: String,
    /// Type of relationship.
    pub relationship_type: RelationshipType,
    /// Optional explanation text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Whether both endpoints see each other.
    #[serde(default)]
    pub is_bidirectional: bool,
}

impl Relationship {
    /// Create a new directed relationship
    pub fn new(
        from_node_id: impl Into<String>,
        to_node_id: impl Into<String>,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            from_node_id: from_node_id.into(),
            to_node_id: to_node_id.into(),
            relationship_type,
            explanation: None,
            is_bidirectional: false,
        }
    }

    /// Set the explanation
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Mark as bidirectional
    pub fn bidirectional(mut self) -> Self {
        self.is_bidirectional = true;
        self
    }

    /// Temporal and directed: the only kind that touches the temporal maps.
    pub fn is_temporal_link(&self) -> bool {
        self.relationship_type.is_temporal() && !self.is_bidirectional
    }
}

/// Reject input that breaks the core's preconditions: utterances must be
/// strictly ordered by sequence number, uniquely identified and, when a
/// conversation is given, belong to it.
pub fn validate_utterances(
    conversation_id: Option<&str>,
    utterances: &[Utterance],
) -> GraphResult<()> {
    let mut seen = HashSet::with_capacity(utterances.len());
    let mut previous: Option<i64> = None;

    for (index, utterance) in utterances.iter().enumerate() {
        if let Some(expected) = conversation_id {
            if utterance.conversation_id != expected {
                return Err(MalformedInputError::ForeignUtterance {
                    utterance_id: utterance.id.clone(),
                    expected: expected.to_string(),
                    found: utterance.conversation_id.clone(),
                }
                .into());
            }
        }

        if let Some(prev) = previous {
            if utterance.sequence_number <= prev {
                return Err(MalformedInputError::UnsortedUtterances {
                    index,
                    previous: prev,
                    current: utterance.sequence_number,
                }
                .into());
            }
        }
        previous = Some(utterance.sequence_number);

        if !seen.insert(utterance.id.as_str()) {
            return Err(MalformedInputError::DuplicateUtterance {
                utterance_id: utterance.id.clone(),
            }
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;

    fn utt(id: &str, seq: i64) -> Utterance {
        Utterance::new(id, "conv", "s1", "Ada Lovelace", "hello", seq)
    }

    #[test]
    fn test_node_id_format() {
        assert_eq!(node_id("conv-7", 2, 14), "conv-7/L2/14");
    }

    #[test]
    fn test_relationship_type_roundtrip_known_and_other() {
        assert_eq!("leads_to".parse::<RelationshipType>().unwrap(), RelationshipType::LeadsTo);
        assert_eq!("Supports".parse::<RelationshipType>().unwrap(), RelationshipType::Supports);
        assert_eq!(
            "elaborates".parse::<RelationshipType>().unwrap(),
            RelationshipType::Other("elaborates".to_string())
        );
        assert_eq!(RelationshipType::Other("elaborates".to_string()).to_string(), "elaborates");
    }

    #[test]
    fn test_relationship_type_classification() {
        assert!(RelationshipType::LeadsTo.is_temporal());
        assert!(RelationshipType::Temporal.is_temporal());
        assert!(!RelationshipType::Related.is_temporal());
        assert!(!RelationshipType::Other("follows".to_string()).is_temporal());
    }

    #[test]
    fn test_relationship_serde_uses_plain_strings() {
        let rel = Relationship::new("a", "b", RelationshipType::Contradicts).bidirectional();
        let json = serde_json::to_value(&rel).unwrap();
        assert_eq!(json["relationship_type"], "contradicts");
        assert_eq!(json["is_bidirectional"], true);
        assert!(json.get("explanation").is_none());

        let parsed: Relationship = serde_json::from_str(
            r#"{"from_node_id":"x","to_node_id":"y","relationship_type":"leads_to"}"#,
        )
        .unwrap();
        assert!(parsed.is_temporal_link());
        assert!(!parsed.is_bidirectional);
    }

    #[test]
    fn test_bidirectional_temporal_is_not_a_temporal_link() {
        let rel = Relationship::new("a", "b", RelationshipType::LeadsTo).bidirectional();
        assert!(!rel.is_temporal_link());
    }

    #[test]
    fn test_validate_utterances_accepts_sorted() {
        let utterances = vec![utt("u1", 0), utt("u2", 1), utt("u3", 5)];
        assert!(validate_utterances(Some("conv"), &utterances).is_ok());
        assert!(validate_utterances(None, &[]).is_ok());
    }

    #[test]
    fn test_validate_utterances_rejects_unsorted() {
        let utterances = vec![utt("u1", 0), utt("u2", 3), utt("u3", 2)];
        let err = validate_utterances(None, &utterances).unwrap_err();
        assert!(matches!(
            err,
            GraphError::MalformedInput(MalformedInputError::UnsortedUtterances {
                index: 2,
                previous: 3,
                current: 2
            })
        ));
    }

    #[test]
    fn test_validate_utterances_rejects_duplicates_and_foreign() {
        let utterances = vec![utt("u1", 0), utt("u1", 1)];
        assert!(matches!(
            validate_utterances(None, &utterances),
            Err(GraphError::MalformedInput(MalformedInputError::DuplicateUtterance { .. }))
        ));

        let utterances = vec![utt("u1", 0)];
        assert!(matches!(
            validate_utterances(Some("other"), &utterances),
            Err(GraphError::MalformedInput(MalformedInputError::ForeignUtterance { .. }))
        ));
    }
}
