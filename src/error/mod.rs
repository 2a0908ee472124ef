use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Graph construction error: {0}")]
    Graph(#[from] GraphError),

    #[error("Invariant check failed: {report}")]
    InvariantsFailed { report: InvariantReport },

    #[error("Invalid transcript: {message}")]
    InvalidTranscript { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Conversation not found: {conversation_id}")]
    ConversationNotFound { conversation_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Column serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors raised while constructing a graph. Fatal to the build: nothing
/// produced by a failed build may be persisted.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    AggregationIncomplete(#[from] AggregationIncompleteError),

    #[error("Malformed input: {0}")]
    MalformedInput(#[from] MalformedInputError),

    #[error("Invalid level spec for zoom level {zoom_level}: {reason}")]
    InvalidLevelSpec { zoom_level: u32, reason: String },

    #[error(
        "Conflicting temporal edge: {direction} of {node_id} is already {existing}, refusing {incoming}"
    )]
    ConflictingTemporalEdge {
        node_id: String,
        direction: TemporalDirection,
        existing: String,
        incoming: String,
    },
}

/// Which side of a temporal link a conflict was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalDirection {
    /// The `successor_id` slot of the source node.
    Successor,
    /// The `predecessor_id` slot of the target node.
    Predecessor,
}

impl fmt::Display for TemporalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalDirection::Successor => write!(f, "successor"),
            TemporalDirection::Predecessor => write!(f, "predecessor"),
        }
    }
}

/// A zoom level that fails the partition property.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct AggregationIncompleteError {
    /// Zoom level that failed verification.
    pub zoom_level: u32,
    /// Conversation utterances covered by no node (gaps).
    pub missing: Vec<String>,
    /// Utterances claimed by more than one node (overlaps).
    pub duplicated: Vec<String>,
    /// Ids claimed by a node that do not belong to the conversation.
    pub unexpected: Vec<String>,
}

impl AggregationIncompleteError {
    /// True when no defect was recorded.
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.duplicated.is_empty() && self.unexpected.is_empty()
    }
}

impl fmt::Display for AggregationIncompleteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Zoom level {} is not a partition of the conversation", self.zoom_level)?;
        if !self.missing.is_empty() {
            write!(f, "; missing {} id(s): {}", self.missing.len(), self.missing.join(", "))?;
        }
        if !self.duplicated.is_empty() {
            write!(
                f,
                "; duplicated {} id(s): {}",
                self.duplicated.len(),
                self.duplicated.join(", ")
            )?;
        }
        if !self.unexpected.is_empty() {
            write!(
                f,
                "; unexpected {} id(s): {}",
                self.unexpected.len(),
                self.unexpected.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Input that violates the core's preconditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedInputError {
    #[error(
        "Utterances not sorted by sequence number: index {index} has {current} after {previous}"
    )]
    UnsortedUtterances {
        index: usize,
        previous: i64,
        current: i64,
    },

    #[error("Duplicate utterance id: {utterance_id}")]
    DuplicateUtterance { utterance_id: String },

    #[error("Utterance {utterance_id} belongs to {found}, expected {expected}")]
    ForeignUtterance {
        utterance_id: String,
        expected: String,
        found: String,
    },

    #[error("Relationship {from_node_id} -> {to_node_id} references unknown node {node_id}")]
    UnknownNodeReference {
        node_id: String,
        from_node_id: String,
        to_node_id: String,
    },
}

/// Identifier of a named graph invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InvariantId {
    /// INV-1.1: every utterance appears in a level-1 node.
    UtteranceCompleteness,
    /// INV-1.2: rendered timeline count equals stored utterance count.
    TimelineCompleteness,
    /// INV-1.3: coarser levels lose no utterances.
    LosslessAggregation,
    /// INV-2.1: predecessor/successor links form one linear chain per level.
    ChainLinearity,
    /// INV-2.2: bidirectional relationships are visible from both endpoints.
    BidirectionalSymmetry,
    /// INV-3.1: distinct speakers equal speaker legend entries.
    ParticipantConsistency,
    /// INV-3.2: no speaker vanishes for longer than the gap threshold.
    SpeakerStability,
    /// INV-3.3: turn-like nodes carry the speaker of every utterance they hold.
    SpeakerAttribution,
}

impl InvariantId {
    /// Short code such as `INV-1.1`.
    pub fn code(&self) -> &'static str {
        match self {
            InvariantId::UtteranceCompleteness => "INV-1.1",
            InvariantId::TimelineCompleteness => "INV-1.2",
            InvariantId::LosslessAggregation => "INV-1.3",
            InvariantId::ChainLinearity => "INV-2.1",
            InvariantId::BidirectionalSymmetry => "INV-2.2",
            InvariantId::ParticipantConsistency => "INV-3.1",
            InvariantId::SpeakerStability => "INV-3.2",
            InvariantId::SpeakerAttribution => "INV-3.3",
        }
    }
}

impl fmt::Display for InvariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A speaker whose consecutive appearances are too far apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerGap {
    /// Offending speaker.
    pub speaker_id: String,
    /// Largest index distance between consecutive appearances.
    pub gap: usize,
    /// Index of the appearance before the gap.
    pub last_seen_index: usize,
    /// Index of the reappearance.
    pub reappeared_index: usize,
}

/// Structured detail attached to an [`InvariantViolation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationContext {
    /// Utterances absent from every level-1 node.
    MissingUtterances {
        stored_count: usize,
        missing: Vec<String>,
    },
    /// Rendered vs stored counts disagree.
    CountMismatch { expected: usize, actual: usize },
    /// Utterances lost between two zoom levels.
    LostUtterances {
        zoom_from: u32,
        zoom_to: u32,
        lost: Vec<String>,
    },
    /// Nodes whose predecessor/successor links break the chain.
    BrokenChain { zoom_level: u32, node_ids: Vec<String> },
    /// Bidirectional relationships seen from only one side, or leaked into
    /// the temporal maps.
    AsymmetricLinks { pairs: Vec<(String, String)> },
    /// Speakers exceeding the gap threshold.
    SpeakerGaps {
        threshold: usize,
        gaps: Vec<SpeakerGap>,
    },
    /// Turn-like nodes with no speaker or a speaker that disagrees with
    /// their utterances.
    Misattributed { node_ids: Vec<String> },
}

/// A named invariant that a structurally valid graph fails to satisfy.
///
/// Signals a data-quality defect rather than a construction bug.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{invariant}: {message}")]
pub struct InvariantViolation {
    /// Which invariant was violated.
    pub invariant: InvariantId,
    /// Human-readable description.
    pub message: String,
    /// Counts and offending ids/speakers.
    pub context: ViolationContext,
}

impl InvariantViolation {
    /// Create a new violation.
    pub fn new(invariant: InvariantId, message: impl Into<String>, context: ViolationContext) -> Self {
        Self {
            invariant,
            message: message.into(),
            context,
        }
    }
}

/// Every violation collected by one invariant run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantReport {
    /// Violations in the order the checks ran.
    pub violations: Vec<InvariantViolation>,
}

impl InvariantReport {
    /// True when no check failed.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Ids of the violated invariants, in check order.
    pub fn invariant_ids(&self) -> Vec<InvariantId> {
        self.violations.iter().map(|v| v.invariant).collect()
    }

    /// Find the violation for a specific invariant, if any.
    pub fn get(&self, invariant: InvariantId) -> Option<&InvariantViolation> {
        self.violations.iter().find(|v| v.invariant == invariant)
    }
}

impl fmt::Display for InvariantReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.violations.is_empty() {
            return write!(f, "no violations");
        }
        let lines: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{} violation(s): {}", self.violations.len(), lines.join("; "))
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for graph construction
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for a single invariant check
pub type InvariantResult = Result<(), InvariantViolation>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "bad value".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: bad value");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::ConversationNotFound {
            conversation_id: "conv-1".to_string(),
        };
        assert_eq!(err.to_string(), "Conversation not found: conv-1");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_aggregation_error_names_missing_and_duplicated() {
        let err = AggregationIncompleteError {
            zoom_level: 2,
            missing: vec!["u9".to_string()],
            duplicated: vec!["u3".to_string(), "u4".to_string()],
            unexpected: vec![],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Zoom level 2 is not a partition"));
        assert!(msg.contains("missing 1 id(s): u9"));
        assert!(msg.contains("duplicated 2 id(s): u3, u4"));
        assert!(!msg.contains("unexpected"));
    }

    #[test]
    fn test_aggregation_error_is_empty() {
        let err = AggregationIncompleteError {
            zoom_level: 1,
            missing: vec![],
            duplicated: vec![],
            unexpected: vec![],
        };
        assert!(err.is_empty());
    }

    #[test]
    fn test_malformed_input_display() {
        let err = MalformedInputError::UnsortedUtterances {
            index: 3,
            previous: 7,
            current: 2,
        };
        assert_eq!(
            err.to_string(),
            "Utterances not sorted by sequence number: index 3 has 2 after 7"
        );

        let err = MalformedInputError::UnknownNodeReference {
            node_id: "n9".to_string(),
            from_node_id: "n1".to_string(),
            to_node_id: "n9".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Relationship n1 -> n9 references unknown node n9"
        );
    }

    #[test]
    fn test_graph_error_conversions() {
        let graph_err: GraphError = MalformedInputError::DuplicateUtterance {
            utterance_id: "u1".to_string(),
        }
        .into();
        assert!(matches!(graph_err, GraphError::MalformedInput(_)));

        let app_err: AppError = graph_err.into();
        assert!(matches!(app_err, AppError::Graph(_)));
        assert!(app_err.to_string().contains("Duplicate utterance id: u1"));
    }

    #[test]
    fn test_conflicting_edge_display() {
        let err = GraphError::ConflictingTemporalEdge {
            node_id: "a".to_string(),
            direction: TemporalDirection::Successor,
            existing: "b".to_string(),
            incoming: "c".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Conflicting temporal edge: successor of a is already b, refusing c"
        );
    }

    #[test]
    fn test_invariant_violation_display() {
        let violation = InvariantViolation::new(
            InvariantId::TimelineCompleteness,
            "timeline shows 9 of 10 utterances",
            ViolationContext::CountMismatch {
                expected: 10,
                actual: 9,
            },
        );
        assert_eq!(
            violation.to_string(),
            "INV-1.2: timeline shows 9 of 10 utterances"
        );
    }

    #[test]
    fn test_invariant_report() {
        let mut report = InvariantReport::default();
        assert!(report.is_clean());
        assert_eq!(report.to_string(), "no violations");

        report.violations.push(InvariantViolation::new(
            InvariantId::SpeakerStability,
            "speaker s1 vanished for 61 utterances",
            ViolationContext::SpeakerGaps {
                threshold: 50,
                gaps: vec![],
            },
        ));
        assert!(!report.is_clean());
        assert_eq!(report.invariant_ids(), vec![InvariantId::SpeakerStability]);
        assert!(report.get(InvariantId::SpeakerStability).is_some());
        assert!(report.get(InvariantId::ChainLinearity).is_none());
        assert!(report.to_string().starts_with("1 violation(s): INV-3.2"));
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::ConversationNotFound {
            conversation_id: "c".to_string(),
        };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }
}
