//! Unit tests for the invariant battery.
//!
//! Covers each check in isolation (completeness, lossless aggregation,
//! chain linearity, symmetry, participants, speaker stability and
//! attribution) and the collect-all / fail-fast runner.

use super::*;
use crate::graph::{
    GraphBuilder, LevelSpec, RelationshipMapper, RelationshipType, TurnSegmenter, UtteranceGroup,
    ZoomAggregator, TURN_LEVEL,
};
use pretty_assertions::assert_eq;

fn speakers(pattern: &[&str]) -> Vec<Utterance> {
    pattern
        .iter()
        .enumerate()
        .map(|(i, s)| {
            Utterance::new(
                format!("u{}", i),
                "conv",
                *s,
                format!("{} Speaker", s),
                format!("Utterance number {}.", i),
                i as i64,
            )
        })
        .collect()
}

fn ten_utterances() -> Vec<Utterance> {
    speakers(&["A", "B", "A", "B", "A", "B", "A", "B", "A", "B"])
}

// ============================================================================
// INV-1.1 completeness
// ============================================================================

#[test]
fn test_completeness_passes_for_identity_level() {
    let utterances = ten_utterances();
    let level_one = ZoomAggregator::default().utterance_level(&utterances);
    assert!(check_completeness(&utterances, &level_one).is_ok());
}

#[test]
fn test_completeness_names_the_missing_utterance() {
    let utterances = ten_utterances();
    let level_one = ZoomAggregator::default().utterance_level(&utterances[..9]);

    let violation = check_completeness(&utterances, &level_one).unwrap_err();
    assert_eq!(violation.invariant, InvariantId::UtteranceCompleteness);
    assert_eq!(
        violation.context,
        ViolationContext::MissingUtterances {
            stored_count: 10,
            missing: vec!["u9".to_string()],
        }
    );
    assert!(violation.message.starts_with("1 of 10"));
}

// ============================================================================
// INV-1.2 timeline completeness
// ============================================================================

#[test]
fn test_timeline_completeness() {
    assert!(check_timeline_completeness(10, 10).is_ok());

    let violation = check_timeline_completeness(10, 7).unwrap_err();
    assert_eq!(violation.invariant, InvariantId::TimelineCompleteness);
    assert_eq!(
        violation.context,
        ViolationContext::CountMismatch {
            expected: 10,
            actual: 7
        }
    );
}

// ============================================================================
// INV-1.3 lossless aggregation
// ============================================================================

#[test]
fn test_lossless_aggregation_names_lost_ids() {
    let utterances = ten_utterances();
    let mut levels = ZoomLevels::new();
    levels.insert(1, ZoomAggregator::default().utterance_level(&utterances));
    levels.insert(2, TurnSegmenter::default().segment(&utterances[..8]));

    let violation = check_lossless_aggregation(&levels, 1, 2).unwrap_err();
    assert_eq!(violation.invariant, InvariantId::LosslessAggregation);
    assert_eq!(
        violation.context,
        ViolationContext::LostUtterances {
            zoom_from: 1,
            zoom_to: 2,
            lost: vec!["u8".to_string(), "u9".to_string()],
        }
    );
}

#[test]
fn test_lossless_aggregation_allows_superset() {
    let utterances = ten_utterances();
    let mut levels = ZoomLevels::new();
    levels.insert(1, ZoomAggregator::default().utterance_level(&utterances[..5]));
    levels.insert(2, TurnSegmenter::default().segment(&utterances));
    assert!(check_lossless_aggregation(&levels, 1, 2).is_ok());
}

#[test]
fn test_lossless_aggregation_missing_level_loses_everything() {
    let utterances = speakers(&["A", "B"]);
    let mut levels = ZoomLevels::new();
    levels.insert(1, ZoomAggregator::default().utterance_level(&utterances));

    let violation = check_lossless_aggregation(&levels, 1, 3).unwrap_err();
    match violation.context {
        ViolationContext::LostUtterances { lost, .. } => assert_eq!(lost, vec!["u0", "u1"]),
        other => panic!("unexpected context: {other:?}"),
    }
}

// ============================================================================
// INV-2.1 chain linearity
// ============================================================================

#[test]
fn test_chain_linearity_holds_for_segmented_turns() {
    let turns = TurnSegmenter::default().segment(&speakers(&["A", "A", "B", "C", "C", "A"]));
    assert!(check_chain_linearity(TURN_LEVEL, &turns).is_ok());
}

#[test]
fn test_chain_linearity_ignores_input_order() {
    let mut turns = TurnSegmenter::default().segment(&speakers(&["A", "B", "A"]));
    turns.reverse();
    assert!(check_chain_linearity(TURN_LEVEL, &turns).is_ok());
}

#[test]
fn test_chain_linearity_detects_skip() {
    let mut turns = TurnSegmenter::default().segment(&speakers(&["A", "B", "A", "B"]));
    turns[0].successor_id = Some(turns[2].id.clone());

    let violation = check_chain_linearity(TURN_LEVEL, &turns).unwrap_err();
    assert_eq!(violation.invariant, InvariantId::ChainLinearity);
    assert_eq!(
        violation.context,
        ViolationContext::BrokenChain {
            zoom_level: TURN_LEVEL,
            node_ids: vec![turns[0].id.clone()],
        }
    );
}

#[test]
fn test_chain_linearity_detects_second_head() {
    let mut turns = TurnSegmenter::default().segment(&speakers(&["A", "B", "A"]));
    turns[1].predecessor_id = None;
    assert!(check_chain_linearity(TURN_LEVEL, &turns).is_err());
}

// ============================================================================
// INV-2.2 bidirectional symmetry
// ============================================================================

#[test]
fn test_bidirectional_symmetry_after_mapping() {
    let turns = TurnSegmenter::default().segment(&speakers(&["A", "B", "A"]));
    let rels = vec![
        Relationship::new(turns[0].id.clone(), turns[2].id.clone(), RelationshipType::Related)
            .bidirectional(),
    ];
    let maps = RelationshipMapper::default().build_maps(&turns, &rels).unwrap();
    let turns = maps.apply(turns);

    assert!(check_bidirectional_symmetry(&turns, &rels, &maps).is_ok());
}

#[test]
fn test_bidirectional_symmetry_detects_one_sided_link() {
    let turns = TurnSegmenter::default().segment(&speakers(&["A", "B", "A"]));
    let rels = vec![
        Relationship::new(turns[0].id.clone(), turns[2].id.clone(), RelationshipType::Related)
            .bidirectional(),
    ];
    let maps = RelationshipMapper::default().build_maps(&turns, &rels).unwrap();
    let mut turns = maps.apply(turns);
    turns[2].linked_nodes.clear();

    let violation = check_bidirectional_symmetry(&turns, &rels, &maps).unwrap_err();
    assert_eq!(violation.invariant, InvariantId::BidirectionalSymmetry);
    assert_eq!(
        violation.context,
        ViolationContext::AsymmetricLinks {
            pairs: vec![(turns[0].id.clone(), turns[2].id.clone())],
        }
    );
}

#[test]
fn test_bidirectional_symmetry_detects_temporal_leak() {
    let turns = TurnSegmenter::default().segment(&speakers(&["A", "B"]));
    let rels = vec![
        Relationship::new(turns[0].id.clone(), turns[1].id.clone(), RelationshipType::Related)
            .bidirectional(),
    ];
    let mut maps = RelationshipMapper::default().build_maps(&turns, &rels).unwrap();
    let turns = maps.apply(turns);
    maps.successor_by_id
        .insert(turns[0].id.clone(), turns[1].id.clone());

    assert!(check_bidirectional_symmetry(&turns, &rels, &maps).is_err());
}

// ============================================================================
// INV-3.1 participant consistency
// ============================================================================

#[test]
fn test_speaker_legend_from_turns() {
    let turns = TurnSegmenter::default().segment(&speakers(&["A", "A", "B", "A", "C"]));
    let legend = speaker_legend(&turns);

    let ids: Vec<&str> = legend.iter().map(|e| e.speaker_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    assert_eq!(legend[0].turn_count, 2);
    assert_eq!(legend[0].utterance_count, 3);
    assert_eq!(legend[0].label, turns[0].label);
}

#[test]
fn test_participant_consistency() {
    let utterances = speakers(&["A", "B", "C", "A"]);
    let turns = TurnSegmenter::default().segment(&utterances);
    let legend = speaker_legend(&turns);
    assert!(check_participant_consistency(&utterances, &legend).is_ok());

    let violation = check_participant_consistency(&utterances, &legend[..2]).unwrap_err();
    assert_eq!(violation.invariant, InvariantId::ParticipantConsistency);
    assert_eq!(
        violation.context,
        ViolationContext::CountMismatch {
            expected: 3,
            actual: 2
        }
    );
}

// ============================================================================
// INV-3.2 speaker stability
// ============================================================================

fn vanishing_speaker() -> Vec<Utterance> {
    let mut pattern = vec!["A"; 10];
    pattern.extend(vec!["B"; 60]);
    pattern.push("A");
    speakers(&pattern)
}

#[test]
fn test_speaker_stability_flags_long_absence() {
    let violation = check_speaker_stability(&vanishing_speaker(), 50).unwrap_err();
    assert_eq!(violation.invariant, InvariantId::SpeakerStability);
    assert_eq!(
        violation.context,
        ViolationContext::SpeakerGaps {
            threshold: 50,
            gaps: vec![SpeakerGap {
                speaker_id: "A".to_string(),
                gap: 61,
                last_seen_index: 9,
                reappeared_index: 70,
            }],
        }
    );
    assert!(violation.message.contains("A (gap 61)"));
}

#[test]
fn test_speaker_stability_alternation_never_flags() {
    for len in [0, 1, 2, 7, 100, 501] {
        let pattern: Vec<&str> = (0..len).map(|i| if i % 2 == 0 { "A" } else { "B" }).collect();
        assert!(
            check_speaker_stability(&speakers(&pattern), DEFAULT_SPEAKER_GAP_THRESHOLD).is_ok(),
            "alternation of length {} flagged",
            len
        );
    }
}

#[test]
fn test_speaker_stability_gap_equal_to_threshold_passes() {
    let mut pattern = vec!["A"];
    pattern.extend(vec!["B"; 49]);
    pattern.push("A");
    assert!(check_speaker_stability(&speakers(&pattern), 50).is_ok());
}

// ============================================================================
// INV-3.3 speaker attribution
// ============================================================================

#[test]
fn test_speaker_attribution_holds_for_turns() {
    let utterances = speakers(&["A", "A", "B"]);
    let turns = TurnSegmenter::default().segment(&utterances);
    assert!(check_speaker_attribution(&utterances, &turns).is_ok());
}

#[test]
fn test_speaker_attribution_detects_wrong_and_missing_speaker() {
    let utterances = speakers(&["A", "A", "B", "C"]);
    let mut turns = TurnSegmenter::default().segment(&utterances);
    turns[0].speaker_id = Some("B".to_string());
    turns[2].speaker_id = None;

    let violation = check_speaker_attribution(&utterances, &turns).unwrap_err();
    assert_eq!(
        violation.context,
        ViolationContext::Misattributed {
            node_ids: vec![turns[0].id.clone(), turns[2].id.clone()],
        }
    );
}

#[test]
fn test_speaker_attribution_skips_coarse_levels() {
    let utterances = speakers(&["A", "B"]);
    let nodes = ZoomAggregator::default()
        .group_level(3, &utterances, &[UtteranceGroup::new(["u0", "u1"])])
        .unwrap();
    assert!(nodes[0].speaker_id.is_none());
    assert!(check_speaker_attribution(&utterances, &nodes).is_ok());
}

// ============================================================================
// InvariantChecker
// ============================================================================

#[test]
fn test_checker_clean_snapshot() {
    let utterances = speakers(&["A", "B", "B", "A", "C"]);
    let specs = vec![LevelSpec::turn_windows(3, 2)];
    let snapshot = GraphBuilder::default()
        .build("conv", &utterances, &[], &specs)
        .unwrap();

    let report = InvariantChecker::default().check_snapshot(&snapshot, &utterances);
    assert!(report.is_clean(), "unexpected violations: {}", report);
}

#[test]
fn test_checker_collects_all_violations() {
    let utterances = vanishing_speaker();
    let snapshot = GraphBuilder::default()
        .build("conv", &utterances, &[], &[])
        .unwrap();
    let mut levels = snapshot.levels.clone();
    levels.get_mut(&TURN_LEVEL).unwrap().pop();

    let report = InvariantChecker::default().check_graph(
        &utterances,
        &levels,
        &snapshot.relationships,
        &snapshot.maps,
    );
    assert_eq!(
        report.invariant_ids(),
        vec![
            InvariantId::LosslessAggregation,
            InvariantId::ChainLinearity,
            InvariantId::SpeakerStability,
        ]
    );
}

#[test]
fn test_checker_fail_fast_stops_at_first() {
    let utterances = vanishing_speaker();
    let snapshot = GraphBuilder::default()
        .build("conv", &utterances, &[], &[])
        .unwrap();
    let mut levels = snapshot.levels.clone();
    levels.get_mut(&TURN_LEVEL).unwrap().pop();

    let report = InvariantChecker::default()
        .with_mode(CheckMode::FailFast)
        .check_graph(&utterances, &levels, &snapshot.relationships, &snapshot.maps);
    assert_eq!(report.invariant_ids(), vec![InvariantId::LosslessAggregation]);
}

#[test]
fn test_checker_gap_threshold_is_configurable() {
    let utterances = speakers(&["A", "B", "B", "B", "A"]);
    let checker = InvariantChecker::default().with_gap_threshold(3);
    let snapshot = GraphBuilder::default()
        .build("conv", &utterances, &[], &[])
        .unwrap();

    let report = checker.check_snapshot(&snapshot, &utterances);
    assert_eq!(report.invariant_ids(), vec![InvariantId::SpeakerStability]);
}

#[test]
fn test_checker_rendered_views() {
    let utterances = speakers(&["A", "B", "C"]);
    let turns = TurnSegmenter::default().segment(&utterances);
    let legend = speaker_legend(&turns);
    let checker = InvariantChecker::default();

    assert!(checker.check_rendered(&utterances, 3, &legend).is_clean());

    let report = checker.check_rendered(&utterances, 2, &legend[..1]);
    assert_eq!(
        report.invariant_ids(),
        vec![
            InvariantId::TimelineCompleteness,
            InvariantId::ParticipantConsistency
        ]
    );
}
