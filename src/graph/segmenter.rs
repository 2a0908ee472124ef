//! Turn segmentation - grouping consecutive same-speaker utterances.

use tracing::debug;

use super::text::{compose_node, TextLimits};
use super::{Node, Utterance, TURN_LEVEL};
use crate::config::GraphConfig;

/// Groups an ordered utterance stream into speaker turns.
///
/// Input must already be sorted by `sequence_number`; the segmenter does
/// not reorder. Use [`validate_utterances`](super::validate_utterances)
/// first when the ordering is not guaranteed by the caller.
#[derive(Debug, Clone, Default)]
pub struct TurnSegmenter {
    limits: TextLimits,
}

impl TurnSegmenter {
    /// Create a segmenter using the configured label and summary limits.
    pub fn new(config: &GraphConfig) -> Self {
        Self {
            limits: TextLimits::from(config),
        }
    }

    /// Create a segmenter with explicit limits.
    pub fn with_limits(limits: TextLimits) -> Self {
        Self { limits }
    }

    /// Split `utterances` into turns in a single pass.
    ///
    /// A new turn starts whenever the speaker changes. Each closed turn is
    /// back-linked to the previous one, so the result is a single chain.
    pub fn segment(&self, utterances: &[Utterance]) -> Vec<Node> {
        let mut turns: Vec<Node> = Vec::new();
        let mut current_speaker: Option<&str> = None;
        let mut current_run: Vec<&Utterance> = Vec::new();

        for utterance in utterances {
            if current_speaker != Some(utterance.speaker_id.as_str()) {
                self.close_run(&mut turns, &mut current_run);
                current_speaker = Some(utterance.speaker_id.as_str());
            }
            current_run.push(utterance);
        }
        self.close_run(&mut turns, &mut current_run);

        debug!(
            utterances = utterances.len(),
            turns = turns.len(),
            "Segmented utterances into turns"
        );
        turns
    }

    fn close_run(&self, turns: &mut Vec<Node>, run: &mut Vec<&Utterance>) {
        let Some(mut turn) = compose_node(TURN_LEVEL, run, None, self.limits) else {
            return;
        };
        run.clear();

        if let Some(previous) = turns.last_mut() {
            previous.successor_id = Some(turn.id.clone());
            turn.predecessor_id = Some(previous.id.clone());
        }
        turns.push(turn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn utterances(speakers: &[&str]) -> Vec<Utterance> {
        speakers
            .iter()
            .enumerate()
            .map(|(i, speaker)| {
                Utterance::new(
                    format!("u{}", i),
                    "conv",
                    *speaker,
                    format!("Speaker {}", speaker),
                    format!("Line {}.", i),
                    i as i64,
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(TurnSegmenter::default().segment(&[]).is_empty());
    }

    #[test]
    fn test_single_utterance() {
        let turns = TurnSegmenter::default().segment(&utterances(&["A"]));
        assert_eq!(turns.len(), 1);
        assert!(turns[0].predecessor_id.is_none());
        assert!(turns[0].successor_id.is_none());
        assert_eq!(turns[0].zoom_level, TURN_LEVEL);
        assert!(!turns[0].is_utterance_node);
    }

    #[test]
    fn test_runs_and_back_links() {
        let turns = TurnSegmenter::default().segment(&utterances(&["A", "A", "A", "B", "B", "A"]));

        let counts: Vec<usize> = turns.iter().map(|t| t.utterance_count()).collect();
        assert_eq!(counts, vec![3, 2, 1]);

        let speakers: Vec<&str> = turns.iter().filter_map(|t| t.speaker_id.as_deref()).collect();
        assert_eq!(speakers, vec!["A", "B", "A"]);

        assert_eq!(turns[1].predecessor_id.as_deref(), Some(turns[0].id.as_str()));
        assert_eq!(turns[1].successor_id.as_deref(), Some(turns[2].id.as_str()));
        assert!(turns[0].predecessor_id.is_none());
        assert!(turns[2].successor_id.is_none());
    }

    #[test]
    fn test_turn_text_and_sequence() {
        let turns = TurnSegmenter::default().segment(&utterances(&["A", "A", "B"]));
        assert_eq!(turns[0].full_text, "Line 0.\nLine 1.");
        assert_eq!(turns[0].label, "[SA] Line 0.");
        assert_eq!(turns[0].sequence_number, 0);
        assert_eq!(turns[1].sequence_number, 2);
        assert_eq!(turns[1].id, "conv/L2/2");
    }

    #[test]
    fn test_label_limit_is_configurable() {
        let segmenter = TurnSegmenter::with_limits(TextLimits {
            label_max_length: 8,
            summary_max_chars: 150,
        });
        let input = vec![Utterance::new("u0", "c", "A", "Ann Bee", "alpha beta gamma delta", 0)];
        let turns = segmenter.segment(&input);
        assert_eq!(turns[0].label, "[AB] alpha...");
    }
}
