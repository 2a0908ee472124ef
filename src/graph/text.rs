//! Label and summary rendering for nodes.

use super::{node_id, Node, Utterance};
use crate::config::GraphConfig;

const ELLIPSIS: &str = "...";

/// Length limits used when rendering node text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextLimits {
    /// Maximum lead-text length in a label.
    pub label_max_length: usize,
    /// Characters kept in a summary before the ellipsis.
    pub summary_max_chars: usize,
}

impl Default for TextLimits {
    fn default() -> Self {
        Self {
            label_max_length: 60,
            summary_max_chars: 150,
        }
    }
}

impl From<&GraphConfig> for TextLimits {
    fn from(config: &GraphConfig) -> Self {
        Self {
            label_max_length: config.label_max_length,
            summary_max_chars: config.summary_max_chars,
        }
    }
}

/// First `max_chars` characters of `text`, with an ellipsis when cut.
pub fn summarize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut summary: String = text.chars().take(max_chars).collect();
    summary.push_str(ELLIPSIS);
    summary
}

/// Upper-cased initials of the first two words of a speaker name, or the
/// first two characters of a single-word name.
pub fn speaker_initials(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    match words.as_slice() {
        [] => "?".to_string(),
        [single] => single.chars().take(2).collect::<String>().to_uppercase(),
        [first, second, ..] => first
            .chars()
            .take(1)
            .chain(second.chars().take(1))
            .collect::<String>()
            .to_uppercase(),
    }
}

/// Lead text for a label.
///
/// Takes the first sentence when it ends (`.`, `?` or `!` followed by a
/// space or newline) within `max_len` characters. Otherwise returns the
/// whole text if it fits, or cuts at the last whitespace before `max_len`
/// and appends an ellipsis.
pub fn lead_text(text: &str, max_len: usize) -> String {
    let chars: Vec<char> = text.trim().chars().collect();

    if let Some(end) = chars
        .windows(2)
        .position(|w| matches!(w[0], '.' | '?' | '!') && matches!(w[1], ' ' | '\n'))
    {
        if end < max_len {
            return chars[..=end].iter().collect();
        }
    }

    if chars.len() <= max_len {
        return chars.iter().collect();
    }

    let window = &chars[..max_len];
    let cut = match window.iter().rposition(|c| c.is_whitespace()) {
        Some(pos) if pos > 0 => &window[..pos],
        _ => window,
    };
    let mut lead: String = cut.iter().collect();
    lead.truncate(lead.trim_end().len());
    lead.push_str(ELLIPSIS);
    lead
}

/// `[INITIALS] lead` for a speaker-owned node, plain lead text otherwise.
pub fn node_label(speaker_name: Option<&str>, text: &str, max_len: usize) -> String {
    match speaker_name {
        Some(name) => format!("[{}] {}", speaker_initials(name), lead_text(text, max_len)),
        None => lead_text(text, max_len),
    }
}

/// Assemble a node from utterances already known to be in sequence order.
///
/// Returns `None` for an empty slice. The speaker is set only when every
/// utterance shares it. Temporal links are left for the caller to chain.
pub(crate) fn compose_node(
    zoom_level: u32,
    utterances: &[&Utterance],
    label: Option<&str>,
    limits: TextLimits,
) -> Option<Node> {
    let first = utterances.first()?;

    let full_text = utterances
        .iter()
        .map(|u| u.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let single_speaker = utterances.iter().all(|u| u.speaker_id == first.speaker_id);
    let speaker_name = single_speaker.then_some(first.speaker_name.as_str());

    let label = match label {
        Some(explicit) => explicit.to_string(),
        None => node_label(speaker_name, &full_text, limits.label_max_length),
    };

    Some(Node {
        id: node_id(&first.conversation_id, zoom_level, first.sequence_number),
        conversation_id: first.conversation_id.clone(),
        zoom_level,
        label,
        summary: summarize(&full_text, limits.summary_max_chars),
        full_text,
        speaker_id: single_speaker.then(|| first.speaker_id.clone()),
        utterance_ids: utterances.iter().map(|u| u.id.clone()).collect(),
        sequence_number: first.sequence_number,
        predecessor_id: None,
        successor_id: None,
        contextual_relation: Default::default(),
        linked_nodes: Vec::new(),
        chunk_id: None,
        is_utterance_node: false,
    })
}
