//! Import format for diarized transcripts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::graph::{Relationship, Utterance};

/// A diarized transcript as produced by the ingestion pipeline.
///
/// ```json
/// {
///   "conversation_id": "standup-2025-01-06",
///   "utterances": [
///     {"speaker_id": "spk_0", "speaker_name": "Ada Lovelace", "text": "Morning."}
///   ],
///   "relationships": []
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Conversation every utterance is filed under.
    pub conversation_id: String,
    /// Utterances in any order; sequence numbers decide placement.
    #[serde(default)]
    pub utterances: Vec<TranscriptUtterance>,
    /// Relationships between node ids, in precedence order. When present
    /// they replace every relationship stored for the conversation; when
    /// absent the stored ones are kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Vec<Relationship>>,
}

/// One transcript line. Everything but speaker and text is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptUtterance {
    /// Defaults to `{conversation_id}-u{sequence_number}`.
    #[serde(default)]
    pub id: Option<String>,
    /// Diarized speaker identifier.
    pub speaker_id: String,
    /// Defaults to the speaker id.
    #[serde(default)]
    pub speaker_name: Option<String>,
    /// Transcribed text.
    pub text: String,
    /// Start offset in seconds.
    #[serde(default)]
    pub timestamp_start: f64,
    /// End offset in seconds.
    #[serde(default)]
    pub timestamp_end: f64,
    /// Defaults to the position in the `utterances` array.
    #[serde(default)]
    pub sequence_number: Option<i64>,
}

impl Transcript {
    /// Parse a transcript from JSON text.
    pub fn from_json(json: &str) -> AppResult<Self> {
        let transcript: Transcript =
            serde_json::from_str(json).map_err(|e| AppError::InvalidTranscript {
                message: e.to_string(),
            })?;

        if transcript.conversation_id.trim().is_empty() {
            return Err(AppError::InvalidTranscript {
                message: "conversation_id must not be empty".to_string(),
            });
        }
        Ok(transcript)
    }

    /// Read and parse a transcript file.
    pub fn from_path(path: &Path) -> AppResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| AppError::InvalidTranscript {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }

    /// Resolve defaults and return the utterances sorted by sequence number.
    pub fn utterances(&self) -> Vec<Utterance> {
        let mut utterances: Vec<Utterance> = self
            .utterances
            .iter()
            .enumerate()
            .map(|(index, line)| {
                let sequence_number = line.sequence_number.unwrap_or(index as i64);
                let id = line
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("{}-u{}", self.conversation_id, sequence_number));
                let speaker_name = line
                    .speaker_name
                    .clone()
                    .unwrap_or_else(|| line.speaker_id.clone());

                Utterance::new(
                    id,
                    self.conversation_id.clone(),
                    line.speaker_id.clone(),
                    speaker_name,
                    line.text.clone(),
                    sequence_number,
                )
                .with_timestamps(line.timestamp_start, line.timestamp_end)
            })
            .collect();
        utterances.sort_by_key(|u| u.sequence_number);
        utterances
    }
}
