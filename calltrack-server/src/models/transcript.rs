//! Transcript turns

use serde::{Deserialize, Serialize};

use super::enums::SpeakerRole;

/// Coalesced, speaker-attributed span of transcript text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// Diarized speaker index; `None` when the provider gave none
    pub speaker: Option<u32>,
    #[serde(default)]
    pub role: SpeakerRole,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Persisted transcript (stored as JSON on the call log)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptDocument {
    pub turns: Vec<Turn>,
    pub language: String,
    pub duration_sec: u64,
    #[serde(default)]
    pub roles_assigned: bool,
}

impl TranscriptDocument {
    /// Turn texts joined with single spaces
    pub fn full_text(&self) -> String {
        self.turns
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }
}
