//! Stage B: transcription and turn coalescing

use std::time::Duration;

use tracing::{debug, warn};

use crate::clients::{ClientError, ObjectStore, RawTranscript, SpeechToText, Utterance};
use crate::models::{SpeakerRole, Turn};

/// Largest silence between utterances that still continues a turn
pub const MAX_SILENCE_GAP_SECS: f64 = 1.5;

/// Upper bound on the text of one coalesced turn
pub const MAX_TURN_CHARS: usize = 800;

/// Diarized transcript reduced to turns
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub turns: Vec<Turn>,
    pub language: Option<String>,
    pub duration_secs: Option<f64>,
}

fn starts_with_punctuation(text: &str) -> bool {
    matches!(text.chars().next(), Some('.' | ',' | ';' | ':' | '!' | '?'))
}

/// Coalesce adjacent same-speaker utterances into turns
pub fn to_turns(utterances: &[Utterance]) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();

    for utterance in utterances {
        if !utterance.start.is_finite() {
            continue;
        }
        let text = utterance.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            continue;
        }
        let end = if utterance.end.is_finite() {
            utterance.end
        } else {
            utterance.start
        };

        if let Some(last) = turns.last_mut() {
            let mergeable = last.speaker == utterance.speaker
                && last.end.is_finite()
                && utterance.start - last.end <= MAX_SILENCE_GAP_SECS
                && last.text.chars().count() + 1 + text.chars().count() <= MAX_TURN_CHARS;

            if mergeable {
                if !starts_with_punctuation(&text) {
                    last.text.push(' ');
                }
                last.text.push_str(&text);
                last.end = last.end.max(end);
                continue;
            }
        }

        turns.push(Turn {
            speaker: utterance.speaker,
            role: SpeakerRole::Unknown,
            start: utterance.start,
            end,
            text,
        });
    }

    turns
}

impl From<RawTranscript> for Transcription {
    fn from(raw: RawTranscript) -> Self {
        Self {
            turns: to_turns(&raw.utterances),
            language: raw.language,
            duration_secs: raw.duration_secs,
        }
    }
}

/// Transcribe a stored recording
///
/// Tries a signed URL first; when that fails or yields no turns the object
/// bytes are submitted directly. An empty result is returned as-is for the
/// caller to decide on.
pub async fn transcribe(
    stt: &dyn SpeechToText,
    store: &dyn ObjectStore,
    key: &str,
    read_url_ttl: Duration,
) -> Result<Transcription, ClientError> {
    let url = store.signed_read_url(key, read_url_ttl)?;

    match stt.transcribe_url(&url).await {
        Ok(raw) => {
            let transcription = Transcription::from(raw);
            if !transcription.turns.is_empty() {
                return Ok(transcription);
            }
            debug!(key, "URL transcription returned no turns, submitting bytes");
        }
        Err(err) => {
            warn!(key, error = %err, "URL transcription failed, submitting bytes");
        }
    }

    let object = store.get(key).await?;
    let raw = stt.transcribe_bytes(object.bytes, &object.content_type).await?;
    Ok(Transcription::from(raw))
}
