//! Stage C: speaker role assignment
//!
//! Never fails: a language-model error or empty answer falls back to a
//! keyword score over the opening turns.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, error};

use super::sample;
use crate::clients::{LanguageModel, StructuredRequest};
use crate::models::{SpeakerRole, Turn};

/// Turns inspected by the keyword fallback
const HEURISTIC_TURNS: usize = 8;

static SALESPERSON_PHRASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(this is|i'?m calling from|sales|service department|how can i help|thanks for calling)",
    )
    .unwrap()
});

const ROLE_INSTRUCTIONS: &str = "\
You label the two participants of a phone call to a car dealership.
The conversation is given as chronological lines prefixed with speaker0: or speaker1:.
Return a role for each speaker: salesperson, client or unknown.

The salesperson works for the dealership. Signals: talks about inventory, stock, trims or \
availability; quotes prices, fees, financing or warranties; identifies the dealership or says \
things like \"our lot\" or \"I can schedule you\"; asks qualifying questions about budget or \
timeline; offers next steps such as sending a quote or booking a visit.

The client is the caller or customer. Signals: asks about availability, price or payments; \
gives personal details or preferences; describes a vehicle to trade in.

If one participant mostly asks and the other answers with dealership information, the asker \
is the client. If a participant transfers the call or sets appointments, that participant is \
the salesperson. Do not decide based on who speaks first or on tone alone. When the lines do \
not support a role, answer unknown.";

/// Roles for diarized speakers 0 and 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoleMap {
    pub speaker0: SpeakerRole,
    pub speaker1: SpeakerRole,
}

impl RoleMap {
    pub fn role_of(&self, speaker: Option<u32>) -> SpeakerRole {
        match speaker {
            Some(0) => self.speaker0,
            Some(1) => self.speaker1,
            _ => SpeakerRole::Unknown,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.speaker0 != SpeakerRole::Unknown || self.speaker1 != SpeakerRole::Unknown
    }

    fn from_model_output(value: &Value) -> Self {
        let role = |field: &str| {
            value
                .get(field)
                .and_then(Value::as_str)
                .and_then(SpeakerRole::parse)
                .unwrap_or(SpeakerRole::Unknown)
        };
        Self {
            speaker0: role("speaker0"),
            speaker1: role("speaker1"),
        }
    }
}

fn role_schema() -> Value {
    let roles = SpeakerRole::wire_values();
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["speaker0", "speaker1"],
        "properties": {
            "speaker0": { "type": "string", "enum": roles },
            "speaker1": { "type": "string", "enum": roles },
        }
    })
}

/// Score the opening turns for dealership phrases; a tie leaves both unknown
pub fn heuristic_roles(turns: &[Turn], dealership_names: &[String]) -> RoleMap {
    let names: Vec<String> = dealership_names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();

    let mut scores = [0u32; 2];
    for turn in turns.iter().take(HEURISTIC_TURNS) {
        let Some(idx @ (0 | 1)) = turn.speaker else {
            continue;
        };
        let text = turn.text.to_lowercase();
        if SALESPERSON_PHRASES.is_match(&text) || names.iter().any(|n| text.contains(n.as_str())) {
            scores[idx as usize] += 1;
        }
    }

    match scores[0].cmp(&scores[1]) {
        std::cmp::Ordering::Greater => RoleMap {
            speaker0: SpeakerRole::Salesperson,
            speaker1: SpeakerRole::Client,
        },
        std::cmp::Ordering::Less => RoleMap {
            speaker0: SpeakerRole::Client,
            speaker1: SpeakerRole::Salesperson,
        },
        std::cmp::Ordering::Equal => RoleMap::default(),
    }
}

async fn model_roles(llm: &dyn LanguageModel, sample: String) -> Option<RoleMap> {
    let request = StructuredRequest {
        schema_name: "roles_schema".to_string(),
        schema: role_schema(),
        instructions: ROLE_INSTRUCTIONS.to_string(),
        input: format!("Conversation sample:\n{}", sample),
    };

    match llm.structured(&request).await {
        Ok(Some(value)) => Some(RoleMap::from_model_output(&value)),
        Ok(None) => {
            debug!("Role model returned no output");
            None
        }
        Err(err) => {
            error!(error = %err, "Role assignment via language model failed");
            None
        }
    }
}

/// Assign roles in place; returns the map applied, if any
///
/// Turns are left untouched when neither speaker 0 nor speaker 1 is present.
pub async fn assign_roles(
    llm: Option<&dyn LanguageModel>,
    turns: &mut [Turn],
    dealership_names: &[String],
) -> Option<RoleMap> {
    if !turns.iter().any(|t| matches!(t.speaker, Some(0 | 1))) {
        return None;
    }

    let sample = sample::speaker_sample(turns);
    let from_model = match llm {
        Some(llm) if !sample.is_empty() => model_roles(llm, sample).await,
        _ => None,
    };
    let map = from_model.unwrap_or_else(|| heuristic_roles(turns, dealership_names));

    for turn in turns.iter_mut() {
        turn.role = map.role_of(turn.speaker);
    }
    Some(map)
}
