//! Stage D: conversation classification

use serde_json::{json, Value};
use tracing::{debug, error};

use super::heuristics::{self, Classification};
use super::sample;
use crate::clients::{LanguageModel, StructuredRequest};
use crate::models::{CallDepartment, CallIntent, CallResult, Turn};

/// Sentiment used when the model gives none or garbage
pub const NEUTRAL_SENTIMENT: u8 = 3;

const ANALYSIS_INSTRUCTIONS: &str = "\
You classify phone calls for an automotive sales and service business.
Each input line starts with salesperson:, client: or a speaker label.

Return four fields:
- intent: the client's primary goal. purchase (buy or lease a vehicle), trade_in (trading in \
their current vehicle, appraisal, payoff), finance (rates, monthly payment, APR, term, down \
payment), credit (approval odds, credit score, pre-approval), appointment (setting a visit or \
test drive), other (a clear goal not listed), none (not enough information).
- result: the final state of the call. not_connected, appointment_requested (a visit was \
proposed but no firm time agreed), appointment_booked (a specific date and time agreed), \
appointment_rescheduled, appointment_cancelled, call_transferred, follow_up (the next step is \
a remote call, text or email), not_interested, other, none.
- department: sales (buying, leasing, trading or financing a vehicle), service (maintenance, \
repair, recall, service visit), parts (parts or accessories), other, none.
- sentiment: the client's sentiment from 1 (very negative) to 5 (very positive), 3 if unclear.

Base intent, sentiment and department on what the client says, result on how the call ends. \
Booking an appointment does not change the intent. Classify only from the transcript; \
when unsure use none and sentiment 3.";

fn analysis_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["intent", "sentiment", "result", "department"],
        "properties": {
            "intent": { "type": "string", "enum": CallIntent::wire_values() },
            "sentiment": { "type": "integer", "enum": [1, 2, 3, 4, 5] },
            "result": { "type": "string", "enum": CallResult::wire_values() },
            "department": { "type": "string", "enum": CallDepartment::wire_values() },
        }
    })
}

/// Round and clamp a model sentiment into 1..=5
pub fn coerce_sentiment(value: Option<&Value>) -> u8 {
    match value.and_then(Value::as_f64) {
        Some(v) if v.is_finite() => v.round().clamp(1.0, 5.0) as u8,
        _ => NEUTRAL_SENTIMENT,
    }
}

/// Map model output onto the closed enumerations; unknown values become defaults
pub fn from_model_output(value: &Value) -> Classification {
    let text = |field: &str| value.get(field).and_then(Value::as_str).unwrap_or("");
    Classification {
        intent: CallIntent::parse(text("intent")).unwrap_or(CallIntent::None),
        result: CallResult::parse(text("result")).unwrap_or(CallResult::None),
        department: CallDepartment::parse(text("department")).unwrap_or(CallDepartment::None),
        sentiment: coerce_sentiment(value.get("sentiment")),
    }
}

/// Classify from role-labeled turns, falling back to keyword heuristics
pub async fn classify(llm: Option<&dyn LanguageModel>, turns: &[Turn]) -> Classification {
    let labeled = sample::labeled_sample(turns);

    if let Some(llm) = llm.filter(|_| !labeled.is_empty()) {
        let request = StructuredRequest {
            schema_name: "analysis_schema".to_string(),
            schema: analysis_schema(),
            instructions: ANALYSIS_INSTRUCTIONS.to_string(),
            input: format!("Conversation:\n{}", labeled),
        };
        match llm.structured(&request).await {
            Ok(Some(value)) => return from_model_output(&value),
            Ok(None) => debug!("Classification model returned no output, using heuristics"),
            Err(err) => error!(error = %err, "Classification via language model failed, using heuristics"),
        }
    }

    let text = turns
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    heuristics::classify(text.trim())
}
