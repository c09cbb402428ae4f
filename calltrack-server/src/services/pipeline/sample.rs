//! Capped conversation samples for language-model prompts

use crate::models::{SpeakerRole, Turn};

/// Size limits for a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCaps {
    pub max_lines: usize,
    pub max_chars: usize,
    pub per_line: usize,
}

/// Sample used to decide speaker roles
pub const ROLE_SAMPLE: SampleCaps = SampleCaps {
    max_lines: 60,
    max_chars: 2500,
    per_line: 200,
};

/// Role-labeled sample used for classification
pub const LABELED_SAMPLE: SampleCaps = SampleCaps {
    max_lines: 80,
    max_chars: 3000,
    per_line: 220,
};

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join `label: text` lines within the caps
///
/// Lines are whitespace-normalized and cut to `per_line` characters. When the
/// joined text is too long it is cut to `max_chars` and then back to the
/// last complete line.
pub fn build<'a, I>(lines: I, caps: SampleCaps) -> String
where
    I: IntoIterator<Item = (String, &'a str)>,
{
    let mut out: Vec<String> = Vec::new();
    for (label, text) in lines {
        let text: String = normalize_whitespace(text).chars().take(caps.per_line).collect();
        if text.is_empty() {
            continue;
        }
        out.push(format!("{}: {}", label, text));
        if out.len() >= caps.max_lines {
            break;
        }
    }

    let joined = out.join("\n");
    if joined.chars().count() <= caps.max_chars {
        return joined;
    }

    let mut cut: String = joined.chars().take(caps.max_chars).collect();
    if let Some(idx) = cut.rfind('\n') {
        if idx > 0 {
            cut.truncate(idx);
        }
    }
    cut
}

/// `speaker0: ...` / `speaker1: ...` lines in call order
pub fn speaker_sample(turns: &[Turn]) -> String {
    build(
        turns.iter().filter_map(|t| match t.speaker {
            Some(s @ (0 | 1)) => Some((format!("speaker{}", s), t.text.as_str())),
            _ => None,
        }),
        ROLE_SAMPLE,
    )
}

/// Lines labeled by role, falling back to the speaker index
pub fn labeled_sample(turns: &[Turn]) -> String {
    build(
        turns.iter().map(|t| {
            let label = match (t.role, t.speaker) {
                (SpeakerRole::Salesperson, _) => "salesperson".to_string(),
                (SpeakerRole::Client, _) => "client".to_string(),
                (_, Some(s @ (0 | 1))) => format!("speaker{}", s),
                _ => "speaker".to_string(),
            };
            (label, t.text.as_str())
        }),
        LABELED_SAMPLE,
    )
}
