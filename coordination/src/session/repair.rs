//! Recovery of near-miss JSON replies.
//!
//! Applied in order before parsing:
//!
//! 1. slice from the first `{` to its matching `}` unless the payload is
//!    already one clean object
//! 2. collapse newlines to spaces
//! 3. `"tool_calls": []` becomes `"tool_calls":""`
//! 4. bare `FAILTOUNDERSTAND` / `OKIDOKI` values get quoted

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::contract::QuestionResponse;

static EMPTY_TOOL_CALLS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""tool_calls"\s*:\s*\[\s*\]"#).expect("EMPTY_TOOL_CALLS_RE regex should compile")
});

/// A JSON key followed by one of the literals models forget to quote.
static BARE_LITERAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"("[A-Za-z_][A-Za-z0-9_]*")\s*:\s*(FAILTOUNDERSTAND|OKIDOKI)\b"#)
        .expect("BARE_LITERAL_RE regex should compile")
});

/// Byte offset of the `}` matching the `{` at `open`, honouring strings.
fn matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[open..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Step 1: isolate the object.
fn slice_object(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find('{') else {
        return trimmed;
    };
    match matching_brace(trimmed, open) {
        Some(close) => &trimmed[open..=close],
        // Unbalanced: fall back to the last closing brace, if any.
        None => match trimmed.rfind('}') {
            Some(close) if close > open => &trimmed[open..=close],
            _ => &trimmed[open..],
        },
    }
}

/// Run the four repair steps over a raw backend reply.
pub fn repair_reply(raw: &str) -> String {
    let sliced = slice_object(raw);
    let single_line = sliced.replace(['\r', '\n'], " ");
    let tool_calls_fixed = EMPTY_TOOL_CALLS_RE.replace_all(&single_line, r#""tool_calls":"""#);
    BARE_LITERAL_RE
        .replace_all(&tool_calls_fixed, r#"${1}:"${2}""#)
        .into_owned()
}

#[derive(Debug, Deserialize)]
struct WireReply {
    response: Option<Value>,
    probability: Option<Value>,
    motivation: Option<Value>,
    assumptions_made: Option<Value>,
    tool_calls: Option<Value>,
}

/// Textual view of a loosely typed field. `null` counts as absent.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(text_of)
                .collect::<Vec<_>>()
                .join("; "),
        ),
        other => Some(other.to_string()),
    }
}

/// Integer or numeric string (`"80"`, `"80%"`), clamped to 0–100.
fn probability_of(value: &Value) -> Option<u8> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !number.is_finite() {
        return None;
    }
    Some(number.round().clamp(0.0, 100.0) as u8)
}

/// Parse an already repaired reply. Unknown fields are ignored; a missing
/// `response`, `probability`, `motivation` or `assumptions_made` rejects it.
pub fn parse_reply(text: &str) -> Option<QuestionResponse> {
    let wire: WireReply = serde_json::from_str(text).ok()?;
    let response = text_of(wire.response.as_ref()?)?;
    let probability = probability_of(wire.probability.as_ref()?)?;
    let motivation = text_of(wire.motivation.as_ref()?)?;
    let assumptions_made = text_of(wire.assumptions_made.as_ref()?)?;
    let tool_calls = wire.tool_calls.as_ref().and_then(text_of).unwrap_or_default();

    Some(
        QuestionResponse::new(response, probability, motivation, assumptions_made)
            .with_tool_calls(tool_calls),
    )
}

/// Repair then parse.
pub fn decode_reply(raw: &str) -> Option<QuestionResponse> {
    parse_reply(&repair_reply(raw))
}
