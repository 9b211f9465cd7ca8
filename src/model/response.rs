//! Parsing structured answers out of free-form model text.
//!
//! Models wrap JSON in prose or code fences. [`extract_json`] tries, in
//! order: the raw text, a ```` ```json ```` block, any fenced block, and
//! finally the first balanced `{...}` or `[...]` span.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::pipeline::truncate_chars;

/// Characters of the original text kept in error previews.
const PREVIEW_CHARS: usize = 100;

/// A model answer that did not contain the expected JSON.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid model response: {message}")]
pub struct InvalidResponse {
    /// What was wrong, with a short preview of the text.
    pub message: String,
}

/// Find and parse the JSON value embedded in `text`.
///
/// # Errors
///
/// Returns [`InvalidResponse`] if no candidate span parses.
pub fn extract_json(text: &str) -> Result<serde_json::Value, InvalidResponse> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let candidate = code_block(trimmed, "```json")
        .or_else(|| code_block(trimmed, "```"))
        .or_else(|| balanced(trimmed, '{', '}'))
        .or_else(|| balanced(trimmed, '[', ']'));

    match candidate {
        Some(json) => serde_json::from_str(json).map_err(|e| InvalidResponse {
            message: format!(
                "failed to parse JSON: {e}. Preview: {}",
                preview(text)
            ),
        }),
        None => Err(InvalidResponse {
            message: format!("no JSON found in response: {}", preview(text)),
        }),
    }
}

/// Extract and decode a typed answer.
///
/// # Errors
///
/// Returns [`InvalidResponse`] if no JSON is found or it has the wrong shape.
pub fn parse_response<T: DeserializeOwned>(text: &str) -> Result<T, InvalidResponse> {
    let value = extract_json(text)?;
    serde_json::from_value(value).map_err(|e| InvalidResponse {
        message: format!("unexpected JSON shape: {e}"),
    })
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        format!("{}...", truncate_chars(text, PREVIEW_CHARS))
    }
}

fn code_block<'a>(text: &'a str, fence: &str) -> Option<&'a str> {
    let start = text.find(fence)? + fence.len();
    let remaining = text[start..].trim_start();
    let end = remaining.find("```")?;
    let body = remaining[..end].trim();
    (!body.is_empty()).then_some(body)
}

fn balanced(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if !in_string && c == open => depth += 1,
            c if !in_string && c == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
