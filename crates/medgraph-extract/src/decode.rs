//! Two-stage decoding of text-generation responses.
//!
//! The service gives no guarantee of returning well-formed structured
//! data: payloads arrive wrapped in code fences or surrounded by
//! commentary. Decoding is split into an extraction step that locates a
//! candidate JSON substring by a documented heuristic, and a strict serde
//! decode that fails with a distinct `MalformedResponse` error. A
//! malformed payload is a content fault, not a transport fault, and is
//! never retried.

use serde::de::DeserializeOwned;

use medgraph_core::{PipelineError, Result};

/// Locate the candidate JSON payload inside raw response text.
///
/// Heuristic: strip a surrounding ```-fence if present; otherwise take the
/// span from the first `{` or `[` (whichever comes first) to the last
/// matching `}` or `]`.
pub fn extract_payload(raw: &str) -> Result<&str> {
    let trimmed = raw.trim();

    if let Some(fenced) = strip_fence(trimmed) {
        return Ok(fenced);
    }

    let object_start = trimmed.find('{');
    let array_start = trimmed.find('[');

    let (start, close) = match (object_start, array_start) {
        (Some(o), Some(a)) if a < o => (a, ']'),
        (Some(o), _) => (o, '}'),
        (None, Some(a)) => (a, ']'),
        (None, None) => {
            return Err(PipelineError::MalformedResponse(
                "no JSON payload found in response".to_string(),
            ))
        }
    };

    let end = trimmed.rfind(close).ok_or_else(|| {
        PipelineError::MalformedResponse(format!("unterminated JSON payload, missing `{close}`"))
    })?;

    if end < start {
        return Err(PipelineError::MalformedResponse(
            "unterminated JSON payload".to_string(),
        ));
    }

    Ok(&trimmed[start..=end])
}

fn strip_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    // Opening fence may carry a language tag ("```json")
    let body_start = rest.find('\n')? + 1;
    let body = &rest[body_start..];
    let body = body.strip_suffix("```")?;
    Some(body.trim())
}

/// Extract and strictly decode the payload into `T`.
pub fn decode_payload<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let payload = extract_payload(raw)?;
    serde_json::from_str(payload)
        .map_err(|e| PipelineError::MalformedResponse(format!("JSON decode failed: {e}")))
}
