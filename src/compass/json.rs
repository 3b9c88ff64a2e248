//! JSON decoding for Compass response bodies.
//!
//! Compass occasionally answers with an empty body, a bare `null`, or an HTML
//! error page under a 200 status. All of these are reported as decode errors
//! so the caller can treat them as a malformed (retryable) response.

use anyhow::{Result, anyhow, bail};
use serde::de::DeserializeOwned;

/// Decode a response body, rejecting blank and `null` bodies outright.
///
/// On a serde failure the error names the JSON path, the expected/actual
/// types and a snippet of the offending line.
pub fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        bail!("empty response body");
    }
    if trimmed == "null" {
        bail!("response body was null");
    }

    let de = &mut serde_json::Deserializer::from_str(trimmed);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let msg = inner.to_string();
        let loc = format!(" at line {line} column {column}");
        let reason = describe_mismatch(msg.strip_suffix(&loc).unwrap_or(&msg));
        let snippet = snippet_around(trimmed, line, column, 20);

        if path.is_empty() || path == "." {
            anyhow!("{reason} (line {line} col {column})\n{snippet}")
        } else {
            anyhow!("at path '{path}': {reason} (line {line} col {column})\n{snippet}")
        }
    })
}

/// Rewrite "invalid type: X, expected Y" into "expected Y, got X".
fn describe_mismatch(error_msg: &str) -> String {
    if let Some(rest) = error_msg.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {}, got {}", expected.trim(), actual);
    }
    error_msg.to_string()
}

fn snippet_around(body: &str, line: usize, column: usize, context_len: usize) -> String {
    let target = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if target.is_empty() {
        return "(empty line)".to_string();
    }

    // serde columns are 1-based; clamp onto char boundaries so HTML bodies
    // with multibyte text cannot panic the slice
    let error_idx = column.saturating_sub(1).min(target.len());
    let half = context_len / 2;
    let mut start = error_idx.saturating_sub(half);
    while !target.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (error_idx + half).min(target.len());
    while !target.is_char_boundary(end) {
        end += 1;
    }

    let indicator = " ".repeat(error_idx - start) + "^";
    format!("...{}...\n   {indicator}", &target[start..end])
}
