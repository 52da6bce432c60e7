//! Line parser for OpenAI-compatible SSE streams.

use crate::{Error, Result};

/// One parsed event from the provider stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseChunk {
    /// A content delta.
    Content(String),
    /// Raw JSON array of tool-call deltas, merged by the caller.
    ToolCallDelta(String),
    /// The provider reported a finish reason for the choice.
    Finish(String),
    /// `[DONE]` marker.
    Done,
}

/// Parse one raw SSE line. Returns `None` for keep-alives, comments and
/// lines without a recognized delta.
pub fn parse_sse_line(line: &str) -> Result<Option<SseChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let data = match line.strip_prefix("data: ") {
        Some(d) => d.trim(),
        None => return Ok(None),
    };

    if data == "[DONE]" {
        return Ok(Some(SseChunk::Done));
    }

    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| Error::Internal(format!("sse parse: {e}")))?;

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(None);
    };
    let delta = &first["delta"];

    if let Some(tool_calls) = delta["tool_calls"].as_array() {
        if !tool_calls.is_empty() {
            let raw = serde_json::to_string(tool_calls)
                .map_err(|e| Error::Internal(format!("sse parse: {e}")))?;
            return Ok(Some(SseChunk::ToolCallDelta(raw)));
        }
    }

    if let Some(content) = delta["content"].as_str() {
        if !content.is_empty() {
            return Ok(Some(SseChunk::Content(content.to_string())));
        }
    }

    if let Some(reason) = first["finish_reason"].as_str() {
        return Ok(Some(SseChunk::Finish(reason.to_string())));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_keepalives_and_comments() {
        assert_eq!(parse_sse_line("").unwrap(), None);
        assert_eq!(parse_sse_line(": ping").unwrap(), None);
        assert_eq!(parse_sse_line("event: message").unwrap(), None);
    }

    #[test]
    fn parses_done_marker() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), Some(SseChunk::Done));
    }

    #[test]
    fn parses_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            Some(SseChunk::Content("Hel".into()))
        );
    }

    #[test]
    fn parses_tool_call_delta() {
        let line = r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"navigate","arguments":""}}]}}]}"#;
        match parse_sse_line(line).unwrap() {
            Some(SseChunk::ToolCallDelta(raw)) => assert!(raw.contains("navigate")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_finish_reason() {
        let line = r#"data: {"choices":[{"delta":{},"finish_reason":"length"}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            Some(SseChunk::Finish("length".into()))
        );
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_sse_line("data: {oops").is_err());
    }
}
