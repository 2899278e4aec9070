//! SSE line normalization.
//!
//! Some OpenAI-compatible upstreams emit `data:{...}` without the space the
//! SSE consumers downstream expect, and stream `tool_calls` deltas without the
//! `index` field used to aggregate them across chunks. Both are repaired here,
//! one line at a time, without any state.

use std::borrow::Cow;

const DATA_PREFIX: &str = "data:";
const TOOL_CALLS_MARKER: &str = "tool_calls";
const TOOL_CALLS_KEY: &str = "\"tool_calls\"";
const INDEX_KEY: &str = "\"index\"";
const INDEX_FIELD: &str = "\"index\":0,";

/// Normalize an optional line. `None` passes through as `None`.
pub fn normalize(line: Option<&str>) -> Option<Cow<'_, str>> {
    line.map(normalize_line)
}

/// Normalize a single SSE line.
///
/// - `data:{...}` becomes `data: {...}`; lines already spaced and non-data lines
///   (`event:`, `id:`, `retry:`, comments, blank lines) are untouched.
/// - A tool-call object whose first field is `"id"` or `"type"` gets
///   `"index":0,` inserted in front of it, unless the line already carries an
///   `"index"` field somewhere.
///
/// Borrows the input when nothing changes. Applying it twice is the same as
/// applying it once.
pub fn normalize_line(line: &str) -> Cow<'_, str> {
    let spaced = fix_data_spacing(line);
    match inject_tool_call_index(&spaced) {
        Some(indexed) => Cow::Owned(indexed),
        None => spaced,
    }
}

/// Whether the line mentions `tool_calls` at all.
pub fn contains_tool_calls(line: &str) -> bool {
    line.contains(TOOL_CALLS_MARKER)
}

fn fix_data_spacing(line: &str) -> Cow<'_, str> {
    match line.strip_prefix(DATA_PREFIX) {
        Some(rest) if !rest.starts_with(' ') => Cow::Owned(format!("{DATA_PREFIX} {rest}")),
        _ => Cow::Borrowed(line),
    }
}

/// Returns the rewritten line, or `None` when no insertion is needed.
fn inject_tool_call_index(line: &str) -> Option<String> {
    if !contains_tool_calls(line) || line.contains(INDEX_KEY) {
        return None;
    }

    let insert_at: Vec<usize> = line
        .match_indices(TOOL_CALLS_KEY)
        .filter_map(|(pos, key)| first_field_offset(line, pos + key.len()))
        .collect();
    if insert_at.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(line.len() + insert_at.len() * INDEX_FIELD.len());
    let mut last = 0;
    for pos in insert_at {
        out.push_str(&line[last..pos]);
        out.push_str(INDEX_FIELD);
        last = pos;
    }
    out.push_str(&line[last..]);
    Some(out)
}

/// Starting right after a `"tool_calls"` key, walk `: [ {` (whitespace allowed)
/// and return the offset of the first object field if it is `"id"` or `"type"`.
fn first_field_offset(line: &str, after_key: usize) -> Option<usize> {
    let mut pos = after_key;
    for expected in [':', '[', '{'] {
        pos = skip_whitespace(line, pos);
        if !line[pos..].starts_with(expected) {
            return None;
        }
        pos += expected.len_utf8();
    }
    pos = skip_whitespace(line, pos);

    let rest = &line[pos..];
    (rest.starts_with("\"id\"") || rest.starts_with("\"type\"")).then_some(pos)
}

fn skip_whitespace(line: &str, pos: usize) -> usize {
    let trimmed = line[pos..].trim_start_matches([' ', '\t']);
    line.len() - trimmed.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_spacing_table() {
        let cases = [
            // Missing space after the colon
            (r#"data:{"id":"123"}"#, r#"data: {"id":"123"}"#),
            ("data:[DONE]", "data: [DONE]"),
            ("data:test", "data: test"),
            // Already spaced
            (r#"data: {"id":"123"}"#, r#"data: {"id":"123"}"#),
            ("data: [DONE]", "data: [DONE]"),
            ("data: test", "data: test"),
            // Not a data line
            (":comment line", ":comment line"),
            ("event: message", "event: message"),
            ("", ""),
            ("id: 12345", "id: 12345"),
            ("retry: 1000", "retry: 1000"),
        ];

        for (input, expected) in cases {
            assert_eq!(normalize_line(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_normalize_none() {
        assert!(normalize(None).is_none());
        assert_eq!(normalize(Some("data:x")).as_deref(), Some("data: x"));
    }

    #[test]
    fn test_unchanged_line_is_borrowed() {
        assert!(matches!(normalize_line("data: ok"), Cow::Borrowed(_)));
        assert!(matches!(normalize_line("event: ping"), Cow::Borrowed(_)));
        assert!(matches!(normalize_line("data:ok"), Cow::Owned(_)));
    }

    #[test]
    fn test_complex_json_keeps_choice_index() {
        let input = r#"data:{"id":"chatcmpl-123","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#;
        let expected = r#"data: {"id":"chatcmpl-123","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#;
        assert_eq!(normalize_line(input), expected);
    }

    #[test]
    fn test_adds_index_before_id() {
        let input = r#"data: {"choices":[{"delta":{"tool_calls":[{"id":"call-123","type":"function","function":{"name":"t"}}]}}]}"#;
        let result = normalize_line(input);
        assert!(result.contains(r#""index":0,"id":"call-123""#));
        assert_eq!(result.matches(r#""index":"#).count(), 1);
    }

    #[test]
    fn test_adds_index_before_type() {
        let input = r#"data: {"choices":[{"delta":{"tool_calls":[{"type":"function","id":"call-123"}]}}]}"#;
        let result = normalize_line(input);
        assert!(result.contains(r#""tool_calls":[{"index":0,"type":"function""#));
    }

    #[test]
    fn test_adds_index_with_whitespace() {
        let input = r#"data: {"tool_calls": [ {"id":"a"}]}"#;
        assert_eq!(
            normalize_line(input),
            r#"data: {"tool_calls": [ {"index":0,"id":"a"}]}"#
        );
    }

    #[test]
    fn test_existing_index_not_duplicated() {
        let input = r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call-123","type":"function"}]}}]}"#;
        let result = normalize_line(input);
        assert_eq!(result, input);
        assert_eq!(result.matches(r#""index":"#).count(), 1);
    }

    #[test]
    fn test_index_elsewhere_blocks_insertion() {
        let input = r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"id":"c"}]}}]}"#;
        assert_eq!(normalize_line(input), input);
    }

    #[test]
    fn test_tool_call_argument_delta_untouched() {
        // Continuation deltas carry only function arguments.
        let input = r#"data: {"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"{\"a\""}}]}}]}"#;
        assert_eq!(normalize_line(input), input);
    }

    #[test]
    fn test_non_tool_call_line_unchanged() {
        let input = r#"data: {"choices":[{"delta":{"content":"Hello world"}}]}"#;
        assert_eq!(normalize_line(input), input);
    }

    #[test]
    fn test_combined_normalization() {
        let input = r#"data:{"choices":[{"delta":{"tool_calls":[{"id":"call-123","type":"function"}]}}]}"#;
        let result = normalize_line(input);
        assert!(result.starts_with("data: "));
        assert!(result.contains(r#""index":0,"id":"call-123""#));
        assert_eq!(normalize_line(&result), result);
    }

    #[test]
    fn test_multiple_tool_call_arrays_each_indexed() {
        let input = r#"{"a":{"tool_calls":[{"id":"x"}]},"b":{"tool_calls":[{"type":"function"}]}}"#;
        let result = normalize_line(input);
        assert_eq!(result.matches(r#""index":0,"#).count(), 2);
    }

    #[test]
    fn test_contains_tool_calls() {
        assert!(contains_tool_calls(r#"{"tool_calls":[]}"#));
        assert!(!contains_tool_calls(r#"{"content":"hi"}"#));
    }
}
