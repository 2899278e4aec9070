//! Property-based tests for SSE line normalization.

use proptest::prelude::*;
use sse_proxy::sse::{normalize, normalize_line};

/// Arbitrary JSON-ish payload without line breaks.
fn arb_payload() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9{}\\[\\]\":,_ .-]{0,60}"
}

/// A streamed tool-call delta, with or without an `index`.
fn arb_tool_call_line() -> impl Strategy<Value = String> {
    (
        prop::option::of(0u32..8),
        prop_oneof![Just("id"), Just("type")],
        "[a-z0-9_-]{1,16}",
        any::<bool>(),
    )
        .prop_map(|(index, first, value, spaced)| {
            let index = index.map_or(String::new(), |i| format!("\"index\":{i},"));
            let prefix = if spaced { "data: " } else { "data:" };
            format!(
                r#"{prefix}{{"choices":[{{"delta":{{"tool_calls":[{{{index}"{first}":"{value}"}}]}}}}]}}"#
            )
        })
}

fn count(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

proptest! {
    #[test]
    fn normalize_is_idempotent(line in "\\PC{0,80}") {
        let once = normalize_line(&line).into_owned();
        let twice = normalize_line(&once).into_owned();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn tool_call_lines_are_idempotent(line in arb_tool_call_line()) {
        let once = normalize_line(&line).into_owned();
        prop_assert_eq!(normalize_line(&once).into_owned(), once);
    }

    #[test]
    fn non_data_lines_pass_through(line in "\\PC{0,80}") {
        prop_assume!(!line.starts_with("data:") && !line.contains("tool_calls"));
        prop_assert_eq!(normalize_line(&line), line.as_str());
    }

    #[test]
    fn data_lines_gain_space(payload in arb_payload()) {
        let line = format!("data:{payload}");
        prop_assert!(normalize_line(&line).starts_with("data: "));
    }

    #[test]
    fn spaced_data_lines_unchanged(payload in arb_payload()) {
        prop_assume!(!payload.contains("tool_calls"));
        let line = format!("data: {payload}");
        prop_assert_eq!(normalize_line(&line), line.as_str());
    }

    #[test]
    fn tool_calls_end_with_single_index(line in arb_tool_call_line()) {
        let normalized = normalize_line(&line);
        prop_assert_eq!(count(&normalized, "\"index\":"), 1);
        prop_assert!(normalized.starts_with("data: "));
    }

    #[test]
    fn optional_wrapper_matches_core(line in "\\PC{0,80}") {
        let wrapped = normalize(Some(&line)).map(|c| c.into_owned());
        prop_assert_eq!(wrapped, Some(normalize_line(&line).into_owned()));
    }
}

#[test]
fn none_stays_none() {
    assert!(normalize(None).is_none());
}
