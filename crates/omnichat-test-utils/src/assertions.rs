//! Assertion helpers for event sequences and request bodies.

use omnichat_provider::{AnswerEvent, DrawingEvent};
use serde_json::Value;

/// Assert the chat event discipline: at most one `start`, every `append`
/// after it, at most one `end`, and nothing after `end`. Context-shrink
/// notices may come at any point before `end`.
pub fn assert_answer_discipline(events: &[AnswerEvent]) {
    let mut started = false;
    let mut ended = false;
    for (i, event) in events.iter().enumerate() {
        assert!(!ended, "event #{i} after end: {event:?}\nall events: {events:#?}");
        match event {
            AnswerEvent::Start { .. } => {
                assert!(!started, "second start at #{i}\nall events: {events:#?}");
                started = true;
            }
            AnswerEvent::Append { delta, .. } => {
                assert!(started, "append before start at #{i}\nall events: {events:#?}");
                assert!(!delta.is_empty(), "empty delta at #{i}");
            }
            AnswerEvent::ContextShrunk { .. } => {}
            AnswerEvent::End { .. } => ended = true,
        }
    }
}

/// Assert the drawing event discipline: at most one `image_generated`, then
/// exactly one `end` if anything was delivered.
pub fn assert_drawing_discipline(events: &[DrawingEvent]) {
    let mut delivered = false;
    let mut ended = false;
    for (i, event) in events.iter().enumerate() {
        assert!(!ended, "event #{i} after end: {event:?}");
        match event {
            DrawingEvent::ImageGenerated { .. } => {
                assert!(!delivered, "second image_generated at #{i}");
                delivered = true;
            }
            DrawingEvent::End { error, .. } => {
                assert!(
                    !(delivered && error.is_some()),
                    "end with error after images were delivered"
                );
                ended = true;
            }
        }
    }
    if delivered {
        assert!(ended, "images delivered without end");
    }
}

/// Assert that two strings are equal, with a nice diff on failure.
pub fn assert_strings_equal(actual: &str, expected: &str) {
    if actual != expected {
        let diff = similar::TextDiff::from_lines(expected, actual);
        let mut output = String::new();

        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                similar::ChangeTag::Delete => "-",
                similar::ChangeTag::Insert => "+",
                similar::ChangeTag::Equal => " ",
            };
            output.push_str(&format!("{}{}", sign, change));
        }

        panic!("Strings are not equal.\nDiff:\n{}", output);
    }
}

/// Assert that two JSON values are equal, diffing their pretty forms.
pub fn assert_json_equal(actual: &Value, expected: &Value) {
    let pretty = |v: &Value| serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string());
    assert_strings_equal(&pretty(actual), &pretty(expected));
}

/// The `role` field of each message in a chat request body.
pub fn message_roles(messages: &Value) -> Vec<String> {
    messages
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|m| m.get("role").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
