//! Wire bodies and conversation fixtures.

use omnichat_provider::{ChatMessage, ChatPlugin, ParameterKind, PluginParameter};
use serde_json::{json, Value};

/// An SSE body with one `data:` event per payload.
pub fn sse_body<I, S>(payloads: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    payloads
        .into_iter()
        .map(|p| format!("data: {}\n\n", p.as_ref()))
        .collect()
}

/// An SSE body of JSON payloads.
pub fn sse_json(payloads: &[Value]) -> String {
    sse_body(payloads.iter().map(Value::to_string))
}

/// A newline-delimited JSON body.
pub fn ndjson_body(lines: &[Value]) -> String {
    lines.iter().map(|l| format!("{l}\n")).collect()
}

/// One OpenAI chat completions stream chunk carrying `content`.
pub fn openai_chunk(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}],
    })
}

/// An OpenAI stream answering with `parts`, terminated by `[DONE]`.
pub fn openai_stream(parts: &[&str]) -> String {
    let mut body = sse_json(&parts.iter().map(|p| openai_chunk(p)).collect::<Vec<_>>());
    body.push_str("data: [DONE]\n\n");
    body
}

/// A history of `turns` question/answer pairs followed by a final question.
pub fn conversation(turns: usize, last_question: &str) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = (0..turns)
        .flat_map(|i| {
            [
                ChatMessage::user(format!("question {i}")),
                ChatMessage::assistant(format!("answer {i}")),
            ]
        })
        .collect();
    messages.push(ChatMessage::user(last_question));
    messages
}

/// A weather plugin taking a `city` string.
pub fn weather_plugin() -> ChatPlugin {
    ChatPlugin {
        id: "get_weather".to_string(),
        name: "Weather".to_string(),
        description: "Current weather for a city".to_string(),
        code: "`Sunny in ${params.city}`".to_string(),
        parameters: vec![PluginParameter {
            name: "city".to_string(),
            kind: ParameterKind::String,
            description: "City name".to_string(),
        }],
    }
}

/// An assistant message selecting `tool` with `arguments`.
pub fn tool_call_message(call_id: &str, tool: &str, arguments: Value) -> Value {
    json!({
        "role": "assistant",
        "content": null,
        "tool_calls": [{
            "id": call_id,
            "type": "function",
            "function": {"name": tool, "arguments": arguments.to_string()},
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_body() {
        assert_eq!(sse_body(["a", "b"]), "data: a\n\ndata: b\n\n");
    }

    #[test]
    fn test_openai_stream_ends_with_done() {
        let body = openai_stream(&["Hi"]);
        assert!(body.ends_with("data: [DONE]\n\n"));
        assert!(body.contains(r#""content":"Hi""#));
    }

    #[test]
    fn test_conversation_shape() {
        let messages = conversation(2, "now?");
        assert_eq!(messages.len(), 5);
        assert_eq!(messages.last().unwrap().content, "now?");
    }
}
