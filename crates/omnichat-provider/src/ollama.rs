//! Ollama chat adapter.
//!
//! Talks to a local server over `/api/chat`, which streams one JSON object
//! per line. No credentials are needed.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, Instrument};

use crate::error::{ProviderError, ProviderResult};
use crate::options::ChatOptions;
use crate::session::AnswerSession;
use crate::transport::{self, cancellable, http_client, ndjson, reported_from_body, Flow};

const PROVIDER: &str = "Ollama";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL: &str = "llama3";

pub async fn chat(options: ChatOptions) {
    let session = options.session();
    let result = stream_chat(&options, &session)
        .instrument(options.span())
        .await;
    session.finish(result);
}

async fn stream_chat(options: &ChatOptions, session: &AnswerSession) -> ProviderResult<()> {
    let abort = options.abort_token();
    let base_url = options.credentials.base_url_or(DEFAULT_BASE_URL);
    let model = options.model_or(DEFAULT_MODEL);

    let history = options.prepared_history(session);
    let mut messages: Vec<Value> = Vec::with_capacity(history.len() + 1);
    if options.has_instruction() {
        messages.push(json!({"role": "system", "content": options.instruction}));
    }
    for message in &history {
        let mut wire = json!({"role": message.role.as_str(), "content": message.content});
        if let Some(path) = message.image.as_deref() {
            let data = options.files.read_base64(path).await?;
            wire["images"] = json!([data]);
        }
        messages.push(wire);
    }

    let mut body = json!({"model": model, "messages": messages, "stream": true});
    if let Some(max) = options.max_tokens {
        body["options"] = json!({"num_predict": max});
    }

    debug!(model, messages = history.len(), "Sending Ollama chat request");
    let request = http_client()
        .post(format!("{base_url}/api/chat"))
        .json(&body);
    let response = cancellable(&abort, async {
        transport::expect_success(request.send().await?, PROVIDER).await
    })
    .await
    .map_err(|e| reported_from_body(e, &["/error"]))?;
    session.start();

    ndjson::for_each_line(response, &abort, |line| {
        let chunk: ChatLine =
            serde_json::from_str(line).map_err(|_| ProviderError::malformed(line))?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::reported(error));
        }
        if let Some(message) = &chunk.message {
            session.append(&message.content);
        }
        Ok(if chunk.done { Flow::Stop } else { Flow::Continue })
    })
    .await
}

#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<LineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LineMessage {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_parsing() {
        let line: ChatLine = serde_json::from_str(
            r#"{"model":"llama3","message":{"role":"assistant","content":"Hel"},"done":false}"#,
        )
        .unwrap();
        assert_eq!(line.message.unwrap().content, "Hel");
        assert!(!line.done);

        let line: ChatLine = serde_json::from_str(r#"{"error":"model 'x' not found"}"#).unwrap();
        assert_eq!(line.error.as_deref(), Some("model 'x' not found"));
    }
}
