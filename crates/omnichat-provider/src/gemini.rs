//! Google Gemini chat adapter.
//!
//! Gemini has no system role, so the instruction is folded into the newest
//! message. When that message carries an image the request is a single turn:
//! history is not replayed alongside an image.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, Instrument};

use crate::error::{ProviderError, ProviderResult};
use crate::message::{ChatMessage, Role};
use crate::options::ChatOptions;
use crate::session::AnswerSession;
use crate::transport::{http_client, reported_from_body, sse, Flow};

const PROVIDER: &str = "Gemini";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-pro";

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub async fn chat(options: ChatOptions) {
    let session = options.session();
    let result = stream_chat(&options, &session)
        .instrument(options.span())
        .await;
    session.finish(result);
}

fn role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        Role::System | Role::User | Role::Tool => "user",
    }
}

async fn build_contents(
    options: &ChatOptions,
    history: &[ChatMessage],
) -> ProviderResult<Vec<Value>> {
    let attached = history
        .last()
        .and_then(|m| m.image.as_deref().map(|path| (m, path)));
    if let Some((last, path)) = attached {
        let data = options.files.read_base64(path).await?;
        debug!("Image attached, sending a single turn");
        return Ok(vec![json!({
            "role": "user",
            "parts": [
                {"text": last.content},
                {"inline_data": {"mime_type": "image/jpeg", "data": data}},
            ],
        })]);
    }

    Ok(history
        .iter()
        .map(|m| json!({"role": role(m.role), "parts": [{"text": m.content}]}))
        .collect())
}

async fn stream_chat(options: &ChatOptions, session: &AnswerSession) -> ProviderResult<()> {
    let api_key = options.credentials.require_api_key(PROVIDER)?;
    let abort = options.abort_token();
    let base_url = options.credentials.base_url_or(DEFAULT_BASE_URL);
    let model = options.model_or(DEFAULT_MODEL);

    let history = options.prepared_history_inline(session);
    let contents = build_contents(options, &history).await?;

    let safety_settings: Vec<Value> = SAFETY_CATEGORIES
        .iter()
        .map(|category| json!({"category": category, "threshold": "BLOCK_NONE"}))
        .collect();
    let mut body = json!({
        "contents": contents,
        "safetySettings": safety_settings,
    });
    if let Some(max) = options.max_tokens {
        body["generationConfig"] = json!({"maxOutputTokens": max});
    }

    let url = format!(
        "{base_url}/models/{model}:streamGenerateContent?key={}&alt=sse",
        urlencoding::encode(api_key)
    );
    debug!(model, turns = contents.len(), "Sending Gemini request");
    let stream = sse::open(http_client().post(url).json(&body), &abort, PROVIDER)
        .await
        .map_err(|e| reported_from_body(e, &["/error/message", "/0/error/message"]))?;
    session.start();

    sse::for_each_event(stream, &abort, |event| {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(Flow::Continue);
        }
        let chunk: StreamChunk =
            serde_json::from_str(data).map_err(|_| ProviderError::malformed(data))?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::reported(error.message));
        }
        if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ProviderError::ContentFiltered { reason });
        }
        let text = chunk
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.first())
            .and_then(|p| p.text.as_deref());
        if let Some(text) = text {
            session.append(text);
        }
        Ok(Flow::Continue)
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles() {
        assert_eq!(role(Role::Assistant), "model");
        assert_eq!(role(Role::User), "user");
    }

    #[test]
    fn test_block_reason_parsing() {
        let chunk: StreamChunk =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert_eq!(
            chunk.prompt_feedback.unwrap().block_reason.as_deref(),
            Some("SAFETY")
        );
    }

    #[test]
    fn test_candidate_text() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello"}],"role":"model"}}]}"#,
        )
        .unwrap();
        let content = chunk.candidates[0].content.as_ref().unwrap();
        assert_eq!(content.parts[0].text.as_deref(), Some("Hello"));
    }
}
