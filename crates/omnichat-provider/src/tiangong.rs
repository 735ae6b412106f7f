//! Kunlun Tiangong (SkyChat) chat adapter.
//!
//! Requests are authenticated with the app key, a timestamp and an MD5 sign
//! over key, secret and timestamp. The answer streams as one JSON object per
//! line.

use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, Instrument};

use crate::error::{ProviderError, ProviderResult};
use crate::message::Role;
use crate::options::ChatOptions;
use crate::session::AnswerSession;
use crate::transport::{self, cancellable, http_client, ndjson, reported_from_body, Flow};

const PROVIDER: &str = "Tiangong";
pub const DEFAULT_BASE_URL: &str = "https://sky-api.singularity-ai.com";
const DEFAULT_MODEL: &str = "SkyChat-MegaVerse";
const GENERATE_LENGTH: u32 = 2048;

pub async fn chat(options: ChatOptions) {
    let session = options.session();
    let result = stream_chat(&options, &session)
        .instrument(options.span())
        .await;
    session.finish(result);
}

/// `md5_hex(app_key + app_secret + timestamp)`.
pub fn sign(app_key: &str, app_secret: &str, timestamp: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(app_key.as_bytes());
    hasher.update(app_secret.as_bytes());
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

fn role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "bot",
        other => other.as_str(),
    }
}

async fn stream_chat(options: &ChatOptions, session: &AnswerSession) -> ProviderResult<()> {
    let app_key = options.credentials.require_api_key(PROVIDER)?;
    let app_secret = options.credentials.require_secret_key(PROVIDER)?;
    let abort = options.abort_token();
    let base_url = options.credentials.base_url_or(DEFAULT_BASE_URL);
    let model = options.model_or(DEFAULT_MODEL);

    let history = options.prepared_history(session);
    let mut messages: Vec<Value> = Vec::with_capacity(history.len() + 1);
    if options.has_instruction() {
        messages.push(json!({"role": "system", "content": options.instruction}));
    }
    messages.extend(
        history
            .iter()
            .map(|m| json!({"role": role(m.role), "content": m.content})),
    );

    let body = json!({
        "messages": messages,
        "model": model,
        "param": {
            "generate_length": options.max_tokens.unwrap_or(GENERATE_LENGTH),
            "top_p": 1,
            "top_k": 3,
            "repetition_penalty": 1.0,
            "length_penalty": 1.0,
            "min_len": 2,
            "temperature": 0.66,
        },
    });

    let timestamp = chrono::Utc::now().timestamp().to_string();
    let request = http_client()
        .post(format!("{base_url}/saas/api/v4/generate"))
        .header("app_key", app_key)
        .header("timestamp", &timestamp)
        .header("sign", sign(app_key, app_secret, &timestamp))
        .header("stream", "true")
        .json(&body);

    debug!(model, messages = messages.len(), "Sending Tiangong request");
    let response = cancellable(&abort, async {
        transport::expect_success(request.send().await?, PROVIDER).await
    })
    .await
    .map_err(|e| reported_from_body(e, &["/code_msg"]))?;
    session.start();

    ndjson::for_each_line(response, &abort, |line| {
        let chunk: GenerateLine =
            serde_json::from_str(line).map_err(|_| ProviderError::malformed(line))?;
        if chunk.code != 200 {
            return Err(ProviderError::reported(chunk.code_msg));
        }
        if let Some(data) = &chunk.resp_data {
            session.append(&data.reply);
        }
        Ok(Flow::Continue)
    })
    .await
}

#[derive(Debug, Deserialize)]
struct GenerateLine {
    code: i64,
    #[serde(default)]
    code_msg: String,
    #[serde(default)]
    resp_data: Option<RespData>,
}

#[derive(Debug, Deserialize)]
struct RespData {
    #[serde(default)]
    reply: String,
}
