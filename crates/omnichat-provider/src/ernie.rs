//! Baidu ERNIE chat and SD-XL drawing adapters.
//!
//! Every call first exchanges the API key and secret key for an access token,
//! then passes the token as a query parameter.

use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

use crate::error::{ProviderError, ProviderResult};
use crate::files::image_file_name;
use crate::options::{ChatOptions, Credentials, DrawingOptions};
use crate::session::AnswerSession;
use crate::transport::{self, cancellable, http_client, reported_from_body, sse, Flow};

const PROVIDER: &str = "ERNIE";
pub const DEFAULT_BASE_URL: &str = "https://aip.baidubce.com";
const DEFAULT_MODEL: &str = "ERNIE-3.5-8K";
const WORKSHOP_PATH: &str = "/rpc/2.0/ai_custom/v1/wenxinworkshop";
const ERROR_POINTERS: &[&str] = &["/error_msg", "/error_description"];

pub async fn chat(options: ChatOptions) {
    let session = options.session();
    let result = stream_chat(&options, &session)
        .instrument(options.span())
        .await;
    session.finish(result);
}

pub async fn drawing(options: DrawingOptions) {
    let session = options.session();
    let result = generate_images(&options).instrument(options.span()).await;
    session.finish(result);
}

/// Chat endpoint name for a model.
pub fn chat_endpoint(model: &str) -> &'static str {
    match model {
        "ERNIE-4.0" | "ERNIE-4.0-8K" => "completions_pro",
        "ERNIE-Speed-8K" => "ernie_speed",
        _ => "completions",
    }
}

/// Exchange the key pair for an access token.
async fn access_token(
    credentials: &Credentials,
    base_url: &str,
    abort: &CancellationToken,
) -> ProviderResult<String> {
    let api_key = credentials.require_api_key(PROVIDER)?;
    let secret_key = credentials.require_secret_key(PROVIDER)?;

    let request = http_client().get(format!("{base_url}/oauth/2.0/token")).query(&[
        ("grant_type", "client_credentials"),
        ("client_id", api_key),
        ("client_secret", secret_key),
    ]);
    let response: TokenResponse = transport::send_json(request, abort, PROVIDER)
        .await
        .map_err(|e| reported_from_body(e, ERROR_POINTERS))?;

    match response {
        TokenResponse {
            access_token: Some(token),
            ..
        } => Ok(token),
        TokenResponse {
            error_description: Some(message),
            ..
        } => Err(ProviderError::reported(message)),
        _ => Err(ProviderError::invalid_response("token response without access_token")),
    }
}

async fn stream_chat(options: &ChatOptions, session: &AnswerSession) -> ProviderResult<()> {
    // Both keys are checked before the token request goes out.
    options.credentials.require_api_key(PROVIDER)?;
    options.credentials.require_secret_key(PROVIDER)?;
    let abort = options.abort_token();
    let base_url = options.credentials.base_url_or(DEFAULT_BASE_URL);
    let model = options.model_or(DEFAULT_MODEL);

    let token = access_token(&options.credentials, &base_url, &abort).await?;

    let history = options.prepared_history_inline(session);
    let messages: Vec<_> = history
        .iter()
        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
        .collect();
    let mut body = json!({"messages": messages, "stream": true});
    if let Some(max) = options.max_tokens {
        body["max_output_tokens"] = json!(max);
    }

    let url = format!(
        "{base_url}{WORKSHOP_PATH}/chat/{}?access_token={}",
        chat_endpoint(model),
        urlencoding::encode(&token)
    );
    debug!(model, messages = messages.len(), "Sending ERNIE chat request");
    let stream = sse::open(http_client().post(url).json(&body), &abort, PROVIDER)
        .await
        .map_err(|e| reported_from_body(e, ERROR_POINTERS))?;
    session.start();

    sse::for_each_event(stream, &abort, |event| {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(Flow::Continue);
        }
        let chunk: ChatChunk =
            serde_json::from_str(data).map_err(|_| ProviderError::malformed(data))?;
        if let Some(message) = chunk.error_msg {
            return Err(ProviderError::reported(message));
        }
        session.append(&chunk.result);
        Ok(if chunk.is_end { Flow::Stop } else { Flow::Continue })
    })
    .await
}

async fn generate_images(options: &DrawingOptions) -> ProviderResult<Vec<String>> {
    options.credentials.require_api_key(PROVIDER)?;
    options.credentials.require_secret_key(PROVIDER)?;
    let abort = options.abort_token();
    let base_url = options.credentials.base_url_or(DEFAULT_BASE_URL);

    let token = access_token(&options.credentials, &base_url, &abort).await?;

    let mut body = json!({
        "prompt": options.prompt,
        "negative_prompt": options.negative_prompt,
        "size": options.size,
        "n": options.n,
    });
    if let Some(steps) = options.steps {
        body["steps"] = json!(steps);
    }
    if let Some(sampler) = &options.sampler_index {
        body["sampler_index"] = json!(sampler);
    }
    if let Some(cfg_scale) = options.cfg_scale {
        body["cfg_scale"] = json!(cfg_scale);
    }
    if let Some(style) = &options.style {
        body["style"] = json!(style);
    }

    let url = format!(
        "{base_url}{WORKSHOP_PATH}/text2image/sd_xl?access_token={}",
        urlencoding::encode(&token)
    );
    debug!(size = %options.size, n = options.n, "Sending ERNIE image request");
    let response: ImageResponse =
        transport::send_json(http_client().post(url).json(&body), &abort, PROVIDER).await?;
    if let Some(message) = response.error_msg {
        return Err(ProviderError::reported(message));
    }

    let mut paths = Vec::with_capacity(response.data.len());
    for item in response.data {
        let file_name = image_file_name();
        let saved = options.files.save_from_base64(&item.b64_image, &file_name);
        paths.push(cancellable(&abort, saved).await?);
    }
    if paths.is_empty() {
        return Err(ProviderError::invalid_response("no images returned"));
    }
    info!(count = paths.len(), "Images saved");
    Ok(paths)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    result: String,
    #[serde(default)]
    is_end: bool,
    #[serde(default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageItem>,
    #[serde(default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    b64_image: String,
}
