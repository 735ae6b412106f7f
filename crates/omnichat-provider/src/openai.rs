//! OpenAI chat, image and speech adapters.
//!
//! The chat completions wire format is shared by several providers. Each is
//! described by a [`CompatProfile`]; the DeepSeek, ZhipuAI, MoonshotAI and
//! StepFun adapters only supply their own profile.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

use crate::dispatch::Provider;
use crate::error::{ProviderError, ProviderResult};
use crate::files::image_file_name;
use crate::message::ChatMessage;
use crate::model::{is_support_image, is_support_plugin};
use crate::options::{ChatOptions, DrawingOptions, SpeechOptions};
use crate::plugin::{run_plugins, ToolPlanner, ToolSelection};
use crate::session::AnswerSession;
use crate::transport::{self, cancellable, http_client, reported_from_body, sse, Flow};

const ERROR_POINTERS: &[&str] = &["/error/message", "/message"];

/// How a provider wants an attached image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    /// `data:image/jpg;base64,...`
    DataUrl,
    /// The bare base64 payload.
    RawBase64,
    /// Images are not sent.
    TextOnly,
}

/// Wire differences between OpenAI-compatible providers.
#[derive(Debug, Clone, Copy)]
pub struct CompatProfile {
    /// Capability table key.
    pub kind: Provider,
    pub provider: &'static str,
    pub base_url: &'static str,
    pub default_model: &'static str,
    pub images: ImageEncoding,
    /// Runs the plugin bridge before streaming, for models whose capability
    /// entry allows tool calling.
    pub plugins: bool,
    pub image_model: &'static str,
    /// Accepts `n`, `quality`, `style` and `response_format` on image
    /// requests.
    pub image_options: bool,
}

pub const PROFILE: CompatProfile = CompatProfile {
    kind: Provider::OpenAI,
    provider: "OpenAI",
    base_url: "https://api.openai.com/v1",
    default_model: "gpt-3.5-turbo",
    images: ImageEncoding::DataUrl,
    plugins: true,
    image_model: "dall-e-3",
    image_options: true,
};

pub async fn chat(options: ChatOptions) {
    chat_with(&PROFILE, options).await
}

pub async fn drawing(options: DrawingOptions) {
    drawing_with(&PROFILE, options).await
}

pub async fn speech(options: SpeechOptions) -> ProviderResult<Vec<u8>> {
    let span = options.span();
    synthesize(&options).instrument(span).await
}

/// Run a chat call against an OpenAI-compatible endpoint.
pub(crate) async fn chat_with(profile: &CompatProfile, options: ChatOptions) {
    let session = options.session();
    let result = stream_chat(profile, &options, &session)
        .instrument(options.span())
        .await;
    session.finish(result);
}

/// Run an image request against an OpenAI-compatible endpoint.
pub(crate) async fn drawing_with(profile: &CompatProfile, options: DrawingOptions) {
    let session = options.session();
    let result = generate_images(profile, &options)
        .instrument(options.span())
        .await;
    session.finish(result);
}

struct CompatClient<'a> {
    http: reqwest::Client,
    provider: &'static str,
    base_url: String,
    api_key: &'a str,
    model: &'a str,
    max_tokens: Option<u32>,
    abort: CancellationToken,
}

impl CompatClient<'_> {
    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.api_key)
    }
}

#[async_trait]
impl ToolPlanner for CompatClient<'_> {
    async fn plan(
        &self,
        messages: &[Value],
        tools: &[Value],
    ) -> ProviderResult<Option<ToolSelection>> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "tools": tools,
            "stream": false,
        });
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = json!(max);
        }
        debug!(provider = self.provider, tools = tools.len(), "Sending planning request");
        let response: PlanResponse = transport::send_json(
            self.post("/chat/completions").json(&body),
            &self.abort,
            self.provider,
        )
        .await
        .map_err(|e| reported_from_body(e, ERROR_POINTERS))?;

        Ok(response
            .choices
            .first()
            .and_then(|c| ToolSelection::from_message(&c.message)))
    }
}

async fn stream_chat(
    profile: &CompatProfile,
    options: &ChatOptions,
    session: &AnswerSession,
) -> ProviderResult<()> {
    let api_key = options.credentials.require_api_key(profile.provider)?;
    let client = CompatClient {
        http: http_client(),
        provider: profile.provider,
        base_url: options.credentials.base_url_or(profile.base_url),
        api_key,
        model: options.model_or(profile.default_model),
        max_tokens: options.max_tokens,
        abort: options.abort_token(),
    };

    let history = options.prepared_history(session);
    let vision = is_support_image(profile.kind, client.model);
    let mut messages = build_messages(profile, options, &history, vision).await?;

    if profile.plugins && is_support_plugin(profile.kind, client.model) {
        let round = run_plugins(
            &client,
            options.scripts.as_deref(),
            &options.plugins,
            &messages,
            &client.abort,
        )
        .await?;
        if let Some(round) = round {
            messages.push(round.selection.message);
            messages.push(json!({
                "role": "tool",
                "tool_call_id": round.selection.call_id,
                "content": round.output,
            }));
        }
    }

    let mut body = json!({
        "model": client.model,
        "messages": messages,
        "stream": true,
    });
    if let Some(max) = options.max_tokens {
        body["max_tokens"] = json!(max);
    }

    debug!(
        provider = profile.provider,
        model = client.model,
        messages = messages.len(),
        "Sending chat request"
    );
    let stream = sse::open(
        client.post("/chat/completions").json(&body),
        &client.abort,
        profile.provider,
    )
    .await
    .map_err(|e| reported_from_body(e, ERROR_POINTERS))?;
    session.start();

    sse::for_each_event(stream, &client.abort, |event| {
        let data = event.data.trim();
        if data == "[DONE]" {
            return Ok(Flow::Stop);
        }
        let chunk: ChatChunk =
            serde_json::from_str(data).map_err(|_| ProviderError::malformed(data))?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::reported(error.message));
        }
        if let Some(content) = chunk.choices.first().and_then(|c| c.delta.content.as_deref()) {
            session.append(content);
        }
        Ok(Flow::Continue)
    })
    .await
}

/// Convert the prepared history to wire messages. Only an image on the
/// newest message is sent, and only to a vision model.
async fn build_messages(
    profile: &CompatProfile,
    options: &ChatOptions,
    history: &[ChatMessage],
    vision: bool,
) -> ProviderResult<Vec<Value>> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if options.has_instruction() {
        messages.push(json!({"role": "system", "content": options.instruction}));
    }

    let last = history.len().saturating_sub(1);
    for (i, message) in history.iter().enumerate() {
        let content = match message.image.as_deref() {
            Some(path) if vision && i == last && profile.images != ImageEncoding::TextOnly => {
                let data = options.files.read_base64(path).await?;
                let url = match profile.images {
                    ImageEncoding::DataUrl => format!("data:image/jpg;base64,{data}"),
                    _ => data,
                };
                json!([
                    {"type": "text", "text": message.content},
                    {"type": "image_url", "image_url": {"url": url}},
                ])
            }
            _ => json!(message.content),
        };
        messages.push(json!({"role": message.role.as_str(), "content": content}));
    }
    Ok(messages)
}

async fn generate_images(
    profile: &CompatProfile,
    options: &DrawingOptions,
) -> ProviderResult<Vec<String>> {
    let api_key = options.credentials.require_api_key(profile.provider)?;
    let abort = options.abort_token();
    let base_url = options.credentials.base_url_or(profile.base_url);
    let model = if options.model.trim().is_empty() {
        profile.image_model
    } else {
        options.model.as_str()
    };

    let mut body = json!({
        "model": model,
        "prompt": options.prompt,
        "size": options.size,
    });
    if profile.image_options {
        body["n"] = json!(options.n);
        body["response_format"] = json!("url");
        if let Some(quality) = &options.quality {
            body["quality"] = json!(quality);
        }
        if let Some(style) = &options.style {
            body["style"] = json!(style);
        }
    }

    debug!(provider = profile.provider, model, "Sending image request");
    let response: ImagesResponse = transport::send_json(
        http_client()
            .post(format!("{base_url}/images/generations"))
            .bearer_auth(api_key)
            .json(&body),
        &abort,
        profile.provider,
    )
    .await
    .map_err(|e| reported_from_body(e, ERROR_POINTERS))?;

    let mut paths = Vec::with_capacity(response.data.len());
    for item in response.data {
        let file_name = image_file_name();
        let path = match (item.url, item.b64_json) {
            (Some(url), _) => {
                cancellable(&abort, options.files.save_from_url(&url, &file_name)).await?
            }
            (None, Some(data)) => {
                cancellable(&abort, options.files.save_from_base64(&data, &file_name)).await?
            }
            (None, None) => continue,
        };
        paths.push(path);
    }

    if paths.is_empty() {
        return Err(ProviderError::invalid_response("no images returned"));
    }
    info!(provider = profile.provider, count = paths.len(), "Images saved");
    Ok(paths)
}

async fn synthesize(options: &SpeechOptions) -> ProviderResult<Vec<u8>> {
    let api_key = options.credentials.require_api_key(PROFILE.provider)?;
    let abort = options.abort_token();
    let base_url = options.credentials.base_url_or(PROFILE.base_url);
    let body = json!({
        "model": options.model,
        "input": options.input,
        "voice": options.voice,
        "speed": options.speed,
    });

    let request = http_client()
        .post(format!("{base_url}/audio/speech"))
        .bearer_auth(api_key)
        .json(&body);
    let bytes = cancellable(&abort, async {
        let response = transport::expect_success(request.send().await?, PROFILE.provider).await?;
        Ok(response.bytes().await?)
    })
    .await
    .map_err(|e| reported_from_body(e, ERROR_POINTERS))?;

    info!(bytes = bytes.len(), voice = %options.voice, "Speech synthesized");
    Ok(bytes.to_vec())
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    choices: Vec<PlanChoice>,
}

#[derive(Debug, Deserialize)]
struct PlanChoice {
    message: Value,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageItem>,
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}
