//! Alibaba Tongyi (DashScope) chat and drawing adapters.
//!
//! Streamed chat chunks carry the whole answer so far rather than a delta;
//! [`SnapshotDelta`] turns them back into increments. Vision models take
//! images by `oss://` reference, so an attached image is uploaded to the
//! provider's temporary storage first. Drawing is an asynchronous task that is
//! polled until it finishes.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

use crate::dispatch::Provider;
use crate::error::{ProviderError, ProviderResult};
use crate::files::image_file_name;
use crate::message::ChatMessage;
use crate::model::{is_support_image, is_support_network, is_support_plugin};
use crate::normalize::drop_leading_assistant;
use crate::options::{ChatOptions, DrawingOptions};
use crate::plugin::{run_plugins, ToolPlanner, ToolSelection};
use crate::session::AnswerSession;
use crate::stream::SnapshotDelta;
use crate::transport::poll::{PollStatus, Poller};
use crate::transport::{self, cancellable, http_client, reported_from_body, sse, Flow};

const PROVIDER: &str = "Tongyi";
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com";
const DEFAULT_MODEL: &str = "qwen-turbo";
const DEFAULT_IMAGE_MODEL: &str = "wanx-v1";
const TEXT_PATH: &str = "/api/v1/services/aigc/text-generation/generation";
const MULTIMODAL_PATH: &str = "/api/v1/services/aigc/multimodal-generation/generation";
const IMAGE_PATH: &str = "/api/v1/services/aigc/text2image/image-synthesis";
const ERROR_POINTERS: &[&str] = &["/message", "/error/message"];

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

/// Whether `model` goes to the multimodal endpoint.
pub fn is_vision_model(model: &str) -> bool {
    model.starts_with("qwen-vl") || is_support_image(Provider::Tongyi, model)
}

struct DashScope<'a> {
    http: reqwest::Client,
    base_url: String,
    api_key: &'a str,
    model: &'a str,
    abort: CancellationToken,
}

impl DashScope<'_> {
    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(self.api_key)
    }

    /// Upload a local image to temporary storage and return its `oss://` URL.
    async fn upload(&self, bytes: Vec<u8>) -> ProviderResult<String> {
        let request = self
            .http
            .get(format!("{}/api/v1/uploads", self.base_url))
            .bearer_auth(self.api_key)
            .query(&[("action", "getPolicy"), ("model", self.model)]);
        let policy: PolicyResponse = transport::send_json(request, &self.abort, PROVIDER)
            .await
            .map_err(|e| reported_from_body(e, ERROR_POINTERS))?;
        let policy = policy.data;

        let file_name = image_file_name();
        let key = format!("{}/{}", policy.upload_dir, file_name);
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/png")?;
        let form = reqwest::multipart::Form::new()
            .text("OSSAccessKeyId", policy.oss_access_key_id)
            .text("Signature", policy.signature)
            .text("policy", policy.policy)
            .text("key", key.clone())
            .text("x-oss-object-acl", policy.x_oss_object_acl)
            .text("x-oss-forbid-overwrite", policy.x_oss_forbid_overwrite)
            .text("success_action_status", "200")
            .text("x-oss-content-type", "image/png")
            .part("file", part);

        let request = self.http.post(&policy.upload_host).multipart(form);
        cancellable(&self.abort, async {
            transport::expect_success(request.send().await?, PROVIDER).await
        })
        .await?;
        debug!(%key, "Image uploaded");
        Ok(format!("oss://{key}"))
    }
}

#[async_trait]
impl ToolPlanner for DashScope<'_> {
    async fn plan(
        &self,
        messages: &[Value],
        tools: &[Value],
    ) -> ProviderResult<Option<ToolSelection>> {
        let body = json!({
            "model": self.model,
            "input": {"messages": messages},
            "parameters": {"result_format": "message", "tools": tools},
        });
        debug!(tools = tools.len(), "Sending planning request");
        let response: Generation =
            transport::send_json(self.post(TEXT_PATH).json(&body), &self.abort, PROVIDER)
                .await
                .map_err(|e| reported_from_body(e, ERROR_POINTERS))?;
        if let Some(message) = response.error_message() {
            return Err(ProviderError::reported(message));
        }
        Ok(response
            .output
            .and_then(|o| o.choices.into_iter().next())
            .and_then(|c| ToolSelection::from_message(&c.message)))
    }
}

async fn build_messages(
    client: &DashScope<'_>,
    options: &ChatOptions,
    history: &[ChatMessage],
    vision: bool,
) -> ProviderResult<Vec<Value>> {
    let text = |content: &str| -> Value {
        if vision {
            json!([{"text": content}])
        } else {
            json!(content)
        }
    };

    let mut messages = Vec::with_capacity(history.len() + 1);
    if options.has_instruction() {
        messages.push(json!({"role": "system", "content": text(&options.instruction)}));
    }

    let last = history.len().saturating_sub(1);
    for (i, message) in history.iter().enumerate() {
        let content = match message.image.as_deref() {
            Some(path) if vision && i == last => {
                let bytes = options.files.read_bytes(path).await?;
                let image = client.upload(bytes).await?;
                json!([{"image": image}, {"text": message.content}])
            }
            _ => text(&message.content),
        };
        messages.push(json!({"role": message.role.as_str(), "content": content}));
    }
    Ok(messages)
}

async fn stream_chat(options: &ChatOptions, session: &AnswerSession) -> ProviderResult<()> {
    let api_key = options.credentials.require_api_key(PROVIDER)?;
    let model = options.model_or(DEFAULT_MODEL);
    let client = DashScope {
        http: http_client(),
        base_url: options.credentials.base_url_or(DEFAULT_BASE_URL),
        api_key,
        model,
        abort: options.abort_token(),
    };
    let vision = is_vision_model(model);

    let mut history = options.prepared_history(session);
    drop_leading_assistant(&mut history);
    let uploads = history.last().is_some_and(|m| vision && m.has_image());
    let mut messages = build_messages(&client, options, &history, vision).await?;

    if !vision && is_support_plugin(Provider::Tongyi, model) {
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
                "name": round.plugin_id,
                "content": round.output,
            }));
        }
    }

    let mut parameters = json!({
        "result_format": "message",
        "enable_search": is_support_network(Provider::Tongyi, model),
    });
    if let Some(max) = options.max_tokens {
        parameters["max_tokens"] = json!(max);
    }
    let body = json!({
        "model": model,
        "input": {"messages": messages},
        "parameters": parameters,
    });

    let mut request = client
        .post(if vision { MULTIMODAL_PATH } else { TEXT_PATH })
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .json(&body);
    if uploads {
        request = request.header("X-DashScope-OssResourceResolve", "enable");
    }

    debug!(model, vision, messages = messages.len(), "Sending Tongyi chat request");
    let stream = sse::open(request, &client.abort, PROVIDER)
        .await
        .map_err(|e| reported_from_body(e, ERROR_POINTERS))?;
    session.start();

    let mut snapshot = SnapshotDelta::new();
    sse::for_each_event(stream, &client.abort, |event| {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(Flow::Continue);
        }
        let chunk: Generation =
            serde_json::from_str(data).map_err(|_| ProviderError::malformed(data))?;
        if let Some(message) = chunk.error_message() {
            return Err(ProviderError::reported(message));
        }
        if let Some(text) = chunk.snapshot_text() {
            session.append(&snapshot.next(&text));
        }
        Ok(Flow::Continue)
    })
    .await
}

async fn generate_images(options: &DrawingOptions) -> ProviderResult<Vec<String>> {
    let api_key = options.credentials.require_api_key(PROVIDER)?;
    let abort = options.abort_token();
    let base_url = options.credentials.base_url_or(DEFAULT_BASE_URL);
    let model = if options.model.trim().is_empty() {
        DEFAULT_IMAGE_MODEL
    } else {
        options.model.as_str()
    };

    let mut input = json!({"prompt": options.prompt});
    if !options.negative_prompt.trim().is_empty() {
        input["negative_prompt"] = json!(options.negative_prompt);
    }
    let mut parameters = json!({"size": options.size.replace('x', "*"), "n": 1});
    if let Some(style) = &options.style {
        parameters["style"] = json!(style);
    }
    let body = json!({"model": model, "input": input, "parameters": parameters});

    let http = http_client();
    let submitted: TaskResponse = transport::send_json(
        http.post(format!("{base_url}{IMAGE_PATH}"))
            .bearer_auth(api_key)
            .header("X-DashScope-Async", "enable")
            .json(&body),
        &abort,
        PROVIDER,
    )
    .await
    .map_err(|e| reported_from_body(e, ERROR_POINTERS))?;
    if let Some(message) = submitted.message.filter(|_| submitted.output.is_none()) {
        return Err(ProviderError::reported(message));
    }
    let task_id = submitted
        .output
        .map(|o| o.task_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::invalid_response("task submission without task_id"))?;
    info!(%task_id, "Drawing task submitted");

    let task_url = format!("{base_url}/api/v1/tasks/{task_id}");
    let urls = Poller::new(options.poll_interval)
        .run(&abort, || {
            let request = http.get(&task_url).bearer_auth(api_key);
            let abort = abort.clone();
            async move {
                let status: TaskResponse = transport::send_json(request, &abort, PROVIDER).await?;
                Ok::<_, ProviderError>(task_status(status))
            }
        })
        .await?;

    let mut paths = Vec::with_capacity(urls.len());
    for url in urls {
        let file_name = image_file_name();
        paths.push(cancellable(&abort, options.files.save_from_url(&url, &file_name)).await?);
    }
    info!(count = paths.len(), "Images saved");
    Ok(paths)
}

/// Map a task status response to a poll outcome.
fn task_status(response: TaskResponse) -> PollStatus<Vec<String>> {
    let Some(output) = response.output else {
        return PollStatus::Failed(response.message.unwrap_or_else(|| "task error".to_string()));
    };
    match output.task_status.as_str() {
        "PENDING" | "RUNNING" => PollStatus::Pending,
        "SUCCEEDED" => {
            let urls: Vec<String> = output.results.into_iter().filter_map(|r| r.url).collect();
            if urls.is_empty() {
                PollStatus::Failed("task error".to_string())
            } else {
                PollStatus::Ready(urls)
            }
        }
        _ => PollStatus::Failed(output.message.unwrap_or_else(|| "task error".to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct Generation {
    #[serde(default)]
    output: Option<GenerationOutput>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl Generation {
    fn error_message(&self) -> Option<String> {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) if !code.is_empty() => Some(message.clone()),
            (Some(code), None) if !code.is_empty() => Some(code.clone()),
            _ => None,
        }
    }

    /// Answer text so far. Vision models send a list of parts.
    fn snapshot_text(&self) -> Option<String> {
        let content = self.output.as_ref()?.choices.first()?.message.get("content")?;
        match content {
            Value::String(text) => Some(text.clone()),
            Value::Array(parts) => Some(
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect(),
            ),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerationOutput {
    #[serde(default)]
    choices: Vec<GenerationChoice>,
}

#[derive(Debug, Deserialize)]
struct GenerationChoice {
    message: Value,
}

#[derive(Debug, Deserialize)]
struct PolicyResponse {
    data: UploadPolicy,
}

#[derive(Debug, Deserialize)]
struct UploadPolicy {
    policy: String,
    signature: String,
    upload_dir: String,
    upload_host: String,
    oss_access_key_id: String,
    x_oss_object_acl: String,
    x_oss_forbid_overwrite: String,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    #[serde(default)]
    output: Option<TaskOutput>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    #[serde(default)]
    task_id: String,
    #[serde(default)]
    task_status: String,
    #[serde(default)]
    results: Vec<TaskResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    url: Option<String>,
}
