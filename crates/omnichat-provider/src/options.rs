//! Per-call request options.
//!
//! Each operation takes one options value carrying credentials, request
//! parameters, the event handler and the external collaborators. Options are
//! built with `new` plus `with_*` methods.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::budget::limit_context;
use crate::error::{ProviderError, ProviderResult};
use crate::files::{default_cache_dir, FileStore, LocalFileStore};
use crate::message::ChatMessage;
use crate::normalize::{drop_leading_assistant, prepend_instruction, turn_chat};
use crate::plugin::{ChatPlugin, ScriptExecutor};
use crate::session::{AnswerHandler, AnswerSession, DrawingHandler, DrawingSession, SessionCheck};
use crate::token::{EstimateTokens, TokenEstimator};
use crate::transport::poll::Poller;

/// Turn window used when the caller does not set one.
pub const DEFAULT_CONTEXT_SIZE: usize = 5;

/// Provider credentials. Which fields are required depends on the provider.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub app_id: Option<String>,
    /// Overrides the provider's public endpoint.
    pub base_url: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("secret_key", &redact(&self.secret_key))
            .field("app_id", &self.app_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Credentials {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    pub fn with_app_id(mut self, id: impl Into<String>) -> Self {
        self.app_id = Some(id.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn require_api_key(&self, provider: &str) -> ProviderResult<&str> {
        present(&self.api_key).ok_or_else(|| ProviderError::missing(provider, "API key"))
    }

    pub fn require_secret_key(&self, provider: &str) -> ProviderResult<&str> {
        present(&self.secret_key).ok_or_else(|| ProviderError::missing(provider, "secret key"))
    }

    pub fn require_app_id(&self, provider: &str) -> ProviderResult<&str> {
        present(&self.app_id).ok_or_else(|| ProviderError::missing(provider, "app id"))
    }

    /// Configured base URL without a trailing slash, or `default`.
    pub fn base_url_or(&self, default: &str) -> String {
        present(&self.base_url)
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }
}

fn default_files() -> Arc<dyn FileStore> {
    Arc::new(LocalFileStore::new(fallback_cache_dir()))
}

/// Options for a chat call.
#[derive(Clone)]
pub struct ChatOptions {
    pub credentials: Credentials,
    pub model: String,
    /// System instruction. Blank means none.
    pub instruction: String,
    /// Soft ceiling on estimated input tokens.
    pub input_max_tokens: Option<usize>,
    /// Maximum number of history turns replayed.
    pub context_size: usize,
    /// Output token cap.
    pub max_tokens: Option<u32>,
    pub messages: Vec<ChatMessage>,
    pub plugins: Vec<ChatPlugin>,
    pub session_id: String,
    pub abort: Option<CancellationToken>,
    pub session_check: Option<SessionCheck>,
    pub handler: Arc<dyn AnswerHandler>,
    pub files: Arc<dyn FileStore>,
    pub scripts: Option<Arc<dyn ScriptExecutor>>,
    pub estimator: Arc<dyn EstimateTokens>,
    /// Span the call runs inside.
    pub span: Option<Span>,
}

impl std::fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOptions")
            .field("credentials", &self.credentials)
            .field("model", &self.model)
            .field("context_size", &self.context_size)
            .field("input_max_tokens", &self.input_max_tokens)
            .field("messages", &self.messages.len())
            .field("plugins", &self.plugins.len())
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl ChatOptions {
    pub fn new(session_id: impl Into<String>, handler: Arc<dyn AnswerHandler>) -> Self {
        Self {
            credentials: Credentials::default(),
            model: String::new(),
            instruction: String::new(),
            input_max_tokens: None,
            context_size: DEFAULT_CONTEXT_SIZE,
            max_tokens: None,
            messages: Vec::new(),
            plugins: Vec::new(),
            session_id: session_id.into(),
            abort: None,
            session_check: None,
            handler,
            files: default_files(),
            scripts: None,
            estimator: Arc::new(TokenEstimator::new()),
            span: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_input_max_tokens(mut self, max: Option<usize>) -> Self {
        self.input_max_tokens = max;
        self
    }

    pub fn with_context_size(mut self, size: usize) -> Self {
        self.context_size = size;
        self
    }

    pub fn with_max_tokens(mut self, max: Option<u32>) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_plugins(mut self, plugins: Vec<ChatPlugin>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }

    pub fn with_session_check(mut self, check: SessionCheck) -> Self {
        self.session_check = Some(check);
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = files;
        self
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptExecutor>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn EstimateTokens>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn has_instruction(&self) -> bool {
        !self.instruction.trim().is_empty()
    }

    /// Event emitter for this call.
    pub fn session(&self) -> AnswerSession {
        AnswerSession::new(
            self.session_id.clone(),
            self.handler.clone(),
            self.abort.clone(),
            self.session_check.clone(),
        )
    }

    /// Span for this call, or the current span.
    pub fn span(&self) -> Span {
        self.span.clone().unwrap_or_else(Span::current)
    }

    /// Cancellation token for this call (a fresh one if none was supplied).
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone().unwrap_or_default()
    }

    /// Trim already-normalized messages to the budget, reporting a shrunk
    /// context through the session.
    pub fn budget(
        &self,
        normalized: Vec<ChatMessage>,
        session: &AnswerSession,
    ) -> Vec<ChatMessage> {
        let budgeted = limit_context(
            self.input_max_tokens,
            self.context_size,
            normalized,
            self.estimator.as_ref(),
        );
        if let Some(len) = budgeted.shrunk_to {
            session.context_shrunk(len);
        }
        budgeted.messages
    }

    /// Normalize then budget the history.
    pub fn prepared_history(&self, session: &AnswerSession) -> Vec<ChatMessage> {
        self.budget(turn_chat(&self.messages), session)
    }

    /// History for providers without a system role: the instruction is
    /// folded into the newest message before budgeting, and a leading
    /// assistant turn is dropped afterwards.
    pub fn prepared_history_inline(&self, session: &AnswerSession) -> Vec<ChatMessage> {
        let mut normalized = turn_chat(&self.messages);
        prepend_instruction(&mut normalized, &self.instruction);
        let mut history = self.budget(normalized, session);
        drop_leading_assistant(&mut history);
        history
    }

    /// The requested model, or `default` when none was given.
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.model.trim().is_empty() {
            default
        } else {
            &self.model
        }
    }
}

/// Options for an image generation call.
#[derive(Clone)]
pub struct DrawingOptions {
    pub credentials: Credentials,
    pub model: String,
    pub prompt: String,
    pub negative_prompt: String,
    /// `WIDTHxHEIGHT`, e.g. `1024x1024`.
    pub size: String,
    pub quality: Option<String>,
    pub style: Option<String>,
    pub n: u32,
    pub steps: Option<u32>,
    pub sampler_index: Option<String>,
    pub cfg_scale: Option<f32>,
    /// Interval between status checks for asynchronous drawing tasks.
    pub poll_interval: Duration,
    pub session_id: String,
    pub abort: Option<CancellationToken>,
    pub session_check: Option<SessionCheck>,
    pub handler: Arc<dyn DrawingHandler>,
    pub files: Arc<dyn FileStore>,
    pub span: Option<Span>,
}

impl std::fmt::Debug for DrawingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawingOptions")
            .field("credentials", &self.credentials)
            .field("model", &self.model)
            .field("size", &self.size)
            .field("n", &self.n)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl DrawingOptions {
    pub fn new(
        session_id: impl Into<String>,
        prompt: impl Into<String>,
        handler: Arc<dyn DrawingHandler>,
    ) -> Self {
        Self {
            credentials: Credentials::default(),
            model: String::new(),
            prompt: prompt.into(),
            negative_prompt: String::new(),
            size: "1024x1024".to_string(),
            quality: None,
            style: None,
            n: 1,
            steps: None,
            sampler_index: None,
            cfg_scale: None,
            poll_interval: Poller::DEFAULT_INTERVAL,
            session_id: session_id.into(),
            abort: None,
            session_check: None,
            handler,
            files: default_files(),
            span: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_negative_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = prompt.into();
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_n(mut self, n: u32) -> Self {
        self.n = n.max(1);
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }

    pub fn with_session_check(mut self, check: SessionCheck) -> Self {
        self.session_check = Some(check);
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = files;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn session(&self) -> DrawingSession {
        DrawingSession::new(
            self.session_id.clone(),
            self.handler.clone(),
            self.abort.clone(),
            self.session_check.clone(),
        )
    }

    pub fn span(&self) -> Span {
        self.span.clone().unwrap_or_else(Span::current)
    }

    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone().unwrap_or_default()
    }

    /// Parse `size` into `(width, height)`.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.size.split_once(['x', '*'])?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }
}

/// Options for a speech synthesis call.
#[derive(Debug, Clone)]
pub struct SpeechOptions {
    pub credentials: Credentials,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub input: String,
    pub abort: Option<CancellationToken>,
    pub span: Option<Span>,
}

impl SpeechOptions {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::default(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
            input: input.into(),
            abort: None,
            span: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_abort(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn span(&self) -> Span {
        self.span.clone().unwrap_or_else(Span::current)
    }

    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone().unwrap_or_default()
    }
}

/// Where generated files go when no store is configured.
pub fn fallback_cache_dir() -> PathBuf {
    default_cache_dir().unwrap_or_else(|| std::env::temp_dir().join("omnichat"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AnswerEvent, DrawingEvent};
    use tokio::sync::mpsc;

    #[test]
    fn test_missing_credentials() {
        let creds = Credentials::default().with_api_key("  ");
        assert!(creds.require_api_key("OpenAI").is_err());
        assert!(creds.require_secret_key("ERNIE").is_err());
        assert!(creds.require_app_id("Spark").is_err());

        let creds = Credentials::default().with_api_key("sk-1");
        assert_eq!(creds.require_api_key("OpenAI").unwrap(), "sk-1");
    }

    #[test]
    fn test_base_url_or() {
        let creds = Credentials::default();
        assert_eq!(creds.base_url_or("https://a.test/v1/"), "https://a.test/v1");
        let creds = creds.with_base_url("http://localhost:9/");
        assert_eq!(creds.base_url_or("https://a.test"), "http://localhost:9");
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let creds = Credentials::default().with_api_key("sk-secret");
        assert!(!format!("{creds:?}").contains("sk-secret"));
    }

    #[test]
    fn test_dimensions() {
        let (tx, _rx) = mpsc::unbounded_channel::<DrawingEvent>();
        let options = DrawingOptions::new("ses", "cat", Arc::new(tx)).with_size("1024*768");
        assert_eq!(options.dimensions(), Some((1024, 768)));
        assert_eq!(options.with_size("big").dimensions(), None);
    }

    #[test]
    fn test_prepared_history_reports_shrink() {
        let (tx, mut rx) = mpsc::unbounded_channel::<AnswerEvent>();
        let history: Vec<ChatMessage> = (0..6)
            .flat_map(|i| {
                [
                    ChatMessage::user(format!("q{i} ").repeat(50)),
                    ChatMessage::assistant(format!("a{i} ").repeat(50)),
                ]
            })
            .chain(std::iter::once(ChatMessage::user("now")))
            .collect();
        let options = ChatOptions::new("ses", Arc::new(tx))
            .with_messages(history)
            .with_context_size(5)
            .with_input_max_tokens(Some(60));
        let session = options.session();

        let prepared = options.prepared_history(&session);
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared.last().unwrap().content, "now");
        assert!(matches!(
            rx.try_recv().unwrap(),
            AnswerEvent::ContextShrunk { .. }
        ));
    }

    #[test]
    fn test_prepared_history_inline() {
        let (tx, _rx) = mpsc::unbounded_channel::<AnswerEvent>();
        let options = ChatOptions::new("ses", Arc::new(tx))
            .with_instruction("be brief")
            .with_messages(vec![
                ChatMessage::assistant("Hello, how can I help?"),
                ChatMessage::user("hi"),
            ]);
        let session = options.session();

        let prepared = options.prepared_history_inline(&session);
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].content, "be brief\nhi");
    }

    #[test]
    fn test_model_or() {
        let (tx, _rx) = mpsc::unbounded_channel::<AnswerEvent>();
        let options = ChatOptions::new("ses", Arc::new(tx));
        assert_eq!(options.model_or("gpt-4o"), "gpt-4o");
        let options = options.with_model("glm-4");
        assert_eq!(options.model_or("gpt-4o"), "glm-4");
    }

    #[test]
    fn test_with_n_is_at_least_one() {
        let (tx, _rx) = mpsc::unbounded_channel::<DrawingEvent>();
        let options = DrawingOptions::new("ses", "cat", Arc::new(tx)).with_n(0);
        assert_eq!(options.n, 1);
    }
}
