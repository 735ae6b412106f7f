//! Provider dispatch.
//!
//! Providers form a closed set. Which operations each one supports is an
//! exhaustive match, so adding a provider is a compile-checked change.

use std::fmt;
use std::str::FromStr;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::error::{DispatchError, ProviderResult};
use crate::options::{ChatOptions, DrawingOptions, SpeechOptions};
use crate::{
    deepseek, ernie, gemini, moonshot, ollama, openai, spark, stepfun, tiangong, tongyi, zhipu,
};

/// Supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAI,
    DeepSeek,
    ZhipuAI,
    MoonshotAI,
    StepFun,
    Ollama,
    Gemini,
    Ernie,
    Tongyi,
    Spark,
    Tiangong,
}

impl Provider {
    pub const ALL: [Provider; 11] = [
        Provider::OpenAI,
        Provider::DeepSeek,
        Provider::ZhipuAI,
        Provider::MoonshotAI,
        Provider::StepFun,
        Provider::Ollama,
        Provider::Gemini,
        Provider::Ernie,
        Provider::Tongyi,
        Provider::Spark,
        Provider::Tiangong,
    ];

    /// Canonical identifier.
    pub fn id(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::DeepSeek => "DeepSeek",
            Provider::ZhipuAI => "ZhipuAI",
            Provider::MoonshotAI => "MoonshotAI",
            Provider::StepFun => "StepFun",
            Provider::Ollama => "Ollama",
            Provider::Gemini => "Gemini",
            Provider::Ernie => "ERNIE",
            Provider::Tongyi => "Tongyi",
            Provider::Spark => "Spark",
            Provider::Tiangong => "Tiangong",
        }
    }

    pub fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::Chat => chat_adapter(*self).is_some(),
            Operation::Drawing => drawing_adapter(*self).is_some(),
            Operation::Speech => speech_adapter(*self).is_some(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Provider {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let provider = match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "deepseek" => Provider::DeepSeek,
            "zhipuai" | "zhipu" => Provider::ZhipuAI,
            "moonshotai" | "moonshot" => Provider::MoonshotAI,
            "stepfun" => Provider::StepFun,
            "ollama" => Provider::Ollama,
            "gemini" => Provider::Gemini,
            "ernie" | "erniebot" => Provider::Ernie,
            "tongyi" => Provider::Tongyi,
            "spark" => Provider::Spark,
            "tiangong" => Provider::Tiangong,
            _ => return Err(DispatchError::UnsupportedProvider(s.to_string())),
        };
        Ok(provider)
    }
}

/// Operation kinds. Each has its own set of supporting providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Chat,
    Drawing,
    Speech,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Chat => "chat",
            Operation::Drawing => "drawing",
            Operation::Speech => "speech",
        })
    }
}

/// Chat adapter: reports through the options' handler, never returns errors.
pub type ChatFn = fn(ChatOptions) -> BoxFuture<'static, ()>;

/// Drawing adapter: reports through the options' handler.
pub type DrawingFn = fn(DrawingOptions) -> BoxFuture<'static, ()>;

/// Speech adapter: returns the audio bytes.
pub type SpeechFn = fn(SpeechOptions) -> BoxFuture<'static, ProviderResult<Vec<u8>>>;

/// A resolved adapter.
#[derive(Clone, Copy)]
pub enum Adapter {
    Chat(ChatFn),
    Drawing(DrawingFn),
    Speech(SpeechFn),
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Adapter::Chat(_) => "Chat",
            Adapter::Drawing(_) => "Drawing",
            Adapter::Speech(_) => "Speech",
        };
        f.debug_tuple("Adapter").field(&kind).finish()
    }
}

pub fn chat_adapter(provider: Provider) -> Option<ChatFn> {
    let adapter: ChatFn = match provider {
        Provider::OpenAI => |o| openai::chat(o).boxed(),
        Provider::DeepSeek => |o| deepseek::chat(o).boxed(),
        Provider::ZhipuAI => |o| zhipu::chat(o).boxed(),
        Provider::MoonshotAI => |o| moonshot::chat(o).boxed(),
        Provider::StepFun => |o| stepfun::chat(o).boxed(),
        Provider::Ollama => |o| ollama::chat(o).boxed(),
        Provider::Gemini => |o| gemini::chat(o).boxed(),
        Provider::Ernie => |o| ernie::chat(o).boxed(),
        Provider::Tongyi => |o| tongyi::chat(o).boxed(),
        Provider::Spark => |o| spark::chat(o).boxed(),
        Provider::Tiangong => |o| tiangong::chat(o).boxed(),
    };
    Some(adapter)
}

pub fn drawing_adapter(provider: Provider) -> Option<DrawingFn> {
    let adapter: DrawingFn = match provider {
        Provider::OpenAI => |o| openai::drawing(o).boxed(),
        Provider::ZhipuAI => |o| zhipu::drawing(o).boxed(),
        Provider::Tongyi => |o| tongyi::drawing(o).boxed(),
        Provider::Ernie => |o| ernie::drawing(o).boxed(),
        Provider::Spark => |o| spark::drawing(o).boxed(),
        Provider::DeepSeek
        | Provider::MoonshotAI
        | Provider::StepFun
        | Provider::Ollama
        | Provider::Gemini
        | Provider::Tiangong => return None,
    };
    Some(adapter)
}

pub fn speech_adapter(provider: Provider) -> Option<SpeechFn> {
    let adapter: SpeechFn = match provider {
        Provider::OpenAI => |o| openai::speech(o).boxed(),
        Provider::DeepSeek
        | Provider::ZhipuAI
        | Provider::MoonshotAI
        | Provider::StepFun
        | Provider::Ollama
        | Provider::Gemini
        | Provider::Ernie
        | Provider::Tongyi
        | Provider::Spark
        | Provider::Tiangong => return None,
    };
    Some(adapter)
}

/// Resolve the adapter for `operation` on `provider_id`.
pub fn resolve(operation: Operation, provider_id: &str) -> Result<Adapter, DispatchError> {
    let provider: Provider = provider_id.parse()?;
    let adapter = match operation {
        Operation::Chat => chat_adapter(provider).map(Adapter::Chat),
        Operation::Drawing => drawing_adapter(provider).map(Adapter::Drawing),
        Operation::Speech => speech_adapter(provider).map(Adapter::Speech),
    };
    debug!(provider = %provider, %operation, found = adapter.is_some(), "Resolved adapter");
    adapter.ok_or_else(|| DispatchError::UnsupportedOperation {
        provider: provider.id().to_string(),
        operation: operation.to_string(),
    })
}

/// Run a chat call on `provider_id`.
///
/// Only routing fails synchronously; everything after that is reported
/// through the options' handler.
pub async fn chat(provider_id: &str, options: ChatOptions) -> Result<(), DispatchError> {
    let provider: Provider = provider_id.parse()?;
    let adapter = chat_adapter(provider).ok_or_else(|| DispatchError::UnsupportedOperation {
        provider: provider.id().to_string(),
        operation: Operation::Chat.to_string(),
    })?;
    adapter(options).await;
    Ok(())
}

/// Run a drawing call on `provider_id`.
pub async fn drawing(provider_id: &str, options: DrawingOptions) -> Result<(), DispatchError> {
    match resolve(Operation::Drawing, provider_id)? {
        Adapter::Drawing(adapter) => {
            adapter(options).await;
            Ok(())
        }
        _ => Err(DispatchError::UnsupportedOperation {
            provider: provider_id.to_string(),
            operation: Operation::Drawing.to_string(),
        }),
    }
}

/// Run a speech call on `provider_id`.
///
/// The outer result is routing, the inner one the synthesis itself.
pub async fn speech(
    provider_id: &str,
    options: SpeechOptions,
) -> Result<ProviderResult<Vec<u8>>, DispatchError> {
    match resolve(Operation::Speech, provider_id)? {
        Adapter::Speech(adapter) => Ok(adapter(options).await),
        _ => Err(DispatchError::UnsupportedOperation {
            provider: provider_id.to_string(),
            operation: Operation::Speech.to_string(),
        }),
    }
}
