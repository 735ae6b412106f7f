//! Multi-provider chat, drawing and speech adapters for omnichat.
//!
//! Every provider speaks its own wire protocol. This crate hides them behind
//! one calling convention: an options value in, events out through a handler.
//!
//! - OpenAI, plus the OpenAI-compatible DeepSeek, ZhipuAI, MoonshotAI and StepFun
//! - Ollama (local)
//! - Google Gemini
//! - Baidu ERNIE
//! - Alibaba Tongyi
//! - iFlytek Spark
//! - Kunlun Tiangong
//!
//! Use [`dispatch`] to route a provider id to its adapter.

pub mod budget;
pub mod dispatch;
pub mod error;
pub mod files;
pub mod message;
pub mod model;
pub mod normalize;
pub mod options;
pub mod plugin;
pub mod session;
pub mod stream;
pub mod token;
pub mod transport;

pub mod gemini;
pub mod ollama;
pub mod openai;

// OpenAI-compatible providers
pub mod deepseek;
pub mod moonshot;
pub mod stepfun;
pub mod zhipu;

// Providers with their own protocols
pub mod ernie;
pub mod spark;
pub mod tiangong;
pub mod tongyi;

pub use dispatch::{resolve, Adapter, Operation, Provider};
pub use error::{DispatchError, ProviderError, ProviderResult};
pub use files::{FileStore, LocalFileStore};
pub use message::{ChatMessage, Role};
pub use model::{capabilities, ModelCapabilities, ModelInfo};
pub use options::{ChatOptions, Credentials, DrawingOptions, SpeechOptions, DEFAULT_CONTEXT_SIZE};
pub use plugin::{ChatPlugin, ParameterKind, PluginParameter, ScriptExecutor};
pub use session::{AnswerEvent, AnswerHandler, DrawingEvent, DrawingHandler, SessionCheck};
pub use token::{EstimateTokens, TokenEstimator};
