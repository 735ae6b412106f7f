//! MoonshotAI chat adapter (OpenAI-compatible, text only).

use crate::dispatch::Provider;
use crate::openai::{self, CompatProfile, ImageEncoding};
use crate::options::ChatOptions;

pub const PROFILE: CompatProfile = CompatProfile {
    kind: Provider::MoonshotAI,
    provider: "MoonshotAI",
    base_url: "https://api.moonshot.cn/v1",
    default_model: "moonshot-v1-8k",
    images: ImageEncoding::TextOnly,
    plugins: false,
    image_model: "",
    image_options: false,
};

pub async fn chat(options: ChatOptions) {
    openai::chat_with(&PROFILE, options).await
}
