//! DeepSeek chat adapter (OpenAI-compatible).

use crate::dispatch::Provider;
use crate::openai::{self, CompatProfile, ImageEncoding};
use crate::options::ChatOptions;

pub const PROFILE: CompatProfile = CompatProfile {
    kind: Provider::DeepSeek,
    provider: "DeepSeek",
    base_url: "https://api.deepseek.com/v1",
    default_model: "deepseek-chat",
    images: ImageEncoding::RawBase64,
    plugins: true,
    image_model: "",
    image_options: false,
};

pub async fn chat(options: ChatOptions) {
    openai::chat_with(&PROFILE, options).await
}
