//! ZhipuAI chat and CogView drawing adapters (OpenAI-compatible).
//!
//! CogView answers with either a URL or inline base64 per image; both are
//! saved locally.

use crate::dispatch::Provider;
use crate::openai::{self, CompatProfile, ImageEncoding};
use crate::options::{ChatOptions, DrawingOptions};

pub const PROFILE: CompatProfile = CompatProfile {
    kind: Provider::ZhipuAI,
    provider: "ZhipuAI",
    base_url: "https://open.bigmodel.cn/api/paas/v4",
    default_model: "glm-4",
    images: ImageEncoding::RawBase64,
    plugins: true,
    image_model: "cogview-3",
    image_options: false,
};

pub async fn chat(options: ChatOptions) {
    openai::chat_with(&PROFILE, options).await
}

pub async fn drawing(options: DrawingOptions) {
    openai::drawing_with(&PROFILE, options).await
}
