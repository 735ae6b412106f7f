//! StepFun chat adapter (OpenAI-compatible).

use crate::dispatch::Provider;
use crate::openai::{self, CompatProfile, ImageEncoding};
use crate::options::ChatOptions;

pub const PROFILE: CompatProfile = CompatProfile {
    kind: Provider::StepFun,
    provider: "StepFun",
    base_url: "https://api.stepfun.com/v1",
    default_model: "step-1-8k",
    images: ImageEncoding::DataUrl,
    plugins: true,
    image_model: "",
    image_options: false,
};

pub async fn chat(options: ChatOptions) {
    openai::chat_with(&PROFILE, options).await
}
