//! Transport helpers shared by the adapters.
//!
//! - `sse`: Server-Sent-Events over an HTTP response, never reconnecting
//! - `ndjson`: newline-delimited JSON over a chunked HTTP response
//! - `ws`: a WebSocket session
//! - `poll`: a fixed-interval polling loop for asynchronous tasks
//!
//! Every helper races the caller's cancellation token and reports a fired
//! token as [`ProviderError::Cancelled`].

pub mod ndjson;
pub mod poll;
pub mod sse;
pub mod ws;

use std::future::Future;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::{ProviderError, ProviderResult};

/// Whether a streaming consumer wants more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// HTTP client for one call.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("omnichat/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Run `fut` unless `abort` fires first.
pub async fn cancellable<T>(
    abort: &CancellationToken,
    fut: impl Future<Output = ProviderResult<T>>,
) -> ProviderResult<T> {
    tokio::select! {
        biased;
        _ = abort.cancelled() => Err(ProviderError::Cancelled),
        result = fut => result,
    }
}

/// Turn a non-success response into an [`ProviderError::ApiError`] carrying
/// the body text.
pub async fn expect_success(
    response: reqwest::Response,
    provider: &str,
) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    warn!(provider, status = status.as_u16(), body = %text, "Error response");
    Err(ProviderError::api_error(status.as_u16(), text))
}

/// Send a request and decode a JSON response body.
pub async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    abort: &CancellationToken,
    provider: &str,
) -> ProviderResult<T> {
    cancellable(abort, async {
        let response = expect_success(request.send().await?, provider).await?;
        let text = response.text().await?;
        trace!(provider, body = %text, "Response body");
        serde_json::from_str(&text).map_err(|_| ProviderError::malformed(text))
    })
    .await
}

/// The first string found at one of the JSON `pointers` in `body`.
pub fn extract_message(body: &str, pointers: &[&str]) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    pointers
        .iter()
        .find_map(|p| value.pointer(p)?.as_str().map(str::to_string))
}

/// Replace an [`ProviderError::ApiError`] whose body carries the provider's
/// own error text with that text.
pub fn reported_from_body(err: ProviderError, pointers: &[&str]) -> ProviderError {
    match err {
        ProviderError::ApiError { status, message } => match extract_message(&message, pointers) {
            Some(text) => ProviderError::reported(text),
            None => ProviderError::ApiError { status, message },
        },
        other => other,
    }
}
