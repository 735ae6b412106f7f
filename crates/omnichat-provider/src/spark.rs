//! iFlytek Spark chat and drawing adapters.
//!
//! Chat runs over a WebSocket whose URL carries an HMAC-SHA256 signature of
//! the host, date and request line. Drawing posts to a URL signed the same
//! way and receives the image inline as base64.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, info, Instrument};
use url::Url;

use crate::error::{ProviderError, ProviderResult};
use crate::files::image_file_name;
use crate::options::{ChatOptions, DrawingOptions};
use crate::session::AnswerSession;
use crate::transport::ws::WsSession;
use crate::transport::{self, cancellable, http_client, Flow};

const PROVIDER: &str = "Spark";
pub const DEFAULT_CHAT_URL: &str = "wss://spark-api.xf-yun.com";
pub const DEFAULT_IMAGE_URL: &str = "https://spark-api.cn-huabei-1.xf-yun.com";
const DEFAULT_MODEL: &str = "v3.5";
const MAX_TOKENS: u32 = 4096;
const USER_ID: &str = "omnichat";

pub async fn chat(options: ChatOptions) {
    let session = options.session();
    let result = stream_chat(&options, &session)
        .instrument(options.span())
        .await;
    session.finish(result);
}

pub async fn drawing(options: DrawingOptions) {
    let session = options.session();
    let result = generate_image(&options).instrument(options.span()).await;
    session.finish(result);
}

/// The `domain` parameter the service expects for a model version.
pub fn domain(model: &str) -> String {
    match model {
        "v1.1" => "general".to_string(),
        "v2.1" => "generalv2".to_string(),
        "v3.1" => "generalv3".to_string(),
        "v3.5" => "generalv3.5".to_string(),
        "v4.0" => "4.0Ultra".to_string(),
        other => match other.chars().nth(1) {
            Some(major) => format!("generalv{major}"),
            None => "general".to_string(),
        },
    }
}

/// Sign `url` for `method`, returning it with the `authorization`, `date`
/// and `host` query parameters appended.
pub fn sign_url(
    url: &str,
    method: &str,
    api_key: &str,
    api_secret: &str,
    now: DateTime<Utc>,
) -> ProviderResult<String> {
    let parsed = Url::parse(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ProviderError::internal(format!("no host in {url}")))?;
    let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();

    let origin = format!("host: {host}\ndate: {date}\n{method} {} HTTP/1.1", parsed.path());
    let mut mac = Hmac::<Sha256>::new_from_slice(api_secret.as_bytes())
        .map_err(|e| ProviderError::internal(e.to_string()))?;
    mac.update(origin.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    let authorization = STANDARD.encode(format!(
        r#"api_key="{api_key}", algorithm="hmac-sha256", headers="host date request-line", signature="{signature}""#
    ));

    Ok(format!(
        "{url}?authorization={}&date={}&host={}",
        urlencoding::encode(&authorization),
        urlencoding::encode(&date),
        urlencoding::encode(host)
    ))
}

async fn stream_chat(options: &ChatOptions, session: &AnswerSession) -> ProviderResult<()> {
    let app_id = options.credentials.require_app_id(PROVIDER)?;
    let api_key = options.credentials.require_api_key(PROVIDER)?;
    let api_secret = options.credentials.require_secret_key(PROVIDER)?;
    let abort = options.abort_token();
    let model = options.model_or(DEFAULT_MODEL);

    let base_url = options.credentials.base_url_or(DEFAULT_CHAT_URL);
    let url = sign_url(
        &format!("{base_url}/{model}/chat"),
        "GET",
        api_key,
        api_secret,
        Utc::now(),
    )?;

    let history = options.prepared_history_inline(session);
    let text: Vec<_> = history
        .iter()
        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
        .collect();
    let request = json!({
        "header": {"app_id": app_id, "uid": USER_ID},
        "parameter": {"chat": {
            "domain": domain(model),
            "temperature": 0.5,
            "max_tokens": options.max_tokens.unwrap_or(MAX_TOKENS),
        }},
        "payload": {"message": {"text": text}},
    });

    debug!(model, messages = text.len(), "Opening Spark session");
    let mut socket = WsSession::connect(&url, &abort).await?;
    socket.send_text(request.to_string()).await?;
    session.start();

    socket
        .for_each_message(&abort, |frame| {
            let frame: ChatFrame =
                serde_json::from_str(frame).map_err(|_| ProviderError::malformed(frame))?;
            if frame.header.code != 0 {
                return Err(ProviderError::reported(frame.header.message));
            }
            let Some(choices) = frame.payload.and_then(|p| p.choices) else {
                return Err(ProviderError::reported("no answer"));
            };
            for text in &choices.text {
                session.append(&text.content);
            }
            Ok(if choices.status == 2 { Flow::Stop } else { Flow::Continue })
        })
        .await
}

async fn generate_image(options: &DrawingOptions) -> ProviderResult<Vec<String>> {
    let app_id = options.credentials.require_app_id(PROVIDER)?;
    let api_key = options.credentials.require_api_key(PROVIDER)?;
    let api_secret = options.credentials.require_secret_key(PROVIDER)?;
    let abort = options.abort_token();

    let base_url = options.credentials.base_url_or(DEFAULT_IMAGE_URL);
    let url = sign_url(
        &format!("{base_url}/v2.1/tti"),
        "POST",
        api_key,
        api_secret,
        Utc::now(),
    )?;
    let (width, height) = options.dimensions().unwrap_or((512, 512));
    let body = json!({
        "header": {"app_id": app_id},
        "parameter": {"chat": {"domain": "general", "width": width, "height": height}},
        "payload": {"message": {"text": [{"role": "user", "content": options.prompt}]}},
    });

    debug!(width, height, "Sending Spark image request");
    let response: ImageResponse =
        transport::send_json(http_client().post(url).json(&body), &abort, PROVIDER).await?;
    if response.header.code != 0 {
        return Err(ProviderError::reported(response.header.message));
    }
    let data = response
        .payload
        .and_then(|p| p.choices)
        .and_then(|c| c.text.into_iter().next())
        .map(|t| t.content)
        .ok_or_else(|| ProviderError::invalid_response("no image in response"))?;

    let file_name = image_file_name();
    let path = cancellable(&abort, options.files.save_from_base64(&data, &file_name)).await?;
    info!(%path, "Image saved");
    Ok(vec![path])
}

#[derive(Debug, Deserialize)]
struct Header {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    choices: Option<Choices>,
}

#[derive(Debug, Deserialize)]
struct Choices {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    text: Vec<Text>,
}

#[derive(Debug, Deserialize)]
struct Text {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatFrame {
    header: Header,
    #[serde(default)]
    payload: Option<Payload>,
}

type ImageResponse = ChatFrame;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_domain_mapping() {
        assert_eq!(domain("v1.1"), "general");
        assert_eq!(domain("v2.1"), "generalv2");
        assert_eq!(domain("v3.1"), "generalv3");
        assert_eq!(domain("v3.5"), "generalv3.5");
        assert_eq!(domain("v4.0"), "4.0Ultra");
        assert_eq!(domain("v5.0"), "generalv5");
    }

    #[test]
    fn test_sign_url_shape() {
        let now = Utc.with_ymd_and_hms(2024, 5, 14, 8, 30, 0).unwrap();
        let signed = sign_url(
            "wss://spark-api.xf-yun.com/v3.5/chat",
            "GET",
            "key",
            "secret",
            now,
        )
        .unwrap();

        let parsed = Url::parse(&signed).unwrap();
        let query: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(query["date"], "Tue, 14 May 2024 08:30:00 GMT");
        assert_eq!(query["host"], "spark-api.xf-yun.com");

        let authorization =
            String::from_utf8(STANDARD.decode(&query["authorization"]).unwrap()).unwrap();
        assert!(authorization.starts_with(r#"api_key="key", algorithm="hmac-sha256""#));
        assert!(authorization.contains(r#"headers="host date request-line""#));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let now = Utc.with_ymd_and_hms(2024, 5, 14, 8, 30, 0).unwrap();
        let url = "https://spark-api.cn-huabei-1.xf-yun.com/v2.1/tti";
        let a = sign_url(url, "POST", "k", "s", now).unwrap();
        let b = sign_url(url, "POST", "k", "s", now).unwrap();
        let c = sign_url(url, "GET", "k", "s", now).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_error_frame() {
        let frame: ChatFrame = serde_json::from_str(
            r#"{"header":{"code":10013,"message":"input content audit failed","sid":"x","status":2}}"#,
        )
        .unwrap();
        assert_eq!(frame.header.code, 10013);
        assert!(frame.payload.is_none());
    }
}
