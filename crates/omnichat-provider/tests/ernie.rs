//! ERNIE adapter tests.

use std::sync::Arc;

use omnichat_provider::{ernie, ChatMessage, ChatOptions, Credentials, DrawingOptions};
use omnichat_test_utils::mocks::SavedFile;
use omnichat_test_utils::{
    fixtures, MemoryFileStore, RecordingAnswerHandler, RecordingDrawingHandler,
};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credentials(server: &MockServer) -> Credentials {
    Credentials::default()
        .with_api_key("ak")
        .with_secret_key("sk")
        .with_base_url(server.uri())
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/oauth/2.0/token"))
        .and(query_param("grant_type", "client_credentials"))
        .and(query_param("client_id", "ak"))
        .and(query_param("client_secret", "sk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1",
            "expires_in": 2592000,
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_token_exchange_then_stream() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/rpc/2.0/ai_custom/v1/wenxinworkshop/chat/completions_pro"))
        .and(query_param("access_token", "tok-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(fixtures::sse_json(&[
                    json!({"result": "你好", "is_end": false}),
                    json!({"result": "！", "is_end": true}),
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let handler = RecordingAnswerHandler::new();
    let options = ChatOptions::new("ses_e", handler.clone())
        .with_credentials(credentials(&server))
        .with_model("ERNIE-4.0")
        .with_instruction("Be polite")
        .with_messages(vec![ChatMessage::user("Hello")]);
    ernie::chat(options).await;

    handler.assert_discipline();
    assert_eq!(handler.text(), "你好！");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = requests[1].body_json().unwrap();
    assert_eq!(body["messages"][0]["content"], "Be polite\nHello");
    assert_eq!(body["stream"], true);
}

#[tokio::test]
async fn test_missing_secret_key_makes_no_request() {
    let server = MockServer::start().await;
    let handler = RecordingAnswerHandler::new();
    let options = ChatOptions::new("ses_e", handler.clone())
        .with_credentials(
            Credentials::default()
                .with_api_key("ak")
                .with_base_url(server.uri()),
        )
        .with_messages(vec![ChatMessage::user("Hello")]);
    ernie::chat(options).await;

    assert_eq!(
        handler.end_error().as_deref(),
        Some("ERNIE: missing required secret key")
    );
    assert!(!handler.started());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_json_error_instead_of_stream() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_code": 336003,
            "error_msg": "the length of messages must be an odd number",
        })))
        .mount(&server)
        .await;

    let handler = RecordingAnswerHandler::new();
    let options = ChatOptions::new("ses_e", handler.clone())
        .with_credentials(credentials(&server))
        .with_messages(vec![ChatMessage::user("Hello")]);
    ernie::chat(options).await;

    assert_eq!(
        handler.end_error().as_deref(),
        Some("the length of messages must be an odd number")
    );
}

#[tokio::test]
async fn test_sd_xl_drawing_saves_base64() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/rpc/2.0/ai_custom/v1/wenxinworkshop/text2image/sd_xl"))
        .and(query_param("access_token", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "b64_image": "Y2F0"}],
        })))
        .mount(&server)
        .await;

    let files = Arc::new(MemoryFileStore::new());
    let handler = RecordingDrawingHandler::new();
    let options = DrawingOptions::new("ses_d", "a cat", handler.clone())
        .with_credentials(credentials(&server))
        .with_size("768x768")
        .with_files(files.clone());
    ernie::drawing(options).await;

    handler.assert_discipline();
    assert_eq!(handler.images().unwrap().len(), 1);
    assert!(matches!(&files.saved()[0], SavedFile::Bytes { bytes, .. } if bytes == b"cat"));
}
