//! Gemini adapter tests.

use std::sync::Arc;

use omnichat_provider::{gemini, ChatMessage, ChatOptions, Credentials};
use omnichat_test_utils::{fixtures, MemoryFileStore, RecordingAnswerHandler};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(payloads: &[Value]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(fixtures::sse_json(payloads))
}

fn candidate(text: &str) -> Value {
    json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
}

fn options(server: &MockServer, handler: Arc<RecordingAnswerHandler>) -> ChatOptions {
    ChatOptions::new("ses_g", handler)
        .with_credentials(
            Credentials::default()
                .with_api_key("g-key")
                .with_base_url(server.uri()),
        )
        .with_model("gemini-1.5-pro")
}

async fn first_body(server: &MockServer) -> Value {
    server.received_requests().await.unwrap()[0]
        .body_json()
        .unwrap()
}

#[tokio::test]
async fn test_streams_candidates_with_key_in_query() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-pro:streamGenerateContent"))
        .and(query_param("key", "g-key"))
        .and(query_param("alt", "sse"))
        .respond_with(sse(&[candidate("Bonjour"), candidate(" !")]))
        .expect(1)
        .mount(&server)
        .await;

    let handler = RecordingAnswerHandler::new();
    let options = options(&server, handler.clone())
        .with_instruction("Answer in French")
        .with_max_tokens(Some(256))
        .with_messages(vec![
            ChatMessage::user("Hello"),
            ChatMessage::assistant("Salut"),
            ChatMessage::user("How are you?"),
        ]);
    gemini::chat(options).await;

    handler.assert_discipline();
    assert_eq!(handler.text(), "Bonjour !");

    let body = first_body(&server).await;
    let contents = body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(
        contents[2]["parts"][0]["text"],
        "Answer in French\nHow are you?"
    );
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_image_turn_drops_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(&[candidate("A cat.")]))
        .mount(&server)
        .await;

    let files = Arc::new(MemoryFileStore::new().with_file("/img/cat.jpg", b"cat".to_vec()));
    let handler = RecordingAnswerHandler::new();
    let options = options(&server, handler.clone())
        .with_files(files)
        .with_messages(vec![
            ChatMessage::user("Earlier question"),
            ChatMessage::assistant("Earlier answer"),
            ChatMessage::user("What is this?").with_image("/img/cat.jpg"),
        ]);
    gemini::chat(options).await;

    assert_eq!(handler.end_error(), None);
    let body = first_body(&server).await;
    let contents = body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0]["parts"][0]["text"], "What is this?");
    assert_eq!(contents[0]["parts"][1]["inline_data"]["data"], "Y2F0");
    assert_eq!(
        contents[0]["parts"][1]["inline_data"]["mime_type"],
        "image/jpeg"
    );
}

#[tokio::test]
async fn test_block_reason_ends_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(&[json!({"promptFeedback": {"blockReason": "SAFETY"}})]))
        .mount(&server)
        .await;

    let handler = RecordingAnswerHandler::new();
    gemini::chat(options(&server, handler.clone()).with_messages(vec![ChatMessage::user("x")]))
        .await;

    handler.assert_discipline();
    assert_eq!(handler.end_error().as_deref(), Some("block reason: SAFETY"));
}

#[tokio::test]
async fn test_rejected_request_reports_error_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": {"code": 400, "message": "API key not valid"}})),
        )
        .mount(&server)
        .await;

    let handler = RecordingAnswerHandler::new();
    gemini::chat(options(&server, handler.clone()).with_messages(vec![ChatMessage::user("x")]))
        .await;

    assert_eq!(handler.end_count(), 1);
    assert_eq!(handler.end_error().as_deref(), Some("API key not valid"));
}

#[tokio::test]
async fn test_leading_assistant_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(&[candidate("ok")]))
        .mount(&server)
        .await;

    let handler = RecordingAnswerHandler::new();
    let options = options(&server, handler.clone()).with_messages(vec![
        ChatMessage::assistant("Welcome!"),
        ChatMessage::user("Hi"),
    ]);
    gemini::chat(options).await;

    let body = first_body(&server).await;
    let contents = body["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0]["role"], "user");
}
