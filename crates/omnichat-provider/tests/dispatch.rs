//! Routing through the dispatch table.

use omnichat_provider::dispatch::{self, Operation, Provider};
use omnichat_provider::{ChatMessage, ChatOptions, Credentials, DispatchError, SpeechOptions};
use omnichat_test_utils::{fixtures, RecordingAnswerHandler};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_chat_routes_by_provider_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(fixtures::ndjson_body(&[
            json!({"message": {"role": "assistant", "content": "routed"}, "done": true}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let handler = RecordingAnswerHandler::new();
    let options = ChatOptions::new("ses", handler.clone())
        .with_credentials(Credentials::default().with_base_url(server.uri()))
        .with_messages(vec![ChatMessage::user("x")]);
    dispatch::chat("ollama", options).await.unwrap();

    assert_eq!(handler.text(), "routed");
}

#[tokio::test]
async fn test_unknown_provider_is_synchronous_error() {
    let handler = RecordingAnswerHandler::new();
    let options = ChatOptions::new("ses", handler.clone());
    let err = dispatch::chat("Foo", options).await.unwrap_err();

    assert_eq!(err, DispatchError::UnsupportedProvider("Foo".to_string()));
    assert!(handler.events().is_empty());
}

#[tokio::test]
async fn test_speech_unsupported_outside_openai() {
    let err = dispatch::speech("Tongyi", SpeechOptions::new("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::UnsupportedOperation { .. }));
}

#[test]
fn test_support_matrix() {
    let matrix: Vec<(Provider, bool, bool, bool)> = Provider::ALL
        .into_iter()
        .map(|p| {
            (
                p,
                p.supports(Operation::Chat),
                p.supports(Operation::Drawing),
                p.supports(Operation::Speech),
            )
        })
        .collect();
    assert_eq!(matrix.len(), 11);
    assert!(matrix.iter().all(|(_, chat, _, _)| *chat));
    assert_eq!(matrix.iter().filter(|(_, _, _, speech)| *speech).count(), 1);
}
