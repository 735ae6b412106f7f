//! Server-Sent-Events client.
//!
//! Opening validates the handshake: a non-success status or a content type
//! other than `text/event-stream` fails with the response body as the error
//! message. There is no retry or reconnect of any kind; a transport error ends
//! the stream with an error and a clean EOF ends it successfully.

use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::{cancellable, Flow};
use crate::error::{ProviderError, ProviderResult};

pub use eventsource_stream::Event as SseEvent;

const EVENT_STREAM: &str = "text/event-stream";

/// An open event stream.
pub struct SseStream {
    events: BoxStream<'static, Result<SseEvent, EventStreamError<reqwest::Error>>>,
}

impl std::fmt::Debug for SseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseStream").finish_non_exhaustive()
    }
}

/// Send `request` and validate that the response is an event stream.
pub async fn open(
    request: reqwest::RequestBuilder,
    abort: &CancellationToken,
    provider: &str,
) -> ProviderResult<SseStream> {
    let response = cancellable(abort, async { Ok(request.send().await?) }).await?;
    let status = response.status();
    let is_event_stream = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(EVENT_STREAM));

    if !status.is_success() || !is_event_stream {
        let text =
            cancellable(abort, async { Ok(response.text().await.unwrap_or_default()) }).await?;
        warn!(provider, status = status.as_u16(), body = %text, "Event stream rejected");
        return Err(ProviderError::api_error(status.as_u16(), text));
    }

    Ok(SseStream {
        events: response.bytes_stream().eventsource().boxed(),
    })
}

/// Deliver each event to `on_event` until EOF, an error, or `Flow::Stop`.
pub async fn for_each_event<F>(
    mut stream: SseStream,
    abort: &CancellationToken,
    mut on_event: F,
) -> ProviderResult<()>
where
    F: FnMut(&SseEvent) -> ProviderResult<Flow>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(ProviderError::Cancelled),
            next = stream.events.next() => next,
        };

        match next {
            None => return Ok(()),
            Some(Ok(event)) => {
                trace!(event = %event.event, data = %event.data, "SSE event");
                if on_event(&event)? == Flow::Stop {
                    return Ok(());
                }
            }
            Some(Err(EventStreamError::Transport(e))) => return Err(e.into()),
            Some(Err(e)) => return Err(ProviderError::malformed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::http_client;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(status: u16, content_type: &str, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(status)
                    .insert_header("content-type", content_type)
                    .set_body_string(body.to_string()),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_reads_events_until_eof() {
        let server = serve(
            200,
            "text/event-stream",
            "data: one\n\nevent: custom\ndata: two\n\n",
        )
        .await;
        let abort = CancellationToken::new();
        let stream = open(http_client().post(server.uri()), &abort, "test")
            .await
            .unwrap();

        let mut seen = Vec::new();
        for_each_event(stream, &abort, |event| {
            seen.push((event.event.clone(), event.data.clone()));
            Ok(Flow::Continue)
        })
        .await
        .unwrap();

        assert_eq!(
            seen,
            vec![
                ("message".to_string(), "one".to_string()),
                ("custom".to_string(), "two".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_ends_early() {
        let server = serve(200, "text/event-stream", "data: 1\n\ndata: 2\n\n").await;
        let abort = CancellationToken::new();
        let stream = open(http_client().post(server.uri()), &abort, "test")
            .await
            .unwrap();

        let mut count = 0;
        for_each_event(stream, &abort, |_| {
            count += 1;
            Ok(Flow::Stop)
        })
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let server = serve(200, "text/event-stream", "data: {bad\n\n").await;
        let abort = CancellationToken::new();
        let stream = open(http_client().post(server.uri()), &abort, "test")
            .await
            .unwrap();
        let err = for_each_event(stream, &abort, |event| {
            Err(ProviderError::malformed(event.data.clone()))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("{bad"));
    }

    #[tokio::test]
    async fn test_error_status_is_rejected_with_body() {
        let server = serve(400, "application/json", r#"{"error":"bad request"}"#).await;
        let err = open(
            http_client().post(server.uri()),
            &CancellationToken::new(),
            "test",
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::ApiError { status: 400, ref message } if message.contains("bad request")
        ));
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_rejected() {
        let server = serve(200, "application/json", r#"{"error_msg":"token expired"}"#).await;
        let err = open(
            http_client().post(server.uri()),
            &CancellationToken::new(),
            "test",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("token expired"));
    }

    #[tokio::test]
    async fn test_cancel_before_open() {
        let server = serve(200, "text/event-stream", "data: x\n\n").await;
        let abort = CancellationToken::new();
        abort.cancel();
        let err = open(http_client().post(server.uri()), &abort, "test")
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
