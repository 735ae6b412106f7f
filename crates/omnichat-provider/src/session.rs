//! Session event delivery.
//!
//! Every chat call reports through an [`AnswerHandler`] with the sequence
//! `start, append*, end`, and every drawing call through a [`DrawingHandler`]
//! with `image_generated?, end`. The session types here enforce the
//! discipline so adapters cannot get it wrong:
//!
//! - `start` is delivered at most once and always before the first `append`;
//! - `end` is delivered exactly once because [`AnswerSession::finish`] consumes
//!   the session;
//! - once the cancellation token fires, or the [`SessionCheck`] reports the
//!   session is no longer current, nothing more is delivered, not even `end`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};

/// Receives the incremental answer of a chat call.
pub trait AnswerHandler: Send + Sync {
    fn start_answer(&self, session_id: &str);

    fn append_answer(&self, session_id: &str, delta: &str);

    /// Terminal event. `error` is `None` on success.
    fn end(&self, session_id: &str, error: Option<&str>);

    /// The context window had to shrink to fit the token ceiling.
    fn context_shrunk(&self, _session_id: &str, _new_len: usize) {}
}

/// Receives the result of a drawing call.
pub trait DrawingHandler: Send + Sync {
    /// Local paths of the saved images.
    fn image_generated(&self, session_id: &str, paths: &[String]);

    /// Terminal event. `error` is `None` on success.
    fn end(&self, session_id: &str, error: Option<&str>);
}

/// Predicate telling whether a session is still the one the caller cares
/// about, e.g. the conversation is still on screen.
pub type SessionCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Chat events as plain values, for callers that prefer a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerEvent {
    Start { session_id: String },
    Append { session_id: String, delta: String },
    ContextShrunk { session_id: String, new_len: usize },
    End { session_id: String, error: Option<String> },
}

impl AnswerHandler for UnboundedSender<AnswerEvent> {
    fn start_answer(&self, session_id: &str) {
        let _ = self.send(AnswerEvent::Start {
            session_id: session_id.to_string(),
        });
    }

    fn append_answer(&self, session_id: &str, delta: &str) {
        let _ = self.send(AnswerEvent::Append {
            session_id: session_id.to_string(),
            delta: delta.to_string(),
        });
    }

    fn end(&self, session_id: &str, error: Option<&str>) {
        let _ = self.send(AnswerEvent::End {
            session_id: session_id.to_string(),
            error: error.map(str::to_string),
        });
    }

    fn context_shrunk(&self, session_id: &str, new_len: usize) {
        let _ = self.send(AnswerEvent::ContextShrunk {
            session_id: session_id.to_string(),
            new_len,
        });
    }
}

/// Drawing events as plain values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawingEvent {
    ImageGenerated { session_id: String, paths: Vec<String> },
    End { session_id: String, error: Option<String> },
}

impl DrawingHandler for UnboundedSender<DrawingEvent> {
    fn image_generated(&self, session_id: &str, paths: &[String]) {
        let _ = self.send(DrawingEvent::ImageGenerated {
            session_id: session_id.to_string(),
            paths: paths.to_vec(),
        });
    }

    fn end(&self, session_id: &str, error: Option<&str>) {
        let _ = self.send(DrawingEvent::End {
            session_id: session_id.to_string(),
            error: error.map(str::to_string),
        });
    }
}

/// Liveness shared by both session kinds.
#[derive(Clone)]
struct Liveness {
    session_id: String,
    abort: Option<CancellationToken>,
    check: Option<SessionCheck>,
}

impl Liveness {
    fn is_live(&self) -> bool {
        if self.abort.as_ref().is_some_and(|t| t.is_cancelled()) {
            return false;
        }
        self.check
            .as_ref()
            .map_or(true, |check| check(&self.session_id))
    }

    /// Map a finished call to the `end` payload, or `None` when no `end`
    /// should be delivered at all.
    fn end_payload(&self, result: &ProviderResult<()>) -> Option<Option<String>> {
        if !self.is_live() {
            debug!(session_id = %self.session_id, "Session no longer live, suppressing end");
            return None;
        }
        match result {
            Ok(()) => Some(None),
            Err(ProviderError::Cancelled) => None,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Session ended with error");
                Some(Some(e.to_string()))
            }
        }
    }
}

/// Event emitter for one chat call.
pub struct AnswerSession {
    live: Liveness,
    handler: Arc<dyn AnswerHandler>,
    started: AtomicBool,
}

impl AnswerSession {
    pub fn new(
        session_id: impl Into<String>,
        handler: Arc<dyn AnswerHandler>,
        abort: Option<CancellationToken>,
        check: Option<SessionCheck>,
    ) -> Self {
        Self {
            live: Liveness {
                session_id: session_id.into(),
                abort,
                check,
            },
            handler,
            started: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.live.session_id
    }

    pub fn is_live(&self) -> bool {
        self.live.is_live()
    }

    /// Deliver `start` unless it was already delivered.
    pub fn start(&self) {
        if !self.is_live() {
            return;
        }
        if !self.started.swap(true, Ordering::SeqCst) {
            self.handler.start_answer(self.session_id());
        }
    }

    /// Deliver a delta, starting the answer first if needed. Empty deltas are
    /// dropped.
    pub fn append(&self, delta: &str) {
        if delta.is_empty() || !self.is_live() {
            return;
        }
        self.start();
        self.handler.append_answer(self.session_id(), delta);
    }

    pub fn context_shrunk(&self, new_len: usize) {
        if self.is_live() {
            self.handler.context_shrunk(self.session_id(), new_len);
        }
    }

    /// Deliver the terminal `end`. A successful call that never produced
    /// content still reports `start` first.
    pub fn finish(self, result: ProviderResult<()>) {
        let Some(error) = self.live.end_payload(&result) else {
            return;
        };
        if error.is_none() {
            self.start();
        }
        self.handler.end(self.session_id(), error.as_deref());
    }
}

/// Event emitter for one drawing call.
pub struct DrawingSession {
    live: Liveness,
    handler: Arc<dyn DrawingHandler>,
}

impl DrawingSession {
    pub fn new(
        session_id: impl Into<String>,
        handler: Arc<dyn DrawingHandler>,
        abort: Option<CancellationToken>,
        check: Option<SessionCheck>,
    ) -> Self {
        Self {
            live: Liveness {
                session_id: session_id.into(),
                abort,
                check,
            },
            handler,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.live.session_id
    }

    pub fn is_live(&self) -> bool {
        self.live.is_live()
    }

    /// Deliver the saved images and end the session successfully.
    pub fn deliver(self, paths: Vec<String>) {
        if !self.is_live() {
            return;
        }
        self.handler.image_generated(self.session_id(), &paths);
        self.handler.end(self.session_id(), None);
    }

    /// End the session with a failure (or silently if it is no longer live).
    pub fn fail(self, error: ProviderError) {
        if let Some(payload) = self.live.end_payload(&Err(error)) {
            self.handler.end(self.session_id(), payload.as_deref());
        }
    }

    /// Finish from a drawing result.
    pub fn finish(self, result: ProviderResult<Vec<String>>) {
        match result {
            Ok(paths) => self.deliver(paths),
            Err(e) => self.fail(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn channel_session(
        abort: Option<CancellationToken>,
        check: Option<SessionCheck>,
    ) -> (AnswerSession, mpsc::UnboundedReceiver<AnswerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel::<AnswerEvent>();
        (AnswerSession::new("ses_1", Arc::new(tx), abort, check), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AnswerEvent>) -> Vec<AnswerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_start_append_end() {
        let (session, mut rx) = channel_session(None, None);
        session.append("Hel");
        session.start();
        session.append("lo");
        session.finish(Ok(()));

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                AnswerEvent::Start {
                    session_id: "ses_1".into()
                },
                AnswerEvent::Append {
                    session_id: "ses_1".into(),
                    delta: "Hel".into()
                },
                AnswerEvent::Append {
                    session_id: "ses_1".into(),
                    delta: "lo".into()
                },
                AnswerEvent::End {
                    session_id: "ses_1".into(),
                    error: None
                },
            ]
        );
    }

    #[test]
    fn test_error_before_start_is_end_only() {
        let (session, mut rx) = channel_session(None, None);
        session.finish(Err(ProviderError::missing("OpenAI", "API key")));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            AnswerEvent::End { error: Some(e), .. } => assert!(e.contains("API key")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_success_without_content_still_starts() {
        let (session, mut rx) = channel_session(None, None);
        session.finish(Ok(()));
        let events = drain(&mut rx);
        assert!(matches!(events[0], AnswerEvent::Start { .. }));
        assert!(matches!(events[1], AnswerEvent::End { error: None, .. }));
    }

    #[test]
    fn test_empty_delta_is_dropped() {
        let (session, mut rx) = channel_session(None, None);
        session.append("");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_cancellation_silences_everything() {
        let token = CancellationToken::new();
        let (session, mut rx) = channel_session(Some(token.clone()), None);
        session.append("a");
        token.cancel();
        session.append("b");
        session.finish(Ok(()));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], AnswerEvent::Append { ref delta, .. } if delta == "a"));
    }

    #[test]
    fn test_cancelled_error_is_silent() {
        let (session, mut rx) = channel_session(None, None);
        session.start();
        session.finish(Err(ProviderError::Cancelled));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_stale_session_is_silent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let check: SessionCheck = Arc::new(move |id| {
            counter.fetch_add(1, Ordering::SeqCst);
            id == "ses_other"
        });
        let (session, mut rx) = channel_session(None, Some(check));
        session.append("x");
        session.finish(Ok(()));
        assert!(drain(&mut rx).is_empty());
        assert!(calls.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_context_shrunk_event() {
        let (session, mut rx) = channel_session(None, None);
        session.context_shrunk(3);
        assert_eq!(
            drain(&mut rx),
            vec![AnswerEvent::ContextShrunk {
                session_id: "ses_1".into(),
                new_len: 3
            }]
        );
    }

    #[test]
    fn test_drawing_session_deliver() {
        let (tx, mut rx) = mpsc::unbounded_channel::<DrawingEvent>();
        let session = DrawingSession::new("ses_d", Arc::new(tx), None, None);
        session.deliver(vec!["/tmp/a.png".into()]);

        assert_eq!(
            rx.try_recv().unwrap(),
            DrawingEvent::ImageGenerated {
                session_id: "ses_d".into(),
                paths: vec!["/tmp/a.png".into()]
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            DrawingEvent::End {
                session_id: "ses_d".into(),
                error: None
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drawing_session_fail() {
        let (tx, mut rx) = mpsc::unbounded_channel::<DrawingEvent>();
        let session = DrawingSession::new("ses_d", Arc::new(tx), None, None);
        session.finish(Err(ProviderError::reported("task error")));
        assert_eq!(
            rx.try_recv().unwrap(),
            DrawingEvent::End {
                session_id: "ses_d".into(),
                error: Some("task error".into())
            }
        );
    }

    #[test]
    fn test_drawing_session_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel::<DrawingEvent>();
        let token = CancellationToken::new();
        token.cancel();
        let session = DrawingSession::new("ses_d", Arc::new(tx), Some(token), None);
        session.deliver(vec!["/tmp/a.png".into()]);
        assert!(rx.try_recv().is_err());
    }
}
