//! Handlers that record every event for later inspection.

use std::sync::{Arc, Mutex};

use omnichat_provider::{AnswerEvent, AnswerHandler, DrawingEvent, DrawingHandler};

use crate::assertions::{assert_answer_discipline, assert_drawing_discipline};

/// Records chat events in arrival order.
///
/// # Example
///
/// ```rust,ignore
/// let handler = RecordingAnswerHandler::new();
/// let options = ChatOptions::new("ses", handler.clone());
/// openai::chat(options).await;
/// assert_eq!(handler.end_error(), None);
/// ```
#[derive(Debug, Default)]
pub struct RecordingAnswerHandler {
    events: Mutex<Vec<AnswerEvent>>,
}

impl RecordingAnswerHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: AnswerEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<AnswerEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// All appended deltas, concatenated.
    pub fn text(&self) -> String {
        self.deltas().concat()
    }

    pub fn deltas(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AnswerEvent::Append { delta, .. } => Some(delta),
                _ => None,
            })
            .collect()
    }

    pub fn started(&self) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, AnswerEvent::Start { .. }))
    }

    /// Number of `end` events received.
    pub fn end_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, AnswerEvent::End { .. }))
            .count()
    }

    /// The error carried by `end`, `None` if the session ended cleanly or
    /// has not ended.
    pub fn end_error(&self) -> Option<String> {
        self.events().into_iter().find_map(|e| match e {
            AnswerEvent::End { error, .. } => error,
            _ => None,
        })
    }

    pub fn shrunk_to(&self) -> Option<usize> {
        self.events().into_iter().find_map(|e| match e {
            AnswerEvent::ContextShrunk { new_len, .. } => Some(new_len),
            _ => None,
        })
    }

    /// Panic unless the events follow `start, append*, end`.
    pub fn assert_discipline(&self) {
        assert_answer_discipline(&self.events());
    }
}

impl AnswerHandler for RecordingAnswerHandler {
    fn start_answer(&self, session_id: &str) {
        self.push(AnswerEvent::Start {
            session_id: session_id.to_string(),
        });
    }

    fn append_answer(&self, session_id: &str, delta: &str) {
        self.push(AnswerEvent::Append {
            session_id: session_id.to_string(),
            delta: delta.to_string(),
        });
    }

    fn end(&self, session_id: &str, error: Option<&str>) {
        self.push(AnswerEvent::End {
            session_id: session_id.to_string(),
            error: error.map(str::to_string),
        });
    }

    fn context_shrunk(&self, session_id: &str, new_len: usize) {
        self.push(AnswerEvent::ContextShrunk {
            session_id: session_id.to_string(),
            new_len,
        });
    }
}

/// Records drawing events in arrival order.
#[derive(Debug, Default)]
pub struct RecordingDrawingHandler {
    events: Mutex<Vec<DrawingEvent>>,
}

impl RecordingDrawingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: DrawingEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    pub fn events(&self) -> Vec<DrawingEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Paths delivered by `image_generated`, if it was called.
    pub fn images(&self) -> Option<Vec<String>> {
        self.events().into_iter().find_map(|e| match e {
            DrawingEvent::ImageGenerated { paths, .. } => Some(paths),
            _ => None,
        })
    }

    pub fn end_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, DrawingEvent::End { .. }))
            .count()
    }

    pub fn end_error(&self) -> Option<String> {
        self.events().into_iter().find_map(|e| match e {
            DrawingEvent::End { error, .. } => error,
            _ => None,
        })
    }

    /// Panic unless the events follow `image_generated?, end`.
    pub fn assert_discipline(&self) {
        assert_drawing_discipline(&self.events());
    }
}

impl DrawingHandler for RecordingDrawingHandler {
    fn image_generated(&self, session_id: &str, paths: &[String]) {
        self.push(DrawingEvent::ImageGenerated {
            session_id: session_id.to_string(),
            paths: paths.to_vec(),
        });
    }

    fn end(&self, session_id: &str, error: Option<&str>) {
        self.push(DrawingEvent::End {
            session_id: session_id.to_string(),
            error: error.map(str::to_string),
        });
    }
}
