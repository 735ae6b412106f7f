//! Testing utilities, fixtures, and mocks for omnichat.
//!
//! - **Handlers**: recording [`AnswerHandler`]/[`DrawingHandler`] implementations
//! - **Mocks**: an in-memory file store and a canned script executor
//! - **Fixtures**: wire bodies and conversation histories
//! - **Assertions**: event-discipline checks and diffing string comparison
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use omnichat_test_utils::{fixtures, RecordingAnswerHandler};
//!
//! #[tokio::test]
//! async fn test_streaming() {
//!     let handler = RecordingAnswerHandler::new();
//!     let options = ChatOptions::new("ses", handler.clone());
//!     // run an adapter against a mock server serving fixtures::sse_body(..)
//!     assert_eq!(handler.text(), "Hello");
//!     handler.assert_discipline();
//! }
//! ```
//!
//! [`AnswerHandler`]: omnichat_provider::AnswerHandler
//! [`DrawingHandler`]: omnichat_provider::DrawingHandler

pub mod assertions;
pub mod fixtures;
pub mod handlers;
pub mod mocks;

pub use handlers::{RecordingAnswerHandler, RecordingDrawingHandler};
pub use mocks::{MemoryFileStore, StaticScriptExecutor};
