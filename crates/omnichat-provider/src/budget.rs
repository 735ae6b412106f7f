//! Context budgeting.
//!
//! Trims a normalized conversation to a turn window and, optionally, to an
//! estimated token ceiling.

use tracing::info;

use crate::message::ChatMessage;
use crate::token::EstimateTokens;

/// Result of [`limit_context`].
#[derive(Debug, Clone, PartialEq)]
pub struct Budgeted {
    pub messages: Vec<ChatMessage>,
    /// Set when the token ceiling pushed the context below the configured
    /// window. Holds the new length; the caller should tell the user.
    pub shrunk_to: Option<usize>,
}

/// Trim `messages` to at most `context_size + 1` entries, then keep dropping
/// the oldest entry while the estimate exceeds `input_max_tokens` and more
/// than one entry remains.
///
/// The extra slot beyond `context_size` is for the newest user turn. Without
/// `input_max_tokens` only the turn window applies.
pub fn limit_context(
    input_max_tokens: Option<usize>,
    context_size: usize,
    messages: Vec<ChatMessage>,
    estimator: &dyn EstimateTokens,
) -> Budgeted {
    let original_len = messages.len();

    let keep_from = original_len.saturating_sub(context_size.saturating_add(1));
    let mut messages = messages;
    messages.drain(..keep_from);

    if let Some(max) = input_max_tokens {
        // Each pass removes one message, so this runs at most len - 1 times.
        let mut drop = 0;
        while messages.len() - drop > 1 && estimator.estimate(&messages[drop..]) > max {
            drop += 1;
        }
        messages.drain(..drop);
    }

    let current_len = messages.len();
    let shrunk_to = (original_len >= context_size && current_len < context_size).then(|| {
        info!(
            context_size,
            current_len, "Context size reduced to fit the token limit"
        );
        current_len
    });

    Budgeted {
        messages,
        shrunk_to,
    }
}
