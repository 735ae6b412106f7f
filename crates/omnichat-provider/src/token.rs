//! Token estimation for context budgeting.
//!
//! Counts use tiktoken's `cl100k_base` encoding, the GPT-4 reference profile,
//! regardless of which provider will receive the messages. Each message costs
//! a fixed overhead for its framing plus the tokens of its role and content,
//! and every conversation is primed with a few reply tokens. Because each
//! message adds a strictly positive amount, dropping a message always lowers
//! the count.
//!
//! When the encoder cannot be loaded the estimator falls back to roughly four
//! characters per token.

use std::sync::OnceLock;

use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::error;

use crate::message::ChatMessage;

/// Framing tokens charged per message.
const MESSAGE_OVERHEAD: usize = 4;

/// Tokens that prime the assistant reply.
const REPLY_PRIMING: usize = 3;

static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_encoder() -> Option<&'static CoreBPE> {
    ENCODER.get_or_init(|| cl100k_base().ok()).as_ref()
}

/// Anything able to put a token price on a message list.
pub trait EstimateTokens: Send + Sync {
    fn estimate(&self, messages: &[ChatMessage]) -> usize;
}

/// Thread-safe approximate token counter.
#[derive(Clone, Copy)]
pub struct TokenEstimator {
    encoder: Option<&'static CoreBPE>,
}

impl std::fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEstimator")
            .field("encoder", &self.encoder.map(|_| "<cl100k_base>"))
            .finish()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        let encoder = get_encoder();
        if encoder.is_none() {
            error!("Failed to initialize cl100k_base encoder, falling back to character estimates");
        }
        Self { encoder }
    }

    /// Estimator that never tokenizes, only approximates by characters.
    pub fn approximate() -> Self {
        Self { encoder: None }
    }

    pub fn count_str(&self, text: &str) -> usize {
        match self.encoder {
            Some(encoder) => encoder.encode_ordinary(text).len(),
            None => text.chars().count().div_ceil(4),
        }
    }

    /// Tokens for a single message, including framing overhead.
    pub fn count_message(&self, message: &ChatMessage) -> usize {
        MESSAGE_OVERHEAD + self.count_str(message.role.as_str()) + self.count_str(&message.content)
    }

    /// Tokens for a whole message list.
    pub fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        REPLY_PRIMING
            + messages
                .iter()
                .map(|m| self.count_message(m))
                .sum::<usize>()
    }
}

impl EstimateTokens for TokenEstimator {
    fn estimate(&self, messages: &[ChatMessage]) -> usize {
        self.count_messages(messages)
    }
}
