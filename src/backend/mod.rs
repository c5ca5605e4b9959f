//! Narrow seam over the inference engine.
//!
//! The dispatcher only ever talks to [`InferenceBackend`] and
//! [`LoadedModel`]; everything engine-specific (weights, tokenizer, sampling
//! plumbing) lives behind these traits. The production implementation is
//! [`mistral::MistralBackend`]; tests drive the same seam with scripted
//! mocks.

pub mod mistral;

pub use mistral::MistralBackend;

use crate::error::Result;
use crate::protocol::ChatTurn;
use async_trait::async_trait;

/// Chat role understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Parse a wire role string. Unrecognized roles fall back to `User`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "system" => Self::System,
            "assistant" => Self::Assistant,
            _ => Self::User,
        }
    }
}

/// One message of a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

impl From<&ChatTurn> for Message {
    fn from(turn: &ChatTurn) -> Self {
        Self {
            role: Role::parse(&turn.role),
            content: turn.content.clone(),
        }
    }
}

/// Sampling controls for a generation request.
///
/// These are process configuration constants (see
/// [`crate::config::GenerationConfig`]), not wire parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    pub temperature: f64,
    pub top_p: f64,
    /// Multiplicative repetition penalty (1.0 = disabled).
    pub repetition_penalty: f32,
    /// Trailing token window the penalty considers.
    pub repetition_window: usize,
}

/// A generation request: messages in, text out.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub max_tokens: usize,
    /// `None` means engine defaults (greedy-ish, engine-chosen).
    pub sampling: Option<SamplingOptions>,
}

impl GenerationRequest {
    /// Single user-prompt request with engine-default sampling.
    #[must_use]
    pub fn prompt(text: impl Into<String>, max_tokens: usize) -> Self {
        Self {
            messages: vec![Message::user(text)],
            max_tokens,
            sampling: None,
        }
    }
}

/// A resident model, ready for inference.
///
/// The tokenizer handle lives inside the implementation; callers never see
/// token sequences, only text in and text out.
#[async_trait]
pub trait LoadedModel: Send + Sync {
    /// Generate a text completion for the given messages.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Generate a completion for a prompt plus one mono 16 kHz audio segment.
    ///
    /// The request carries exactly one user message; the audio is attached to
    /// it. Only meaningful for models loaded through the multimodal loader.
    async fn generate_with_audio(&self, request: &GenerationRequest, samples: &[f32])
        -> Result<String>;

    /// Clear any per-call scratch state (embedding queues, staged audio).
    ///
    /// Called before every audio inference so state from a previous,
    /// possibly unrelated call can never leak into the current prompt.
    /// Implementations whose engines already scope scratch per request may
    /// make this a no-op.
    fn reset_scratch(&self);

    /// Rough parameter-count estimate for `model-info`.
    fn param_count_estimate(&self) -> u64;
}

/// Factory for resident models.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Fail-fast availability check (host architecture, engine presence).
    ///
    /// Used both for the startup precondition and for `check-availability`.
    fn probe(&self) -> Result<()>;

    /// Load a text-only model.
    async fn load_text(&self, model_path: &str) -> Result<Box<dyn LoadedModel>>;

    /// Load a multimodal (text + audio) model.
    async fn load_multimodal(&self, model_path: &str) -> Result<Box<dyn LoadedModel>>;
}
