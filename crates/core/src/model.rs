//! Model trait: the abstraction over the language-model backend.
//!
//! The planning core treats inference as a black box: a prompt (plus an
//! optional image) goes in, text comes out. Every call is awaited to
//! completion before the caller continues, so callers observe model
//! output in a fixed order.
//!
//! Implementations live outside this workspace (local runtimes, hosted
//! endpoints, scripted test doubles).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::environment::Frame;
use crate::error::ModelError;

/// Marker inserted into prompts when an image accompanies the call.
pub const DEFAULT_IMAGE_TOKEN: &str = "<image>";

/// A single model completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Generation {
    /// The generated text.
    pub text: String,

    /// Backend-specific raw payload (token ids, logprobs, ...).
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Generation {
    /// A generation carrying only text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            raw: serde_json::Value::Null,
        }
    }
}

/// The core Model trait.
///
/// `generate_high` is the higher-effort variant used for initial
/// subgoal-list generation; backends without one fall back to `generate`.
#[async_trait]
pub trait Model: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// The reserved marker that stands in for an attached image.
    fn image_token(&self) -> &str {
        DEFAULT_IMAGE_TOKEN
    }

    /// Generate a completion for `prompt`.
    async fn generate(
        &self,
        prompt: &str,
        image: Option<&Frame>,
    ) -> std::result::Result<Generation, ModelError>;

    /// Generate with the higher-effort configuration.
    async fn generate_high(
        &self,
        prompt: &str,
        image: Option<&Frame>,
    ) -> std::result::Result<Generation, ModelError> {
        self.generate(prompt, image).await
    }
}
