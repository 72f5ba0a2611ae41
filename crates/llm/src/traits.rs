//! Generator trait abstraction.

use async_trait::async_trait;

use crate::error::GenerateError;

/// One attempt at the external generative model.
///
/// No further contract is assumed; model identity, token limits and the
/// like are configuration of the implementation.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate raw text for the given prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}
