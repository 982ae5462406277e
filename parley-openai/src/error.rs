//! Error taxonomy for the completion collaborator.

use thiserror::Error;

/// Error returned by [`OpenAiClient`](crate::OpenAiClient) operations.
///
/// `ContextLengthExceeded` is a control signal, not a fault: callers match on
/// it to drive the dialog overflow state machine. Everything else is a
/// transport-level failure and is not retried here.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The accumulated conversation no longer fits the model's input window.
    #[error("context length exceeded")]
    ContextLengthExceeded,

    /// The API rejected the request.
    #[error("OpenAI API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never completed.
    #[error("OpenAI request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response arrived but did not have the expected shape.
    #[error("malformed OpenAI response: {0}")]
    Malformed(String),
}

impl CompletionError {
    /// Whether this error is the recoverable overflow condition.
    pub fn is_context_length_exceeded(&self) -> bool {
        matches!(self, Self::ContextLengthExceeded)
    }
}
