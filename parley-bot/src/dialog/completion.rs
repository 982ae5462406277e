//! Completion orchestration - transcript in, reply out.
//!
//! The single place that talks to the completion collaborator on behalf of a
//! dialog. Overflow surfaces as a typed error for the state machine; a
//! streaming reply is relayed through the aggregator.

use crate::dialog::stream::{aggregate_stream, ReplySink};
use crate::store::DialogMessage;
use parley_openai::{ChatMessage, CompletionError, OpenAiClient};

/// Convert stored turns to the completion wire format, order preserved.
pub fn to_transcript(messages: &[DialogMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| ChatMessage::new(m.role.as_str(), m.content.clone()))
        .collect()
}

/// Single-shot reply over the full transcript.
///
/// Callers match [`CompletionError::ContextLengthExceeded`] to drive the
/// overflow state machine; other variants are transport failures.
pub async fn get_reply(
    client: &OpenAiClient,
    messages: &[DialogMessage],
) -> Result<String, CompletionError> {
    client.chat(&to_transcript(messages)).await
}

/// Live-updating reply: stream deltas, push bounded edits, return the final
/// text (possibly truncated if the stream failed mid-way).
pub async fn stream_reply(
    client: &OpenAiClient,
    messages: &[DialogMessage],
    sink: &dyn ReplySink,
) -> String {
    let deltas = client.chat_stream(&to_transcript(messages));
    aggregate_stream(deltas, sink).await
}
