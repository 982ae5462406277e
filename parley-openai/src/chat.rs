//! Chat completions - single-shot and streaming.

use crate::{CompletionError, OpenAiClient};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One role-tagged message of a conversation transcript.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

impl OpenAiClient {
    /// Single-shot chat completion over the full transcript.
    ///
    /// A collaborator-reported context overflow surfaces as
    /// [`CompletionError::ContextLengthExceeded`]; everything else is a
    /// transport failure.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(self.url("/v1/chat/completions"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CompletionError::Malformed("response has no choices".into()))
    }

    /// Streaming chat completion.
    ///
    /// Returns a finite, non-restartable sequence of text deltas; the channel
    /// closes on `[DONE]`, stream end, or any mid-stream transport failure
    /// (the sequence is simply truncated, nothing is retried).
    pub fn chat_stream(&self, messages: &[ChatMessage]) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        let client = self.clone();
        let request_body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        tokio::spawn(async move {
            if let Err(e) = client.run_stream(request_body, tx).await {
                tracing::warn!("Chat stream ended early: {e}");
            }
        });

        rx
    }

    async fn run_stream(
        &self,
        body: serde_json::Value,
        tx: mpsc::Sender<String>,
    ) -> Result<(), CompletionError> {
        let response = self
            .client
            .post(self.url("/v1/chat/completions"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }

        // SSE framing: lines of "data: {json}", terminated by "data: [DONE]".
        // Bytes are buffered until a full line arrives so multi-byte UTF-8
        // sequences split across chunks stay intact.
        let mut stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            pending.extend_from_slice(&chunk);

            while let Some(newline) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end();

                let Some(payload) = line.strip_prefix("data: ") else {
                    continue;
                };

                if payload == "[DONE]" {
                    return Ok(());
                }

                match serde_json::from_str::<StreamChunk>(payload) {
                    Ok(chunk) => {
                        let Some(delta) = chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta.content)
                        else {
                            continue;
                        };

                        if tx.send(delta).await.is_err() {
                            // Receiver gone, nobody is reading the reply.
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        return Err(CompletionError::Malformed(format!(
                            "bad stream chunk: {e}"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: String,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
