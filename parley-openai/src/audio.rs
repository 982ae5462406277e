//! Whisper transcription for voice messages.

use crate::{CompletionError, OpenAiClient};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

const TRANSCRIPTION_MODEL: &str = "whisper-1";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

fn mime_type(format: &str) -> &'static str {
    match format.to_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/m4a",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        // Telegram voice messages are OGG/Opus.
        _ => "audio/ogg",
    }
}

impl OpenAiClient {
    /// Transcribe in-memory audio bytes with the Whisper API.
    pub async fn transcribe(
        &self,
        audio_bytes: &[u8],
        format: &str,
    ) -> Result<String, CompletionError> {
        let part = Part::bytes(audio_bytes.to_vec())
            .file_name(format!("audio.{format}"))
            .mime_str(mime_type(format))
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;

        let form = Form::new()
            .text("model", TRANSCRIPTION_MODEL)
            .part("file", part);

        let response = self
            .client
            .post(self.url("/v1/audio/transcriptions"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }

        let transcription: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;

        Ok(transcription.text)
    }
}
