//! Image generation.

use crate::{CompletionError, OpenAiClient};
use serde::Deserialize;

const IMAGE_SIZE: &str = "256x256";

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: String,
}

impl OpenAiClient {
    /// Generate a single image from a prompt and return its URL.
    pub async fn generate_image(&self, prompt: &str) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "prompt": prompt,
            "n": 1,
            "size": IMAGE_SIZE,
            "response_format": "url",
        });

        let response = self
            .client
            .post(self.url("/v1/images/generations"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }

        let generated: ImageResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;

        generated
            .data
            .into_iter()
            .next()
            .map(|d| d.url)
            .ok_or_else(|| CompletionError::Malformed("response has no images".into()))
    }
}
