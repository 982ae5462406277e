//! "Typing…" indicator kept alive while a reply is being produced.

use crate::telegram::TelegramApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Telegram shows the indicator for ~5 seconds per action.
const REFRESH_PERIOD: Duration = Duration::from_secs(5);

/// Repeating chat action; stops when dropped.
pub struct TypingStatus {
    handle: JoinHandle<()>,
}

impl TypingStatus {
    /// Send "typing" immediately and refresh every 5 seconds.
    pub fn start(api: Arc<TelegramApi>, chat_id: i64) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_PERIOD);
            loop {
                ticker.tick().await;
                if let Err(e) = api.send_typing(chat_id).await {
                    tracing::warn!("Failed to send typing action: {e}");
                }
            }
        });
        Self { handle }
    }
}

impl Drop for TypingStatus {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_typing_and_stops_on_drop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bott/sendChatAction"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": true, "result": true})),
            )
            .mount(&server)
            .await;

        let api = Arc::new(TelegramApi::with_base_url("t", server.uri()));
        let status = TypingStatus::start(api, 42);

        // First action fires immediately.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let sent = server.received_requests().await.unwrap().len();
        assert!(sent >= 1);

        drop(status);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after_drop = server.received_requests().await.unwrap().len();
        assert_eq!(sent, after_drop);
    }
}
