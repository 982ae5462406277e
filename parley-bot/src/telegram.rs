//! Telegram Bot API client - long-polling and outbound operations.

use anyhow::Result;
use serde::Deserialize;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub voice: Option<Voice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Voice {
    pub file_id: String,
}

impl Message {
    /// Bot command at the start of the text: `("new", "")` for "/new",
    /// `("imagine", "a cat")` for "/imagine a cat". Handles the
    /// `/cmd@botname` group-chat form.
    pub fn command(&self) -> Option<(&str, &str)> {
        let text = self.text.as_deref()?;
        let rest = text.strip_prefix('/')?;

        let (token, args) = match rest.split_once(char::is_whitespace) {
            Some((token, args)) => (token, args.trim()),
            None => (rest, ""),
        };

        let name = token.split('@').next().unwrap_or(token);
        if name.is_empty() {
            return None;
        }
        Some((name, args))
    }

    pub fn sender_id(&self) -> i64 {
        self.from.as_ref().map_or(0, |u| u.id)
    }

    pub fn sender_username(&self) -> Option<&str> {
        self.from.as_ref().and_then(|u| u.username.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_path: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Telegram Bot API client.
pub struct TelegramApi {
    token: String,
    base_url: String,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    /// Custom API base, for tests.
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.base_url, self.token)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await?;

        let parsed: ApiResponse<T> = resp.json().await?;
        if !parsed.ok {
            anyhow::bail!(
                "Telegram {method} failed: {}",
                parsed.description.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        parsed
            .result
            .ok_or_else(|| anyhow::anyhow!("Telegram {method} returned no result"))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &serde_json::json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    /// Send a Markdown message; returns the new `message_id`.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });
        if let Some(reply_to) = reply_to {
            body["reply_to_message_id"] = serde_json::Value::from(reply_to);
        }

        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(sent.message_id)
    }

    /// Send a message with a one-row reply keyboard.
    pub async fn send_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[&str],
    ) -> Result<i64> {
        let row: Vec<serde_json::Value> = buttons
            .iter()
            .map(|b| serde_json::json!({"text": b}))
            .collect();
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
            "reply_markup": {
                "keyboard": [row],
                "one_time_keyboard": true,
                "resize_keyboard": true,
            },
        });

        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(sent.message_id)
    }

    /// Replace the text of a previously sent message.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<()> {
        // editMessageText returns the edited Message; the body is irrelevant.
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &serde_json::json!({
                    "chat_id": chat_id,
                    "message_id": message_id,
                    "text": text,
                }),
            )
            .await?;
        Ok(())
    }

    /// Show the "typing…" indicator.
    pub async fn send_typing(&self, chat_id: i64) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "sendChatAction",
                &serde_json::json!({"chat_id": chat_id, "action": "typing"}),
            )
            .await?;
        Ok(())
    }

    /// Send a photo by URL; Telegram fetches it.
    pub async fn send_photo_url(
        &self,
        chat_id: i64,
        url: &str,
        reply_to: Option<i64>,
    ) -> Result<()> {
        let mut body = serde_json::json!({"chat_id": chat_id, "photo": url});
        if let Some(reply_to) = reply_to {
            body["reply_to_message_id"] = serde_json::Value::from(reply_to);
        }

        let _: serde_json::Value = self.call("sendPhoto", &body).await?;
        Ok(())
    }

    /// Register the bot command menu.
    pub async fn set_my_commands(&self, commands: &[(&str, &str)]) -> Result<()> {
        let list: Vec<serde_json::Value> = commands
            .iter()
            .map(|(command, description)| {
                serde_json::json!({"command": command, "description": description})
            })
            .collect();

        let _: serde_json::Value = self
            .call("setMyCommands", &serde_json::json!({"commands": list}))
            .await?;
        Ok(())
    }

    /// Download a file's raw bytes by its `file_id`.
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let info: FileInfo = self
            .call("getFile", &serde_json::json!({"file_id": file_id}))
            .await?;
        let file_path = info
            .file_path
            .ok_or_else(|| anyhow::anyhow!("Telegram getFile returned no file_path"))?;

        let resp = self.client.get(self.file_url(&file_path)).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("Failed to download file from Telegram: {}", resp.status());
        }

        Ok(resp.bytes().await?.to_vec())
    }
}
