//! JSON configuration.

use crate::dialog::TrackingMode;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Bot configuration, loaded from a JSON file.
///
/// Only the two tokens are required; everything else has a quiet default.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub telegram_token: String,
    pub openai_api_key: String,

    /// Allowed usernames or numeric user ids; empty admits everyone.
    #[serde(default)]
    pub users: Vec<String>,

    /// Dialog grouping: "none", "user" or "chat" (default).
    #[serde(default)]
    pub tracking_mode: String,

    /// Idle seconds after which a dialog silently restarts; 0 disables.
    #[serde(default)]
    pub dialog_expire_secs: u64,

    /// Stream replies as live-edited messages instead of one final send.
    #[serde(default)]
    pub stream_response: bool,

    /// Link outbound replies to the triggering message.
    #[serde(default)]
    pub send_replies: bool,

    /// Transcribe inbound voice messages.
    #[serde(default)]
    pub decode_voice: bool,

    /// Answer transcribed voice messages (off: transcript only).
    #[serde(default)]
    pub answer_voice: bool,

    /// Enable the /imagine command.
    #[serde(default)]
    pub generate_images: bool,

    /// Per-key custom message texts (e.g. "help", "not_wanted_here").
    #[serde(default)]
    pub messages: HashMap<String, String>,

    /// SQLite database location.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("parley.db")
}

impl Config {
    /// Load from the path in `$CONFIG_PATH`, falling back to `config.json`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
        Self::load(Path::new(&path))
    }

    /// Load and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    /// Custom message text by key, or the given default.
    pub fn message(&self, name: &str, default: &str) -> String {
        self.messages
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn tracking_mode(&self) -> TrackingMode {
        TrackingMode::parse(&self.tracking_mode)
    }
}
