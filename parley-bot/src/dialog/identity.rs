//! Dialog identity - which conversation does a message belong to.

use crate::store::DialogStore;
use anyhow::Result;

/// Granularity at which messages are grouped into dialogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    /// Every message is its own dialog.
    None,
    /// One dialog per sender, across chats.
    User,
    /// One dialog per chat.
    #[default]
    Chat,
}

impl TrackingMode {
    /// Parse from config text; unrecognized values fall back to `Chat`.
    pub fn parse(s: &str) -> Self {
        match s {
            "none" => Self::None,
            "user" => Self::User,
            _ => Self::Chat,
        }
    }
}

/// Derive the stable dialog id for a message under the given mode.
pub fn dialog_id(mode: TrackingMode, message_id: i64, chat_id: i64, user_id: i64) -> String {
    match mode {
        TrackingMode::None => format!("msg:{message_id}"),
        TrackingMode::Chat => format!("chat:{chat_id}"),
        TrackingMode::User => format!("user:{user_id}"),
    }
}

/// Delete a dialog's turns if it has been idle longer than `expire_secs`.
///
/// Runs before any new turn is appended, so a stale dialog silently restarts
/// empty. A zero duration disables expiry; a dialog with no recorded
/// interaction is not stale. Returns whether the dialog was expired.
pub fn expire_if_stale(
    store: &DialogStore,
    dialog_id: &str,
    expire_secs: u64,
    now: i64,
) -> Result<bool> {
    if expire_secs == 0 {
        return Ok(false);
    }

    let Some(last) = store.get_last_interaction(dialog_id)? else {
        return Ok(false);
    };

    if now - last <= expire_secs as i64 {
        return Ok(false);
    }

    tracing::debug!("Dialog {dialog_id} idle for {}s, starting fresh", now - last);
    store.delete_all(dialog_id)?;
    Ok(true)
}
