//! Per-update message handling.
//!
//! Pipeline for every inbound message: access check → dialog identity (and
//! staleness) → busy guard → commands → pending overflow decision → text or
//! voice extraction → append, complete, reply. Each step that fails ends the
//! handler early; nothing here is fatal to the process.

use crate::access;
use crate::config::Config;
use crate::dialog::guard::ActiveDialogs;
use crate::dialog::overflow::{
    self, DecisionOutcome, DECISION_FORGET_BEGINNING, DECISION_START_ANEW, DECISION_SUMMARIZE,
};
use crate::dialog::stream::ReplySink;
use crate::dialog::{completion, identity};
use crate::store::{DialogMessage, DialogState, DialogStore, Role};
use crate::telegram::{Message, TelegramApi, Update};
use crate::typing::TypingStatus;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use parley_openai::{CompletionError, OpenAiClient};
use std::sync::Arc;

const DEFAULT_HELP: &str = "Type anything to start a conversation";

/// Shared application state, one per process.
pub struct AppContext {
    pub config: Config,
    pub telegram: Arc<TelegramApi>,
    pub openai: OpenAiClient,
    pub store: DialogStore,
    pub active: ActiveDialogs,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let store = DialogStore::new(&config.db_path)?;
        let telegram = Arc::new(TelegramApi::new(config.telegram_token.clone()));
        let openai = OpenAiClient::new(config.openai_api_key.clone());

        Ok(Self {
            config,
            telegram,
            openai,
            store,
            active: ActiveDialogs::new(),
        })
    }
}

/// Handle one inbound update; runs on its own task.
pub async fn handle_update(ctx: Arc<AppContext>, update: Update) {
    let Some(message) = update.message else {
        return;
    };

    let chat_id = message.chat.id;
    let user_id = message.sender_id();

    if !access::is_user_allowed(&ctx.config.users, message.sender_username(), user_id) {
        tracing::error!(
            "Unauthorized user {} tried to access bot",
            access::format_sender(message.sender_username(), user_id)
        );
        send_not_wanted(&ctx, chat_id, user_id, message.message_id).await;
        return;
    }

    let dialog_id = identity::dialog_id(
        ctx.config.tracking_mode(),
        message.message_id,
        chat_id,
        user_id,
    );

    if let Err(e) = identity::expire_if_stale(
        &ctx.store,
        &dialog_id,
        ctx.config.dialog_expire_secs,
        Local::now().timestamp(),
    ) {
        tracing::error!("Failed to check dialog staleness: {e}");
        return;
    }

    let Some(_guard) = ctx.active.begin(&dialog_id) else {
        tracing::debug!("Ignored message for {dialog_id}: model is already answering");
        return;
    };

    if let Some((command, args)) = message.command() {
        handle_command(&ctx, &dialog_id, &message, command, args).await;
        return;
    }

    let decision_reply = message.text.as_deref().unwrap_or("");
    match overflow::resolve_pending_decision(&ctx.store, &ctx.openai, &dialog_id, decision_reply)
        .await
    {
        Ok(DecisionOutcome::NotPending | DecisionOutcome::Resolved) => {}
        Ok(DecisionOutcome::Summarized) => return,
        Ok(DecisionOutcome::Unrecognized) => {
            send_error(&ctx, chat_id, &format!("Unknown dialog state reply: {decision_reply}"))
                .await;
            return;
        }
        Err(e) => {
            tracing::error!("Failed to resolve dialog context limits: {e}");
            return;
        }
    }

    let is_voice = message.voice.is_some();
    let msg_text = match message_text(&ctx, &message).await {
        Ok(text) => text,
        Err(e) => {
            send_error(&ctx, chat_id, &format!("Failed to get text from message: {e}")).await;
            return;
        }
    };

    if is_voice && !ctx.config.answer_voice {
        return;
    }

    answer_message(&ctx, &dialog_id, &msg_text, &message).await;
}

async fn handle_command(
    ctx: &AppContext,
    dialog_id: &str,
    message: &Message,
    command: &str,
    args: &str,
) {
    match command {
        "start" | "help" => send_hello(ctx, message.chat.id).await,
        "new" => {
            if let Err(e) = ctx.store.delete_all(dialog_id) {
                tracing::error!("Failed to delete dialog: {e}");
            }
        }
        "imagine" => generate_image(ctx, args, message).await,
        other => {
            send_error(ctx, message.chat.id, &format!("Unknown command: {other}")).await;
        }
    }
}

/// Extract the conversational text of a message.
///
/// Voice messages are downloaded and transcribed when enabled; the
/// transcription is echoed back so the sender can see what was heard.
async fn message_text(ctx: &AppContext, message: &Message) -> Result<String> {
    if let Some(voice) = &message.voice {
        if !ctx.config.decode_voice {
            anyhow::bail!("voice decoding is disabled");
        }

        let audio = ctx.telegram.download_file(&voice.file_id).await?;
        let text = ctx.openai.transcribe(&audio, "ogg").await?;

        if let Err(e) = ctx
            .telegram
            .send_message(message.chat.id, &format!("Decoded: {text}"), None)
            .await
        {
            tracing::error!("Failed to send decoded message: {e}");
        }

        return Ok(text);
    }

    if let Some(text) = &message.text {
        if !text.is_empty() {
            return Ok(text.clone());
        }
    }

    anyhow::bail!("unsupported message type")
}

async fn answer_message(ctx: &AppContext, dialog_id: &str, msg_text: &str, message: &Message) {
    let chat_id = message.chat.id;

    if let Err(e) = ctx
        .store
        .append(dialog_id, &DialogMessage::new(Role::User, msg_text))
    {
        tracing::error!("Failed to save dialog message: {e}");
        return;
    }

    let dialog_messages = match ctx.store.read_all(dialog_id) {
        Ok(messages) => messages,
        Err(e) => {
            tracing::error!("Failed to get dialog messages: {e}");
            return;
        }
    };

    let _typing = TypingStatus::start(Arc::clone(&ctx.telegram), chat_id);
    let reply_to = ctx.config.send_replies.then_some(message.message_id);

    let reply_text = if ctx.config.stream_response {
        let sink = MessageEditor {
            api: Arc::clone(&ctx.telegram),
            chat_id,
            reply_to,
        };
        completion::stream_reply(&ctx.openai, &dialog_messages, &sink).await
    } else {
        match completion::get_reply(&ctx.openai, &dialog_messages).await {
            Ok(text) => {
                if let Err(e) = ctx.telegram.send_message(chat_id, &text, reply_to).await {
                    tracing::error!("Failed to send reply: {e}");
                }
                text
            }
            Err(CompletionError::ContextLengthExceeded) => {
                if let Err(e) = ctx.store.set_state(dialog_id, DialogState::ContextLimit) {
                    tracing::error!("Failed to set dialog state: {e}");
                }
                prompt_overflow_decision(ctx, chat_id, dialog_messages.len()).await;
                String::new()
            }
            Err(e) => {
                tracing::error!("Failed to get reply: {e}");
                send_error(ctx, chat_id, "Failed to get a reply, please try again").await;
                String::new()
            }
        }
    };

    if let Err(e) = ctx
        .store
        .append(dialog_id, &DialogMessage::new(Role::Assistant, reply_text))
    {
        tracing::error!("Failed to save dialog message: {e}");
    }
}

/// Ask the user how to continue an overflowed dialog.
async fn prompt_overflow_decision(ctx: &AppContext, chat_id: i64, message_count: usize) {
    let text = format!(
        "\u{203c} Dialog context is too long ({message_count} messages total). \
         Please choose how to continue:"
    );
    let buttons = [
        DECISION_START_ANEW,
        DECISION_FORGET_BEGINNING,
        DECISION_SUMMARIZE,
    ];

    if let Err(e) = ctx
        .telegram
        .send_with_keyboard(chat_id, &text, &buttons)
        .await
    {
        tracing::error!("Failed to send overflow prompt: {e}");
    }
}

async fn generate_image(ctx: &AppContext, prompt: &str, message: &Message) {
    if !ctx.config.generate_images {
        send_error(ctx, message.chat.id, "Image generation is disabled").await;
        return;
    }
    if prompt.is_empty() {
        send_error(ctx, message.chat.id, "Please provide a prompt").await;
        return;
    }

    let _typing = TypingStatus::start(Arc::clone(&ctx.telegram), message.chat.id);

    match ctx.openai.generate_image(prompt).await {
        Ok(url) => {
            let reply_to = ctx.config.send_replies.then_some(message.message_id);
            if let Err(e) = ctx
                .telegram
                .send_photo_url(message.chat.id, &url, reply_to)
                .await
            {
                tracing::error!("Failed to send reply: {e}");
            }
        }
        Err(e) => {
            send_error(ctx, message.chat.id, &format!("Failed to generate image: {e}")).await;
        }
    }
}

async fn send_hello(ctx: &AppContext, chat_id: i64) {
    let text = ctx.config.message("help", DEFAULT_HELP);
    if let Err(e) = ctx.telegram.send_message(chat_id, &text, None).await {
        tracing::error!("Failed to send hello message: {e}");
    }
}

async fn send_error(ctx: &AppContext, chat_id: i64, message: &str) {
    if let Err(e) = ctx
        .telegram
        .send_message(chat_id, &format!("\u{203c} {message}"), None)
        .await
    {
        tracing::error!("Failed to send error message: {e}");
    }
}

/// Rejection notice for disallowed users, sent at most once per TTL window.
async fn send_not_wanted(ctx: &AppContext, chat_id: i64, user_id: i64, reply_to: i64) {
    let text = ctx.config.message("not_wanted_here", "");
    if text.is_empty() {
        return;
    }

    match ctx.store.not_wanted_sent(user_id) {
        Ok(true) => return,
        Ok(false) => {}
        Err(e) => {
            tracing::error!("Failed to get not_wanted_sent flag: {e}");
            return;
        }
    }

    let reply_to = (reply_to != 0).then_some(reply_to);
    if let Err(e) = ctx.telegram.send_message(chat_id, &text, reply_to).await {
        tracing::error!("Failed to send not_wanted_here message: {e}");
    }

    if let Err(e) = ctx.store.set_not_wanted_sent(user_id) {
        tracing::error!("Failed to set not_wanted_sent flag: {e}");
    }
}

/// Relays streamed replies as one live-edited Telegram message.
struct MessageEditor {
    api: Arc<TelegramApi>,
    chat_id: i64,
    reply_to: Option<i64>,
}

#[async_trait]
impl ReplySink for MessageEditor {
    async fn send_initial(&self, text: &str) -> Result<i64> {
        self.api.send_message(self.chat_id, text, self.reply_to).await
    }

    async fn edit(&self, message_id: i64, text: &str) -> Result<()> {
        self.api.edit_message_text(self.chat_id, message_id, text).await
    }
}
