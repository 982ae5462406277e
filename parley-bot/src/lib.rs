//! parley-bot - a Telegram <-> OpenAI conversational relay.
//!
//! Inbound chat messages are grouped into dialogs, serialized per dialog,
//! answered through the OpenAI chat API (optionally as a live-edited stream),
//! and recorded in a SQLite transcript. When a dialog outgrows the model's
//! context window the user picks a recovery strategy: start anew, forget the
//! beginning, or summarize the history.

pub mod access;
pub mod config;
pub mod dialog;
pub mod handler;
pub mod store;
pub mod telegram;
pub mod typing;

pub use config::Config;
pub use handler::AppContext;
