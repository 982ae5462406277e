//! Overflow state machine and dialog summarization.
//!
//! When a completion reports that the conversation no longer fits the model's
//! context window, the dialog enters `ContextLimit` and the next inbound
//! message is interpreted as a recovery decision rather than a new turn.

use crate::store::{DialogMessage, DialogState, DialogStore, Role};
use anyhow::{Context, Result};
use parley_openai::{ChatMessage, CompletionError, OpenAiClient, ROLE_USER};

/// Decision button texts, also matched literally against the reply.
pub const DECISION_START_ANEW: &str = "Start anew";
pub const DECISION_FORGET_BEGINNING: &str = "Forget beginning";
pub const DECISION_SUMMARIZE: &str = "Summarize history";

const SENTINEL_PREV: &str = "#PREV#";
const SENTINEL_CONT: &str = "#CONT#";
const TURN_DELIMITER: &str = "#END#";
const SUMMARY_LEAD_IN: &str = "This is a summary of previous dialog messages: \n\n";

/// How a pending overflow decision was handled.
#[derive(Debug, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// No decision was pending; proceed with normal handling.
    NotPending,
    /// Decision applied; the current text falls through as a fresh turn.
    Resolved,
    /// History was replaced by a summary; this message is fully consumed.
    Summarized,
    /// The reply matched no decision; state is unchanged.
    Unrecognized,
}

/// Resolve a pending overflow decision, if any.
///
/// "Start anew" and "Forget beginning" clear the state and let the current
/// message continue as a normal turn. "Summarize history" replaces the whole
/// dialog with a single synthetic user turn, clears the state, and consumes
/// the message - the literal decision text is never recorded and no model
/// reply is generated in this pass. Any other text leaves the state pending.
pub async fn resolve_pending_decision(
    store: &DialogStore,
    client: &OpenAiClient,
    dialog_id: &str,
    reply_text: &str,
) -> Result<DecisionOutcome> {
    if store.get_state(dialog_id)? != DialogState::ContextLimit {
        return Ok(DecisionOutcome::NotPending);
    }

    match reply_text {
        DECISION_START_ANEW => {
            store
                .delete_all(dialog_id)
                .context("failed to delete dialog")?;
        }
        DECISION_FORGET_BEGINNING => {
            let count = store.count(dialog_id)?;
            store
                .trim_first(dialog_id, count / 2)
                .context("failed to trim dialog")?;
        }
        DECISION_SUMMARIZE => {
            let messages = store.read_all(dialog_id)?;
            let summary = summarize_dialog(client, &messages)
                .await
                .context("failed to summarize dialog")?;

            store.replace_all(dialog_id, &DialogMessage::new(Role::User, summary))?;
            store.set_state(dialog_id, DialogState::None)?;
            return Ok(DecisionOutcome::Summarized);
        }
        _ => return Ok(DecisionOutcome::Unrecognized),
    }

    store.set_state(dialog_id, DialogState::None)?;
    Ok(DecisionOutcome::Resolved)
}

/// Two-pass hierarchical summarization.
///
/// A single summarization request over the full dialog could itself overflow,
/// so each half is reduced separately: the older half first, then the newer
/// half together with the first summary.
pub async fn summarize_dialog(
    client: &OpenAiClient,
    messages: &[DialogMessage],
) -> Result<String, CompletionError> {
    let midpoint = messages.len() / 2;

    let first_summary = client
        .chat(&[ChatMessage::new(
            ROLE_USER,
            format!(
                "Summarize this: \n\n{}",
                merge_dialog(&messages[..midpoint])
            ),
        )])
        .await?;

    let summary = client
        .chat(&[ChatMessage::new(
            ROLE_USER,
            format!(
                "Text between {SENTINEL_PREV} and {SENTINEL_PREV} is a summary of previous \
                 dialog with the assistant. Summarize the dialog that continues with messages \
                 between {SENTINEL_CONT} and {SENTINEL_CONT}: \n\n\
                 {SENTINEL_PREV}{first_summary}{SENTINEL_PREV}\n\n\
                 {SENTINEL_CONT}{}{SENTINEL_CONT}",
                merge_dialog(&messages[midpoint..])
            ),
        )])
        .await?;

    let summary = summary
        .replace(SENTINEL_CONT, "")
        .replace(SENTINEL_PREV, "");

    Ok(format!("{SUMMARY_LEAD_IN}{summary}"))
}

/// Render turns as a flat transcript for the summarization prompts.
fn merge_dialog(messages: &[DialogMessage]) -> String {
    let mut merged = String::new();
    for msg in messages {
        let prefix = match msg.role {
            Role::User => "User: ",
            Role::Assistant => "Assistant: ",
        };
        merged.push_str(prefix);
        merged.push_str(&msg.content);
        merged.push_str(TURN_DELIMITER);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn seeded_store(turns: usize) -> DialogStore {
        let store = DialogStore::in_memory().unwrap();
        for i in 0..turns {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store
                .append("chat:42", &DialogMessage::new(role, format!("turn {i}")))
                .unwrap();
        }
        store
    }

    fn offline_client() -> OpenAiClient {
        OpenAiClient::with_base_url("sk-test", "http://127.0.0.1:9")
    }

    #[tokio::test]
    async fn no_pending_state_passes_through() {
        let store = seeded_store(4);
        let outcome =
            resolve_pending_decision(&store, &offline_client(), "chat:42", "hello")
                .await
                .unwrap();
        assert_eq!(outcome, DecisionOutcome::NotPending);
        assert_eq!(store.count("chat:42").unwrap(), 4);
    }

    #[tokio::test]
    async fn start_anew_empties_dialog_and_clears_state() {
        let store = seeded_store(6);
        store.set_state("chat:42", DialogState::ContextLimit).unwrap();

        let outcome =
            resolve_pending_decision(&store, &offline_client(), "chat:42", DECISION_START_ANEW)
                .await
                .unwrap();

        assert_eq!(outcome, DecisionOutcome::Resolved);
        assert_eq!(store.count("chat:42").unwrap(), 0);
        assert_eq!(store.get_state("chat:42").unwrap(), DialogState::None);
    }

    #[tokio::test]
    async fn forget_beginning_halves_dialog() {
        let store = seeded_store(10);
        store.set_state("chat:42", DialogState::ContextLimit).unwrap();

        let outcome = resolve_pending_decision(
            &store,
            &offline_client(),
            "chat:42",
            DECISION_FORGET_BEGINNING,
        )
        .await
        .unwrap();

        assert_eq!(outcome, DecisionOutcome::Resolved);
        let rest = store.read_all("chat:42").unwrap();
        assert_eq!(rest.len(), 5);
        assert_eq!(rest[0].content, "turn 5");
        assert_eq!(store.get_state("chat:42").unwrap(), DialogState::None);
    }

    #[tokio::test]
    async fn forget_beginning_floors_odd_counts() {
        let store = seeded_store(7);
        store.set_state("chat:42", DialogState::ContextLimit).unwrap();

        resolve_pending_decision(
            &store,
            &offline_client(),
            "chat:42",
            DECISION_FORGET_BEGINNING,
        )
        .await
        .unwrap();

        // 7 / 2 = 3 dropped, 4 kept.
        assert_eq!(store.count("chat:42").unwrap(), 4);
    }

    #[tokio::test]
    async fn unrecognized_reply_leaves_state_pending() {
        let store = seeded_store(4);
        store.set_state("chat:42", DialogState::ContextLimit).unwrap();

        let outcome =
            resolve_pending_decision(&store, &offline_client(), "chat:42", "maybe later")
                .await
                .unwrap();

        assert_eq!(outcome, DecisionOutcome::Unrecognized);
        assert_eq!(store.count("chat:42").unwrap(), 4);
        assert_eq!(
            store.get_state("chat:42").unwrap(),
            DialogState::ContextLimit
        );
    }

    #[tokio::test]
    async fn summarize_replaces_dialog_with_single_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains("Summarize this:"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "older half summary"}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains("#PREV#"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "full #PREV# summary #CONT#"}}]
            })))
            .mount(&server)
            .await;

        let store = seeded_store(6);
        store.set_state("chat:42", DialogState::ContextLimit).unwrap();

        let client = OpenAiClient::with_base_url("sk-test", server.uri());
        let outcome =
            resolve_pending_decision(&store, &client, "chat:42", DECISION_SUMMARIZE)
                .await
                .unwrap();

        assert_eq!(outcome, DecisionOutcome::Summarized);
        let messages = store.read_all("chat:42").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(
            messages[0].content,
            "This is a summary of previous dialog messages: \n\nfull  summary "
        );
        assert_eq!(store.get_state("chat:42").unwrap(), DialogState::None);
    }

    #[tokio::test]
    async fn summarize_failure_leaves_dialog_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let store = seeded_store(6);
        store.set_state("chat:42", DialogState::ContextLimit).unwrap();

        let client = OpenAiClient::with_base_url("sk-test", server.uri());
        let result =
            resolve_pending_decision(&store, &client, "chat:42", DECISION_SUMMARIZE).await;

        assert!(result.is_err());
        assert_eq!(store.count("chat:42").unwrap(), 6);
        assert_eq!(
            store.get_state("chat:42").unwrap(),
            DialogState::ContextLimit
        );
    }

    #[test]
    fn merge_dialog_renders_roles_and_delimiters() {
        let messages = vec![
            DialogMessage::new(Role::User, "hi"),
            DialogMessage::new(Role::Assistant, "hello"),
        ];
        assert_eq!(merge_dialog(&messages), "User: hi#END#Assistant: hello#END#");
    }

    #[test]
    fn merge_dialog_empty_is_empty() {
        assert_eq!(merge_dialog(&[]), "");
    }
}
