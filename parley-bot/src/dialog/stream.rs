//! Streaming reply aggregation.
//!
//! A model reply streams in as many small deltas per second, but the chat
//! transport tolerates only about one edit per second. The aggregator buffers
//! deltas and pushes an edit once per timer period, so outbound edit volume
//! is bounded by the stream duration, not the token arrival rate.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Minimum interval between outbound edits.
pub const EDIT_PERIOD: Duration = Duration::from_secs(1);

/// Outbound edit seam, so the aggregator is testable without a transport.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Create the outbound message; returns its id for later edits.
    async fn send_initial(&self, text: &str) -> Result<i64>;

    /// Replace the text of the previously created message.
    async fn edit(&self, message_id: i64, text: &str) -> Result<()>;
}

/// Consume a delta stream and relay it as periodically edited message text.
///
/// One decision loop selects over the delta channel and a fixed 1-second
/// ticker: deltas only accumulate, ticks push if anything accumulated since
/// the last push, and channel close pushes the full buffer unconditionally
/// (creating the message if nothing was pushed yet). Returns the complete
/// reply text. Push failures are logged and never abort the stream.
pub async fn aggregate_stream(
    mut deltas: mpsc::Receiver<String>,
    sink: &dyn ReplySink,
) -> String {
    let mut buffer = String::new();
    let mut sent_msg_id: Option<i64> = None;
    let mut dirty = false;
    let mut ticker = tokio::time::interval_at(Instant::now() + EDIT_PERIOD, EDIT_PERIOD);

    loop {
        tokio::select! {
            maybe_delta = deltas.recv() => match maybe_delta {
                Some(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    buffer.push_str(&delta);
                    dirty = true;
                }
                None => {
                    push(sink, &mut sent_msg_id, &buffer).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !dirty {
                    continue;
                }
                push(sink, &mut sent_msg_id, &buffer).await;
                dirty = false;
            }
        }
    }

    buffer
}

async fn push(sink: &dyn ReplySink, sent_msg_id: &mut Option<i64>, text: &str) {
    match *sent_msg_id {
        None => match sink.send_initial(text).await {
            Ok(id) => *sent_msg_id = Some(id),
            Err(e) => tracing::warn!("Failed to send streamed reply: {e}"),
        },
        Some(id) => {
            if let Err(e) = sink.edit(id, text).await {
                tracing::warn!("Failed to edit streamed reply: {e}");
            }
        }
    }
}
