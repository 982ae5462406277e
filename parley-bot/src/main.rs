//! Service entry point: bootstrap, then the long-poll update loop.

use anyhow::Result;
use parley_bot::{handler, AppContext, Config};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const POLL_TIMEOUT_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let ctx = Arc::new(AppContext::new(config)?);

    if let Err(e) = ctx
        .telegram
        .set_my_commands(&[
            ("help", "Usage help"),
            ("new", "Start a new dialog"),
            ("imagine", "Generate image from text"),
        ])
        .await
    {
        tracing::error!("Failed to set bot commands: {e}");
    }

    tracing::info!("parley-bot listening for updates");

    let mut offset: i64 = 0;
    loop {
        let updates = match ctx.telegram.get_updates(offset, POLL_TIMEOUT_SECS).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!("Telegram poll error: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);

            // Each update gets its own task; the per-dialog guard keeps
            // overlapping messages for one dialog from interleaving.
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                handler::handle_update(ctx, update).await;
            });
        }
    }
}
