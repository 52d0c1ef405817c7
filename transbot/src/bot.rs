//! Long-polling dispatcher: routes each incoming message to a handler task.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::Result;
use crate::intake::MediaRequest;
use crate::pipeline::{self, Context, StatusMessages};
use crate::telegram::{Message, TelegramClient};
use crate::transport::MessageRef;

pub const WELCOME: &str = "Hi!!!\n\nSend video or music file";

/// Reply used when a request failed in a way the pipeline did not anticipate.
const INTERNAL_FAILURE: &str = "Unexpected error: the request could not be processed.";

/// Delay before polling again after `getUpdates` failed.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

pub struct Bot {
    client: Arc<TelegramClient>,
    ctx: Arc<Context>,
}

impl Bot {
    pub fn new(client: Arc<TelegramClient>, ctx: Arc<Context>) -> Self {
        Self { client, ctx }
    }

    /// Poll for updates until `shutdown` resolves, then wait for in-flight requests.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        if let Err(e) = self.ctx.transport.notify_operator("Bot running").await {
            error!(error = %e, "error sending startup notice to operator");
        }

        let poll_timeout = self.ctx.config.telegram.poll_timeout_secs;
        let mut offset = 0;
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        info!("polling for updates");
        loop {
            let updates = tokio::select! {
                _ = &mut shutdown => break,
                updates = self.client.get_updates(offset, poll_timeout) => updates,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, retrying");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(POLL_BACKOFF) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                if let Some(message) = update.message {
                    let ctx = Arc::clone(&self.ctx);
                    tasks.spawn(async move { handle_message(&ctx, message).await });
                }
            }

            // Reap finished handlers so the set does not grow without bound.
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "message handler aborted");
                }
            }
        }

        info!(in_flight = tasks.len(), "shutting down, waiting for in-flight requests");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "message handler aborted");
            }
        }
        Ok(())
    }
}

/// Route one message: `/start` gets the welcome text, attachments go through the pipeline.
pub async fn handle_message(ctx: &Context, message: Message) {
    let origin = message.reference();

    if let Some(request) = message.media_request() {
        let span = info_span!(
            "request",
            chat = origin.chat_id,
            message = origin.message_id,
            kind = %request.content_kind
        );
        handle_media(ctx, origin, request).instrument(span).await;
        return;
    }

    let is_start = message
        .text
        .as_deref()
        .and_then(|t| t.split_whitespace().next())
        .is_some_and(|cmd| cmd == "/start" || cmd.starts_with("/start@"));
    if is_start {
        if let Err(e) = ctx.transport.reply(origin, WELCOME).await {
            warn!(error = %e, "failed to send welcome message");
        }
    }
}

/// Run the pipeline for one attachment and send the outcome back.
///
/// This is the outermost boundary for a request: panics are caught here and
/// turned into a generic reply, and status messages are always removed.
pub async fn handle_media(ctx: &Context, origin: MessageRef, request: MediaRequest) {
    let transport = ctx.transport.as_ref();
    let mut status = StatusMessages::new(transport, origin);

    let result = AssertUnwindSafe(pipeline::run(ctx, &request, &mut status))
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(outcome)) => {
            for chunk in &outcome.payload.chunks {
                if let Err(e) = transport.reply(origin, chunk).await {
                    error!(error = %e, "failed to deliver result, dropping remaining chunks");
                    break;
                }
            }
            info!(
                chunks = outcome.payload.len(),
                translated = outcome.translation.is_some(),
                "request completed"
            );
        }
        Ok(Err(e)) => {
            if e.is_expected() {
                warn!(error = %e, "request failed");
            } else {
                error!(error = %e, "request failed unexpectedly");
            }
            if let Err(send_err) = transport.reply(origin, &e.user_message()).await {
                warn!(error = %send_err, "failed to report error to user");
            }
        }
        Err(_) => {
            error!("pipeline panicked");
            if let Err(send_err) = transport.reply(origin, INTERNAL_FAILURE).await {
                warn!(error = %send_err, "failed to report error to user");
            }
        }
    }

    status.clear().await;
}
