//! Blocking receive over both push-capable and poll-only providers.
//!
//! Providers that can notify about inserts run the native loop in
//! [`QueueClient::await_native`]. Everything else falls back to polling: one
//! receive per iteration, sleeping for the polling interval whenever a
//! receive comes back empty.

use crate::client::QueueClient;
use crate::error::QueueError;
use crate::message::{MessageSet, QueueName, ReceiveOptions};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

#[cfg(test)]
#[path = "awaiting_tests.rs"]
mod tests;

/// Whether an await loop keeps going after a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitControl {
    Continue,
    Stop,
}

impl From<bool> for AwaitControl {
    /// `true` means keep going
    fn from(keep_going: bool) -> Self {
        if keep_going {
            Self::Continue
        } else {
            Self::Stop
        }
    }
}

/// Receives every batch produced by an await loop, including empty ones.
///
/// Implemented for any `FnMut(MessageSet) -> bool` (or `-> AwaitControl`)
/// closure.
#[async_trait]
pub trait BatchHandler: Send {
    async fn on_batch(&mut self, batch: MessageSet) -> Result<AwaitControl, QueueError>;
}

#[async_trait]
impl<F, R> BatchHandler for F
where
    F: FnMut(MessageSet) -> R + Send,
    R: Into<AwaitControl> + Send + 'static,
{
    async fn on_batch(&mut self, batch: MessageSet) -> Result<AwaitControl, QueueError> {
        Ok(self(batch).into())
    }
}

/// How the loop behaves on providers without native await
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwaitSettings {
    /// Sleep after an empty receive
    pub polling_interval: Duration,
    /// Poll when the provider cannot push; fail otherwise
    pub enable_emulation: bool,
}

impl Default for AwaitSettings {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(1),
            enable_emulation: true,
        }
    }
}

/// Run the await loop on `queue` until `handler` stops it.
///
/// There is no overall timeout; the only way out is a `Stop` from the
/// handler or an error.
#[instrument(skip(client, handler, options), fields(queue = %queue, provider = %client.provider_type()))]
pub async fn await_messages(
    client: &QueueClient,
    queue: &QueueName,
    handler: &mut dyn BatchHandler,
    options: &ReceiveOptions,
    settings: AwaitSettings,
) -> Result<(), QueueError> {
    if client.capabilities().await_messages {
        debug!("Using native await");
        return client.await_native(queue, handler, options).await;
    }

    if !settings.enable_emulation {
        return Err(QueueError::unsupported(
            client.provider_type(),
            "await_messages",
        ));
    }

    let polling_interval_ms =
        u64::try_from(settings.polling_interval.as_millis()).unwrap_or(u64::MAX);
    debug!(polling_interval_ms, "Emulating await by polling");
    loop {
        let batch = client.receive_messages(queue, 1, options).await?;
        let idle = batch.is_empty();

        if handler.on_batch(batch).await? == AwaitControl::Stop {
            debug!("Await loop stopped by handler");
            return Ok(());
        }
        if idle {
            tokio::time::sleep(settings.polling_interval).await;
        }
    }
}
