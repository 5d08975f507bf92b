//! NATS message consumer for incoming risk events

use anyhow::Result;
use async_nats::Client;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::info;

/// Consumer for receiving risk events from NATS
pub struct EventConsumer {
    client: Client,
    subject: String,
}

impl EventConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the events subject, yielding raw payloads
    pub async fn subscribe(&self) -> Result<impl Stream<Item = Bytes> + Unpin> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to risk event subject");
        Ok(subscriber.map(|message| message.payload))
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}
