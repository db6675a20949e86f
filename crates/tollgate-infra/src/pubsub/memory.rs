//! In-memory invalidation bus.
//!
//! Works within a single process only. Delivery is at-least-once per live
//! subscriber; a subscriber that falls behind the buffer skips ahead and
//! logs how many events it missed.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use tollgate_core::domain::InvalidationEvent;
use tollgate_core::ports::{BusError, InvalidationBus, InvalidationHandler, SubscriptionHandle};

/// In-memory invalidation bus over a tokio broadcast channel.
pub struct InMemoryInvalidationBus {
    sender: broadcast::Sender<InvalidationEvent>,
}

impl InMemoryInvalidationBus {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryInvalidationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl InvalidationBus for InMemoryInvalidationBus {
    async fn publish(&self, event: InvalidationEvent) -> Result<(), BusError> {
        // No subscribers is not an error
        match self.sender.send(event) {
            Ok(receivers) => tracing::debug!(receivers, "Invalidation published"),
            Err(_) => tracing::debug!("No subscribers for invalidation"),
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        handler: InvalidationHandler,
    ) -> Result<SubscriptionHandle, BusError> {
        let mut receiver = self.sender.subscribe();
        let handler = Arc::new(handler);

        let task = tokio::spawn(async move {
            tracing::debug!("Subscribed to invalidation bus");

            loop {
                match receiver.recv().await {
                    Ok(event) => handler(event).await,
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        tracing::warn!(lagged = count, "Invalidation subscriber lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Invalidation bus closed");
                        break;
                    }
                }
            }
        });

        Ok(SubscriptionHandle::new(task))
    }
}
