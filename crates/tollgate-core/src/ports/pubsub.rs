//! Invalidation bus port - typed publish/subscribe for invalidation events.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::domain::InvalidationEvent;

/// Handler for incoming invalidation events.
pub type InvalidationHandler =
    Box<dyn Fn(InvalidationEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Box an async closure into an [`InvalidationHandler`].
pub fn handler<F, Fut>(f: F) -> InvalidationHandler
where
    F: Fn(InvalidationEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |event| -> Pin<Box<dyn Future<Output = ()> + Send>> { Box::pin(f(event)) })
}

/// Invalidation bus - abstraction over pub/sub backends.
#[async_trait]
pub trait InvalidationBus: Send + Sync {
    /// Publish an event to every active subscriber.
    async fn publish(&self, event: InvalidationEvent) -> Result<(), BusError>;

    /// Register a handler. Events are delivered on a background task owned
    /// by the returned handle.
    async fn subscribe(&self, handler: InvalidationHandler)
    -> Result<SubscriptionHandle, BusError>;
}

/// Owns the delivery task of one subscription.
///
/// Dropping the handle detaches the task; call [`SubscriptionHandle::close`]
/// for deterministic teardown.
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Stop delivery and wait for the task to finish.
    pub async fn close(self) {
        self.task.abort();
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Failed to publish: {0}")]
    Publish(String),

    #[error("Failed to subscribe: {0}")]
    Subscribe(String),

    #[error("Connection error: {0}")]
    Connection(String),
}
