//! Change feed port - the external stream of mutation notifications.

use async_trait::async_trait;

use crate::domain::ChangeNotification;

/// Opens connections to a change notification source.
#[async_trait]
pub trait ChangeFeedTransport: Send + Sync {
    /// Establish a new subscription.
    async fn connect(&self) -> Result<Box<dyn ChangeStream>, ChangeFeedError>;

    /// Human-readable source name for logs.
    fn describe(&self) -> String;
}

/// One live subscription.
#[async_trait]
pub trait ChangeStream: Send {
    /// Next notification. `None` means the connection dropped.
    async fn next(&mut self) -> Option<Result<ChangeNotification, ChangeFeedError>>;
}

/// Change feed errors.
#[derive(Debug, thiserror::Error)]
pub enum ChangeFeedError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection timed out")]
    Timeout,

    #[error("Malformed notification: {0}")]
    Decode(String),
}
