//! In-process change-feed transport.
//!
//! The write path of the same process pushes notifications straight into the
//! live connection. Connect failures, hangs and connection drops can be
//! scripted, which makes this the transport used to exercise the client's
//! reconnect loop.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use tollgate_core::domain::ChangeNotification;
use tollgate_core::ports::{ChangeFeedError, ChangeFeedTransport, ChangeStream};

#[derive(Default)]
struct TransportState {
    live: Option<mpsc::UnboundedSender<ChangeNotification>>,
    failures_left: u32,
    hang: bool,
    connects: u32,
}

/// Channel-backed transport. Clones share the same connection.
#[derive(Clone, Default)]
pub struct ChannelTransport {
    state: Arc<Mutex<TransportState>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver a notification on the live connection.
    /// Returns `false` when nothing is connected.
    pub fn send(&self, notification: ChangeNotification) -> bool {
        let state = self.lock();
        match &state.live {
            Some(tx) => tx.send(notification).is_ok(),
            None => false,
        }
    }

    /// Sever the live connection; the subscriber sees end of stream.
    pub fn drop_connection(&self) {
        self.lock().live = None;
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next(&self, n: u32) {
        self.lock().failures_left = n;
    }

    /// Make connect attempts never complete.
    pub fn hang_connects(&self, hang: bool) {
        self.lock().hang = hang;
    }

    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    pub fn is_connected(&self) -> bool {
        self.lock()
            .live
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl ChangeFeedTransport for ChannelTransport {
    async fn connect(&self) -> Result<Box<dyn ChangeStream>, ChangeFeedError> {
        let hang = {
            let mut state = self.lock();
            state.connects += 1;

            if state.failures_left > 0 {
                state.failures_left -= 1;
                return Err(ChangeFeedError::Connection("connection refused".into()));
            }
            state.hang
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().live = Some(tx);
        Ok(Box::new(ChannelStream { rx }))
    }

    fn describe(&self) -> String {
        "in-process channel".to_string()
    }
}

struct ChannelStream {
    rx: mpsc::UnboundedReceiver<ChangeNotification>,
}

#[async_trait]
impl ChangeStream for ChannelStream {
    async fn next(&mut self) -> Option<Result<ChangeNotification, ChangeFeedError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tollgate_core::domain::ChangeOperation;

    #[tokio::test]
    async fn test_scripted_failures_then_delivery() {
        let transport = ChannelTransport::new();
        transport.fail_next(1);

        assert!(transport.connect().await.is_err());
        let mut stream = transport.connect().await.unwrap();
        assert_eq!(transport.connect_count(), 2);

        let notice = ChangeNotification {
            entity: "orders".to_string(),
            operation: ChangeOperation::Insert,
            keys: vec![],
            occurred_at: Utc::now(),
        };
        assert!(transport.send(notice.clone()));
        assert_eq!(stream.next().await.unwrap().unwrap(), notice);

        transport.drop_connection();
        assert!(stream.next().await.is_none());
        assert!(!transport.send(notice));
    }
}
