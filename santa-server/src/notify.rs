use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("{0} is not reachable")]
    Unreachable(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends `message` privately to `target`. One attempt, no retries.
    async fn notify(&self, target: &str, message: &str) -> Result<(), DeliveryError>;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    Private { text: String },
}

/// Per-identity mailboxes fed to connected websocket sessions. A target with
/// no open session counts as unreachable.
#[derive(Default)]
pub struct InboxNotifier {
    inboxes: RwLock<HashMap<String, broadcast::Sender<Notice>>>,
}

impl InboxNotifier {
    pub async fn subscribe(&self, identity: &str) -> broadcast::Receiver<Notice> {
        let mut inboxes = self.inboxes.write().await;
        inboxes
            .entry(identity.to_string())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(32);
                tx
            })
            .subscribe()
    }

    /// Forgets the inbox of `identity` once no session listens to it anymore.
    /// Returns whether the entry was removed.
    pub async fn release(&self, identity: &str) -> bool {
        let mut inboxes = self.inboxes.write().await;
        let idle = inboxes
            .get(identity)
            .is_some_and(|tx| tx.receiver_count() == 0);
        if idle {
            inboxes.remove(identity);
            debug!(identity, open = inboxes.len(), "inbox released");
        }
        idle
    }
}

#[async_trait]
impl Notifier for InboxNotifier {
    async fn notify(&self, target: &str, message: &str) -> Result<(), DeliveryError> {
        let inboxes = self.inboxes.read().await;
        let tx = inboxes
            .get(target)
            .ok_or_else(|| DeliveryError::Unreachable(target.to_string()))?;

        // send only fails when every receiver has been dropped
        let listeners = tx
            .send(Notice::Private {
                text: message.to_string(),
            })
            .map_err(|_| DeliveryError::Unreachable(target.to_string()))?;
        debug!(identity = target, listeners, "notice delivered");
        Ok(())
    }
}
