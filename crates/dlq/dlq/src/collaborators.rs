//! Contracts for the collaborators the DLQ calls out to.

use async_trait::async_trait;

use crate::entry::Message;
use crate::error::DlqResult;

/// Re-injects a message into its original processing path.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `message` to `topic`.
    async fn publish(&self, topic: &str, message: &Message) -> DlqResult<()>;
}

/// Delivers operator notifications.
#[async_trait]
pub trait Alerting: Send + Sync {
    /// Sends a warning-level alert.
    async fn send_warning(&self, kind: &str, text: &str) -> DlqResult<()>;

    /// Sends a critical alert.
    async fn send_critical(&self, kind: &str, text: &str) -> DlqResult<()>;

    /// Sends a security alert.
    async fn send_security(&self, kind: &str, text: &str) -> DlqResult<()>;
}
