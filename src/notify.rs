//! Notification boundary
//!
//! Check results leave the engine as typed [`Notification`] values delivered
//! through registered [`NotificationChannel`]s. Delivery is best-effort
//! fan-out: one failing channel never blocks the others, and the hub errors
//! only when every enabled channel failed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("a channel of kind {0:?} is already registered")]
    DuplicateChannel(String),

    #[error("all {failed} enabled channels failed to deliver")]
    AllChannelsFailed { failed: usize },
}

/// One image for which a newer eligible tag was found.
#[derive(Debug, Clone, Serialize)]
pub struct ImageUpdate {
    pub registry: String,
    pub repository: String,
    pub current_tag: String,
    pub latest_tag: String,
    /// Name of the container running this image, when known.
    pub container_name: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Everything a channel can be asked to deliver.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    UpdateBatch { updates: Vec<ImageUpdate> },
    ErrorReport { source: String, message: String },
    HealthReport { healthy: bool, detail: String },
}

/// A delivery transport (log sink, mail, chat, ...).
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Stable identifier used for the duplicate-registration guard.
    fn kind(&self) -> &str;

    fn is_enabled(&self) -> bool;

    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Registry of channels plus the fan-out logic.
#[derive(Default)]
pub struct NotificationHub {
    channels: Vec<Box<dyn NotificationChannel>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Box<dyn NotificationChannel>) -> Result<(), NotifyError> {
        if self.channels.iter().any(|c| c.kind() == channel.kind()) {
            return Err(NotifyError::DuplicateChannel(channel.kind().to_string()));
        }
        info!(kind = channel.kind(), "notification channel registered");
        self.channels.push(channel);
        Ok(())
    }

    /// Deliver to every enabled channel. With no enabled channels this is a
    /// no-op; it errors only when every enabled channel failed.
    pub async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut attempted = 0usize;
        let mut failed = 0usize;

        for channel in self.channels.iter().filter(|c| c.is_enabled()) {
            attempted += 1;
            if let Err(err) = channel.deliver(notification).await {
                failed += 1;
                warn!(kind = channel.kind(), error = %err, "notification delivery failed");
            }
        }

        if attempted > 0 && failed == attempted {
            return Err(NotifyError::AllChannelsFailed { failed });
        }
        Ok(())
    }
}

/// Channel that writes notifications to the log. Always available, so a bare
/// configuration still surfaces results somewhere.
pub struct LogChannel;

#[async_trait::async_trait]
impl NotificationChannel for LogChannel {
    fn kind(&self) -> &str {
        "log"
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification {
            Notification::UpdateBatch { updates } => {
                info!(count = updates.len(), "image updates available");
                for update in updates {
                    info!(
                        registry = %update.registry,
                        repository = %update.repository,
                        current_tag = %update.current_tag,
                        latest_tag = %update.latest_tag,
                        container = update.container_name.as_deref().unwrap_or(""),
                        "update available"
                    );
                }
            }
            Notification::ErrorReport { source, message } => {
                warn!(%source, %message, "error report");
            }
            Notification::HealthReport { healthy, detail } => {
                info!(healthy, %detail, "health report");
            }
        }
        Ok(())
    }
}
