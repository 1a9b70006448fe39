//! NotificationHub - User-visible Notifications
//!
//! ## Responsibilities
//!
//! - Keep the latest notifications in a ring buffer for polling clients
//! - Fan out new notifications to live subscribers
//!
//! Presentation (toasts, banners) is up to whoever reads from here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{broadcast, RwLock};

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Error,
    Info,
}

/// One notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub level: NotificationLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Ring buffer for notifications
struct NotificationRingBuffer {
    items: VecDeque<Notification>,
    capacity: usize,
    next_id: u64,
}

impl NotificationRingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_id: 1,
        }
    }

    fn push(&mut self, level: NotificationLevel, message: String) -> Notification {
        let notification = Notification {
            id: self.next_id,
            level,
            message,
            created_at: Utc::now(),
        };
        self.next_id += 1;

        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(notification.clone());
        notification
    }

    fn latest(&self, count: usize) -> Vec<Notification> {
        self.items.iter().rev().take(count).cloned().collect()
    }
}

/// NotificationHub instance
pub struct NotificationHub {
    buffer: RwLock<NotificationRingBuffer>,
    tx: broadcast::Sender<Notification>,
}

impl NotificationHub {
    /// Create new hub keeping at most `capacity` notifications
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            buffer: RwLock::new(NotificationRingBuffer::new(capacity)),
            tx,
        }
    }

    /// Publish a notification
    pub async fn publish(&self, level: NotificationLevel, message: impl Into<String>) -> u64 {
        let notification = self.buffer.write().await.push(level, message.into());
        let id = notification.id;

        match level {
            NotificationLevel::Error => {
                tracing::warn!(notification_id = id, message = %notification.message, "User notified of failure")
            }
            _ => {
                tracing::debug!(notification_id = id, message = %notification.message, "User notified")
            }
        }

        // No receivers is fine
        let _ = self.tx.send(notification);
        id
    }

    pub async fn success(&self, message: impl Into<String>) -> u64 {
        self.publish(NotificationLevel::Success, message).await
    }

    pub async fn error(&self, message: impl Into<String>) -> u64 {
        self.publish(NotificationLevel::Error, message).await
    }

    pub async fn info(&self, message: impl Into<String>) -> u64 {
        self.publish(NotificationLevel::Info, message).await
    }

    /// Latest notifications, newest first
    pub async fn latest(&self, count: usize) -> Vec<Notification> {
        self.buffer.read().await.latest(count)
    }

    /// Live feed of new notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub async fn count(&self) -> usize {
        self.buffer.read().await.items.len()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ring_buffer_drops_oldest() {
        let hub = NotificationHub::new(2);
        hub.success("one").await;
        hub.error("two").await;
        hub.info("three").await;

        let latest = hub.latest(10).await;
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].message, "three");
        assert_eq!(latest[1].message, "two");
        assert_eq!(latest[1].level, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn test_subscribers_receive_new_notifications() {
        let hub = NotificationHub::default();
        let mut rx = hub.subscribe();
        let id = hub.error("Error activating parking: boom").await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, id);
        assert_eq!(received.level, NotificationLevel::Error);
    }
}
