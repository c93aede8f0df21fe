//! Outbound operator notifications.
//!
//! The engine produces structured [`Notification`] values; a [`Notifier`]
//! renders and delivers them. Telegram is the production implementation,
//! tests capture notifications in memory, and a null notifier backs runs
//! with messaging disabled.

pub mod telegram;
pub mod types;

pub use telegram::TelegramNotifier;
pub use types::{Notification, NotificationType};

use async_trait::async_trait;

use crate::logger::{self, LogTag};

/// Delivery channel for operator notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), String>;
}

/// Notifier used when messaging is disabled; notifications land in the log
/// only, so no alert is silently lost.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), String> {
        logger::info(
            LogTag::Telegram,
            &format!("(messaging disabled) {:?}", notification.notification_type),
        );
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Collects notifications for assertions in engine tests
    #[derive(Default)]
    pub struct CapturingNotifier {
        notifications: Mutex<Vec<Notification>>,
    }

    impl CapturingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn captured(&self) -> Vec<Notification> {
            self.notifications.lock().unwrap().clone()
        }

        pub fn count(&self) -> usize {
            self.notifications.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Notifier for CapturingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), String> {
            self.notifications.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }
}
