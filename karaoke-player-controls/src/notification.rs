use crate::Result;
use tokio::sync::broadcast::{self, Receiver, Sender};

/// Local, user-facing messages (toasts). Never crosses the window boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Error(String),
    Warning(String),
    Success(String),
    Info(String),
}

#[derive(Debug)]
pub struct NotificationBroadcast {
    tx: Sender<Notification>,
}

impl NotificationBroadcast {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(20);
        Self { tx }
    }

    pub fn send(&self, notification: Notification) -> Result<()> {
        self.tx.send(notification)?;
        Ok(())
    }

    pub fn subscribe(&self) -> Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn send_error(&self, message: String) {
        self.send_quietly(Notification::Error(message));
    }

    pub fn send_warning(&self, message: String) {
        self.send_quietly(Notification::Warning(message));
    }

    pub fn send_info(&self, message: String) {
        self.send_quietly(Notification::Info(message));
    }

    fn send_quietly(&self, notification: Notification) {
        if self.send(notification).is_err() {
            tracing::trace!("no notification listeners");
        }
    }
}

impl Default for NotificationBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sending_without_listeners_is_not_fatal() {
        let broadcast = NotificationBroadcast::new();

        broadcast.send_error("nobody hears this".to_string());
        assert!(broadcast.send(Notification::Info("x".to_string())).is_err());
    }

    #[test]
    fn listeners_receive_messages() {
        let broadcast = NotificationBroadcast::new();
        let mut receiver = broadcast.subscribe();

        broadcast.send_warning("careful".to_string());

        assert_eq!(
            receiver.try_recv().unwrap(),
            Notification::Warning("careful".to_string())
        );
    }
}
