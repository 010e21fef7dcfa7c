use spotlight_core::Event;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::trace::Trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Event,
    Trace,
    Online,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event => write!(f, "event"),
            Self::Trace => write!(f, "trace"),
            Self::Online => write!(f, "online"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Notification {
    Event(Arc<Event>),
    Trace(Arc<Trace>),
    Online(bool),
}

impl Notification {
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            Self::Event(_) => SubscriptionKind::Event,
            Self::Trace(_) => SubscriptionKind::Trace,
            Self::Online(_) => SubscriptionKind::Online,
        }
    }
}

/// Fan-out for one subscription kind. Sending never blocks; with no
/// subscribers the notification is simply dropped.
#[derive(Debug)]
pub(crate) struct Channel {
    sender: broadcast::Sender<Notification>,
}

impl Channel {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub(crate) fn notify(&self, notification: Notification) {
        let kind = notification.kind();
        if let Ok(receivers) = self.sender.send(notification) {
            tracing::trace!("Notified {} {} subscriber(s)", receivers, kind);
        }
    }

    pub(crate) fn subscribe(&self, kind: SubscriptionKind) -> Subscription {
        Subscription {
            kind,
            receiver: Some(self.sender.subscribe()),
        }
    }
}

/// Handle returned by `Store::subscribe`. Notifications are delivered in the
/// order the store produced them. Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    kind: SubscriptionKind,
    receiver: Option<broadcast::Receiver<Notification>>,
}

impl Subscription {
    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Wait for the next notification. Returns `None` once unsubscribed or
    /// when the store is gone. A subscriber that falls behind skips the
    /// notifications it missed.
    pub async fn recv(&mut self) -> Option<Notification> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("{} subscriber lagged, skipped {} notifications", self.kind, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next notification if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Notification> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("{} subscriber lagged, skipped {} notifications", self.kind, skipped);
                }
                Err(_) => return None,
            }
        }
    }

    /// Stop receiving. Calling it again has no effect.
    pub fn unsubscribe(&mut self) {
        if self.receiver.take().is_some() {
            tracing::debug!("Unsubscribed from {} notifications", self.kind);
        }
    }
}
