use std::sync::{Arc, Mutex};

use log::{error, info};

use crate::api::{Notification, NotificationKind};

/// Fire-and-forget notification sink. The dashboard never awaits or queries
/// it; every write action pushes exactly one notification through here.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Info => info!("{}: {}", notification.title, notification.message),
            NotificationKind::Error => error!("{}: {}", notification.title, notification.message),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}
