//! OS notification surface.

use std::sync::{Arc, Mutex, PoisonError};

use crate::payload::RenderedNotification;

/// Where notifications are displayed.
pub trait NotificationSurface: Send + Sync {
    /// Show `notification`, replacing any visible one with the same tag.
    fn show(&self, notification: RenderedNotification);

    /// Dismiss the notification with `tag`. Returns whether one was visible.
    fn close(&self, tag: &str) -> bool;

    fn visible(&self) -> Vec<RenderedNotification>;
}

#[derive(Default)]
struct SurfaceState {
    visible: Vec<RenderedNotification>,
    shown_total: usize,
}

/// In-process surface with platform tag semantics.
#[derive(Clone, Default)]
pub struct MemorySurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl MemorySurface {
    fn lock(&self) -> std::sync::MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Notifications shown since creation, replaced ones included.
    pub fn shown_total(&self) -> usize {
        self.lock().shown_total
    }
}

impl NotificationSurface for MemorySurface {
    fn show(&self, notification: RenderedNotification) {
        let mut state = self.lock();
        state.shown_total += 1;
        match state.visible.iter().position(|n| n.tag == notification.tag) {
            Some(pos) => state.visible[pos] = notification,
            None => state.visible.push(notification),
        }
    }

    fn close(&self, tag: &str) -> bool {
        let mut state = self.lock();
        let before = state.visible.len();
        state.visible.retain(|n| n.tag != tag);
        state.visible.len() != before
    }

    fn visible(&self) -> Vec<RenderedNotification> {
        self.lock().visible.clone()
    }
}
