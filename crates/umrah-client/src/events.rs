//! Toast-style alerts raised by the chat core.
//!
//! Only user-initiated operations and incoming notifications produce
//! toasts; background work logs instead.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use umrah_shared::types::ConversationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Info,
    Success,
    Error,
}

/// What clicking the toast does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToastAction {
    OpenConversation { conversation_id: ConversationId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub kind: ToastKind,
    pub title: String,
    pub message: String,
    pub action: Option<ToastAction>,
}

impl Toast {
    pub fn success(message: impl Into<String>) -> Self {
        Self::plain(ToastKind::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::plain(ToastKind::Error, message)
    }

    fn plain(kind: ToastKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: String::new(),
            message: message.into(),
            action: None,
        }
    }
}

/// Where toasts are delivered (the UI layer).
pub trait ToastSink: Send + Sync {
    fn show(&self, toast: Toast);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogToasts;

impl ToastSink for LogToasts {
    fn show(&self, toast: Toast) {
        tracing::info!(kind = ?toast.kind, title = %toast.title, message = %toast.message, "toast");
    }
}

/// Sink that keeps every toast, for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryToasts {
    toasts: Arc<Mutex<Vec<Toast>>>,
}

impl MemoryToasts {
    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, kind: ToastKind) -> usize {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| t.kind == kind)
            .count()
    }
}

impl ToastSink for MemoryToasts {
    fn show(&self, toast: Toast) {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(toast);
    }
}
