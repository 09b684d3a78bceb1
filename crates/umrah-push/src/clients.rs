//! Routing notification clicks to application windows.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

/// An open application window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: String,
    /// Path and query of the page shown, e.g. `/ar/office/chat?id=42`.
    pub url: String,
    pub focused: bool,
}

/// The windows controlled by the worker.
#[async_trait]
pub trait WindowHost: Send + Sync {
    async fn windows(&self) -> Vec<WindowInfo>;

    async fn focus(&self, id: &str) -> bool;

    /// Open a new window at `url`; returns its id.
    async fn open(&self, url: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Focused(String),
    Opened(String),
    Dismissed,
    Failed,
}

/// Focus a window already showing `url`, otherwise open a new one.
pub async fn focus_or_open(host: &dyn WindowHost, url: &str) -> ClickOutcome {
    let existing = host
        .windows()
        .await
        .into_iter()
        .find(|window| same_page(&window.url, url));

    if let Some(window) = existing {
        if host.focus(&window.id).await {
            debug!(window = %window.id, url = %url, "Focused existing window");
            return ClickOutcome::Focused(window.id);
        }
    }

    match host.open(url).await {
        Some(id) => {
            debug!(window = %id, url = %url, "Opened window");
            ClickOutcome::Opened(id)
        }
        None => {
            warn!(url = %url, "Could not open window");
            ClickOutcome::Failed
        }
    }
}

/// Window URLs may be absolute; compare from the path on.
fn same_page(window_url: &str, target: &str) -> bool {
    let path = match window_url.find("://") {
        Some(scheme_end) => {
            let rest = &window_url[scheme_end + 3..];
            rest.find('/').map_or("/", |slash| &rest[slash..])
        }
        None => window_url,
    };
    path == target
}

#[derive(Default)]
struct WindowsState {
    windows: Vec<WindowInfo>,
    next_id: u64,
    refuse_open: bool,
}

/// In-process window host.
#[derive(Clone, Default)]
pub struct MemoryWindows {
    state: Arc<Mutex<WindowsState>>,
}

impl MemoryWindows {
    fn lock(&self) -> std::sync::MutexGuard<'_, WindowsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, url: &str) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("window-{}", state.next_id);
        state.windows.push(WindowInfo {
            id: id.clone(),
            url: url.to_string(),
            focused: false,
        });
        id
    }

    pub fn refuse_open(&self, refuse: bool) {
        self.lock().refuse_open = refuse;
    }

    pub fn snapshot(&self) -> Vec<WindowInfo> {
        self.lock().windows.clone()
    }
}

#[async_trait]
impl WindowHost for MemoryWindows {
    async fn windows(&self) -> Vec<WindowInfo> {
        self.snapshot()
    }

    async fn focus(&self, id: &str) -> bool {
        let mut state = self.lock();
        let mut found = false;
        for window in &mut state.windows {
            window.focused = window.id == id;
            found |= window.focused;
        }
        found
    }

    async fn open(&self, url: &str) -> Option<String> {
        if self.lock().refuse_open {
            return None;
        }
        let id = self.add(url);
        self.focus(&id).await;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_focuses_matching_window() {
        let host = MemoryWindows::default();
        host.add("https://umrah.example/ar/office/dashboard");
        let chat = host.add("https://umrah.example/ar/office/chat?id=42");

        let outcome = focus_or_open(&host, "/ar/office/chat?id=42").await;
        assert_eq!(outcome, ClickOutcome::Focused(chat));
        assert_eq!(host.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_opens_when_no_window_matches() {
        let host = MemoryWindows::default();
        host.add("/ar/office/chat?id=7");

        let outcome = focus_or_open(&host, "/ar/office/chat?id=42").await;
        assert!(matches!(outcome, ClickOutcome::Opened(_)));
        let windows = host.snapshot();
        assert_eq!(windows.len(), 2);
        assert!(windows[1].focused);
        assert_eq!(windows[1].url, "/ar/office/chat?id=42");

        host.refuse_open(true);
        assert_eq!(
            focus_or_open(&host, "/ar/user/chat").await,
            ClickOutcome::Failed
        );
    }
}
