use chrono::{DateTime, Utc};

/// A response stored in the offline cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsset {
    /// Versioned cache the entry belongs to, e.g. `umrah-cache-v1`.
    pub cache_name: String,
    /// Request path or absolute URL the entry answers.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl CachedAsset {
    pub fn new(
        cache_name: impl Into<String>,
        url: impl Into<String>,
        content_type: Option<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            url: url.into(),
            status: 200,
            content_type,
            body,
            stored_at: Utc::now(),
        }
    }
}
