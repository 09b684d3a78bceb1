//! Push worker configuration.

use umrah_shared::constants::{
    CACHE_NAME, DEFAULT_LOCALE, DEFAULT_NOTIFICATION_ICON, DEFAULT_ROUTE_ROLE,
    GENERIC_NOTIFICATION_BODY, GENERIC_NOTIFICATION_TITLE,
};

/// Push worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Origin the static assets are fetched from.
    /// Env: `UMRAH_APP_ORIGIN`
    /// Default: `http://localhost:3000`
    pub origin: String,

    /// Versioned cache name; other versions are purged on activation.
    /// Env: `UMRAH_CACHE_NAME`
    /// Default: `umrah-cache-v1`
    pub cache_name: String,

    /// Paths cached at install.
    pub precache: Vec<String>,

    /// Page served to navigations while offline.
    pub offline_page: String,

    pub default_locale: String,
    pub default_role: String,
    pub generic_title: String,
    pub generic_body: String,
    pub icon: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            cache_name: CACHE_NAME.to_string(),
            precache: vec![
                "/".to_string(),
                "/offline".to_string(),
                "/manifest.json".to_string(),
                DEFAULT_NOTIFICATION_ICON.to_string(),
                "/icons/icon-512x512.png".to_string(),
            ],
            offline_page: "/offline".to_string(),
            default_locale: DEFAULT_LOCALE.to_string(),
            default_role: DEFAULT_ROUTE_ROLE.to_string(),
            generic_title: GENERIC_NOTIFICATION_TITLE.to_string(),
            generic_body: GENERIC_NOTIFICATION_BODY.to_string(),
            icon: DEFAULT_NOTIFICATION_ICON.to_string(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(origin) = get("UMRAH_APP_ORIGIN") {
            if origin.starts_with("http://") || origin.starts_with("https://") {
                config.origin = origin.trim_end_matches('/').to_string();
            } else {
                tracing::warn!(value = %origin, "Invalid UMRAH_APP_ORIGIN, using default");
            }
        }
        if let Some(name) = get("UMRAH_CACHE_NAME") {
            config.cache_name = name;
        }

        config
    }

    /// Whether `path` belongs to the install-time allow-list.
    pub fn is_precached(&self, path: &str) -> bool {
        self.precache.iter().any(|p| p == path)
    }

    /// Absolute URL of an application path.
    pub fn asset_url(&self, path: &str) -> String {
        format!("{}/{}", self.origin, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_overrides() {
        let config = WorkerConfig::from_lookup(|key| match key {
            "UMRAH_APP_ORIGIN" => Some("https://umrah.example/".to_string()),
            "UMRAH_CACHE_NAME" => Some("umrah-cache-v2".to_string()),
            _ => None,
        });
        assert_eq!(config.origin, "https://umrah.example");
        assert_eq!(config.cache_name, "umrah-cache-v2");
        assert_eq!(config.asset_url("/offline"), "https://umrah.example/offline");
        assert!(config.is_precached("/manifest.json"));
        assert_eq!(config.default_locale, "ar");
    }

    #[test]
    fn test_invalid_origin_keeps_default() {
        let config = WorkerConfig::from_lookup(|key| {
            (key == "UMRAH_APP_ORIGIN").then(|| "umrah.example".to_string())
        });
        assert_eq!(config.origin, "http://localhost:3000");
    }
}
