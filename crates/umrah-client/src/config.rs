//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the core starts with zero configuration.
//! A missing pub/sub app key is not an error: realtime is simply disabled.

use std::time::Duration;

use umrah_net::PusherConfig;
use umrah_shared::constants::{LIVENESS_INTERVAL_SECS, UNREAD_POLL_SECS};

/// Chat core configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST backend base URL.
    /// Env: `UMRAH_API_BASE_URL`
    /// Default: `http://localhost:8000/api`
    pub api_base_url: String,

    /// Pub/sub connection settings; `None` disables realtime.
    /// Env: `UMRAH_PUSHER_APP_KEY`, `UMRAH_PUSHER_CLUSTER` (default `mt1`),
    /// `UMRAH_PUSHER_HOST` (self-hosted server, plain `ws://` if prefixed so)
    pub pusher: Option<PusherConfig>,

    /// Fallback poll of the unread count.
    /// Env: `UMRAH_UNREAD_POLL_SECS`
    /// Default: 60
    pub unread_poll_interval: Duration,

    /// Chat session liveness check.
    /// Env: `UMRAH_LIVENESS_SECS`
    /// Default: 30
    pub liveness_interval: Duration,

    /// Guess the actor role from the email domain when the backend omits it.
    /// Env: `UMRAH_INFER_ROLE_FROM_EMAIL` (true/false)
    /// Default: `false`
    pub infer_role_from_email: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            pusher: None,
            unread_poll_interval: Duration::from_secs(UNREAD_POLL_SECS),
            liveness_interval: Duration::from_secs(LIVENESS_INTERVAL_SECS),
            infer_role_from_email: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("UMRAH_API_BASE_URL") {
            config.api_base_url = url;
        }

        match get("UMRAH_PUSHER_APP_KEY") {
            Some(key) => {
                let cluster = get("UMRAH_PUSHER_CLUSTER").unwrap_or_else(|| "mt1".to_string());
                let mut pusher = PusherConfig::new(key, cluster);
                if let Some(host) = get("UMRAH_PUSHER_HOST") {
                    if let Some(plain) = host.strip_prefix("ws://") {
                        pusher.use_tls = false;
                        pusher.host = Some(plain.to_string());
                    } else {
                        pusher.host = Some(host.trim_start_matches("wss://").to_string());
                    }
                }
                config.pusher = Some(pusher);
            }
            None => {
                tracing::warn!("UMRAH_PUSHER_APP_KEY not set, realtime disabled");
            }
        }

        if let Some(value) = get("UMRAH_UNREAD_POLL_SECS") {
            match parse_secs(&value) {
                Some(interval) => config.unread_poll_interval = interval,
                None => tracing::warn!(value = %value, "Invalid UMRAH_UNREAD_POLL_SECS, using default"),
            }
        }

        if let Some(value) = get("UMRAH_LIVENESS_SECS") {
            match parse_secs(&value) {
                Some(interval) => config.liveness_interval = interval,
                None => tracing::warn!(value = %value, "Invalid UMRAH_LIVENESS_SECS, using default"),
            }
        }

        if let Some(value) = get("UMRAH_INFER_ROLE_FROM_EMAIL") {
            match value.parse::<bool>() {
                Ok(flag) => config.infer_role_from_email = flag,
                Err(_) => tracing::warn!(
                    value = %value,
                    "Invalid UMRAH_INFER_ROLE_FROM_EMAIL, using default"
                ),
            }
        }

        config
    }

    pub fn realtime_enabled(&self) -> bool {
        self.pusher.is_some()
    }
}

/// Whole seconds, strictly positive.
fn parse_secs(value: &str) -> Option<Duration> {
    match value.parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(secs) => Some(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_disable_realtime() {
        let config = config(&[]);
        assert!(!config.realtime_enabled());
        assert_eq!(config.unread_poll_interval, Duration::from_secs(60));
        assert_eq!(config.liveness_interval, Duration::from_secs(30));
        assert!(!config.infer_role_from_email);
    }

    #[test]
    fn test_pusher_settings() {
        let config = config(&[
            ("UMRAH_PUSHER_APP_KEY", "app-key"),
            ("UMRAH_PUSHER_CLUSTER", "eu"),
            ("UMRAH_PUSHER_HOST", "ws://localhost:6001"),
        ]);
        let pusher = config.pusher.unwrap();
        assert_eq!(pusher.cluster, "eu");
        assert!(!pusher.use_tls);
        assert!(pusher.url().starts_with("ws://localhost:6001/app/app-key"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config(&[
            ("UMRAH_UNREAD_POLL_SECS", "soon"),
            ("UMRAH_LIVENESS_SECS", "0"),
            ("UMRAH_INFER_ROLE_FROM_EMAIL", "maybe"),
            ("UMRAH_API_BASE_URL", "https://api.umrah.test"),
        ]);
        assert_eq!(config.unread_poll_interval, Duration::from_secs(60));
        assert_eq!(config.liveness_interval, Duration::from_secs(30));
        assert!(!config.infer_role_from_email);
        assert_eq!(config.api_base_url, "https://api.umrah.test");
    }
}
