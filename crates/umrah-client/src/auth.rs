//! Authentication bridge.
//!
//! The single place that answers "who is acting now". Identity is resolved
//! from two credential sources:
//!
//! 1. a session provider plus a locally stored token, when both exist;
//! 2. the stored token alone, validated against `GET /user/profile`;
//! 3. otherwise nobody.
//!
//! Resolution is single-flight: concurrent callers await the same shared
//! future. The resolved identity is cached until its token expires or the
//! cache is invalidated by [`AuthBridge::clear_auth_data`],
//! [`AuthBridge::refresh_user`] or [`AuthBridge::store_token`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use umrah_net::{ChatBackend, IdentityProvider};
use umrah_shared::models::ActorIdentity;
use umrah_shared::types::{ActorId, ActorRole};

use crate::error::AuthError;
use crate::token;

/// Process-wide credential change signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSignal {
    /// A token was stored (login).
    Stored,
    /// Credentials were wiped (logout, rejected token).
    Cleared,
}

/// User as known by the session-based provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: ActorId,
    pub name: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

/// Session-based credential source.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_user(&self) -> Option<SessionUser>;

    /// Drop the session on logout.
    async fn sign_out(&self) {}
}

/// A place a bearer token may be kept.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn store(&self, token: &str);
    fn clear(&self);
}

/// [`TokenStore`] held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    token: Arc<Mutex<Option<String>>>,
}

impl MemoryTokenStore {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: Arc::new(Mutex::new(token.map(str::to_string))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, token: &str) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
    }

    fn clear(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

type Resolution = Shared<BoxFuture<'static, Option<ActorIdentity>>>;

#[derive(Default)]
struct Cache {
    /// Bumped on every invalidation; a resolution only caches its result
    /// if the epoch it started in is still current.
    epoch: u64,
    identity: Option<ActorIdentity>,
    pending: Option<(u64, Resolution)>,
}

struct Inner {
    backend: Arc<dyn ChatBackend>,
    session: Option<Arc<dyn SessionProvider>>,
    stores: Vec<Arc<dyn TokenStore>>,
    infer_role_from_email: AtomicBool,
    cache: Mutex<Cache>,
    signals: broadcast::Sender<AuthSignal>,
}

#[derive(Clone)]
pub struct AuthBridge {
    inner: Arc<Inner>,
}

impl AuthBridge {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        session: Option<Arc<dyn SessionProvider>>,
        stores: Vec<Arc<dyn TokenStore>>,
    ) -> Self {
        let (signals, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                backend,
                session,
                stores,
                infer_role_from_email: AtomicBool::new(false),
                cache: Mutex::new(Cache::default()),
                signals,
            }),
        }
    }

    /// Guess the role from the email domain when the backend sends none.
    /// Applies to every clone of this bridge.
    pub fn with_role_inference(self, enabled: bool) -> Self {
        self.inner
            .infer_role_from_email
            .store(enabled, Ordering::Relaxed);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthSignal> {
        self.inner.signals.subscribe()
    }

    /// Cached identity if still valid, otherwise a (shared) resolution.
    pub async fn current_actor(&self) -> Option<ActorIdentity> {
        let (generation, resolution) = {
            let mut cache = self.inner.lock();
            if let Some(identity) = cache.identity.as_ref() {
                if !identity.is_expired() && token::is_valid_at(&identity.token, Utc::now()) {
                    return Some(identity.clone());
                }
                debug!(actor = %identity.id, "Cached identity expired");
                cache.identity = None;
            }

            match cache.pending.as_ref() {
                Some((generation, pending)) => (*generation, pending.clone()),
                None => {
                    let epoch = cache.epoch;
                    let inner = self.inner.clone();
                    let resolution = async move { inner.resolve(epoch).await }.boxed().shared();
                    cache.pending = Some((epoch, resolution.clone()));
                    (epoch, resolution)
                }
            }
        };

        let identity = resolution.await;

        let mut cache = self.inner.lock();
        if matches!(cache.pending, Some((g, _)) if g == generation) {
            cache.pending = None;
        }
        identity
    }

    /// Wipe the cached identity and every token location.
    pub async fn clear_auth_data(&self) {
        self.inner.clear().await;
    }

    /// Drop the cache and resolve again.
    pub async fn refresh_user(&self) -> Option<ActorIdentity> {
        self.inner.invalidate();
        self.current_actor().await
    }

    /// Persist a freshly issued token in every store.
    pub fn store_token(&self, token: &str) {
        for store in &self.inner.stores {
            store.store(token);
        }
        self.inner.invalidate();
        let _ = self.inner.signals.send(AuthSignal::Stored);
        info!("Auth token stored");
    }

    pub fn cached_actor(&self) -> Option<ActorIdentity> {
        self.inner.lock().identity.clone()
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate(&self) {
        let mut cache = self.lock();
        cache.epoch += 1;
        cache.identity = None;
        cache.pending = None;
    }

    async fn clear(&self) {
        self.invalidate();
        for store in &self.stores {
            store.clear();
        }
        if let Some(session) = &self.session {
            session.sign_out().await;
        }
        let _ = self.signals.send(AuthSignal::Cleared);
        info!("Auth data cleared");
    }

    fn stored_token(&self) -> Option<String> {
        self.stores
            .iter()
            .filter_map(|store| store.load())
            .find(|token| !token.trim().is_empty())
    }

    async fn resolve(self: Arc<Self>, epoch: u64) -> Option<ActorIdentity> {
        let identity = self.resolve_uncached().await;
        let mut cache = self.lock();
        if cache.epoch == epoch {
            cache.identity = identity.clone();
        }
        identity
    }

    async fn resolve_uncached(&self) -> Option<ActorIdentity> {
        let token = self.stored_token()?;

        let now = Utc::now();
        let token_expiry = match token::effective_expiry(&token, now) {
            Ok(expiry) => expiry,
            Err(e) => {
                info!(error = %e, "Stored token rejected locally");
                self.clear().await;
                return None;
            }
        };

        if let Some(session) = &self.session {
            if let Some(user) = session.current_user().await {
                match self.role_for(user.role.as_deref(), &[], user.email.as_deref()) {
                    Ok(role) => {
                        debug!(actor = %user.id, role = %role, "Identity from session");
                        return Some(ActorIdentity {
                            id: user.id,
                            display_name: user.name,
                            role,
                            token,
                            token_expiry,
                        });
                    }
                    Err(e) => debug!(error = %e, "Session user unusable, validating token"),
                }
            }
        }

        match self.backend.fetch_profile(&token).await {
            Ok(profile) => {
                let role = match self.role_for(
                    profile.role.as_deref(),
                    &profile.roles,
                    profile.email.as_deref(),
                ) {
                    Ok(role) => role,
                    Err(e) => {
                        warn!(actor = %profile.id, error = %e, "Profile has no usable role");
                        return None;
                    }
                };
                debug!(actor = %profile.id, role = %role, "Identity from profile");
                Some(ActorIdentity {
                    id: profile.id,
                    display_name: profile.name.unwrap_or_default(),
                    role,
                    token,
                    token_expiry,
                })
            }
            Err(e) if e.is_unauthorized() => {
                info!("Stored token rejected by backend");
                self.clear().await;
                None
            }
            Err(e) => {
                warn!(error = %e, "Profile validation failed");
                None
            }
        }
    }

    fn role_for(
        &self,
        role: Option<&str>,
        roles: &[String],
        email: Option<&str>,
    ) -> Result<ActorRole, AuthError> {
        let explicit = role
            .into_iter()
            .chain(roles.iter().map(String::as_str))
            .find_map(|name| name.parse::<ActorRole>().ok());
        if let Some(role) = explicit {
            return Ok(role);
        }
        if self.infer_role_from_email.load(Ordering::Relaxed) {
            if let Some(email) = email {
                return Ok(infer_role(email));
            }
        }
        Err(AuthError::MissingRole)
    }
}

/// Email-domain heuristic. Imprecise; only used when enabled.
fn infer_role(email: &str) -> ActorRole {
    let domain = email
        .rsplit_once('@')
        .map_or(email, |(_, domain)| domain)
        .to_ascii_lowercase();
    if domain.contains("admin") {
        ActorRole::Admin
    } else if domain.contains("office") {
        ActorRole::Office
    } else if domain.contains("bus") {
        ActorRole::BusOperator
    } else {
        ActorRole::Pilgrim
    }
}

#[async_trait]
impl IdentityProvider for AuthBridge {
    async fn current_actor(&self) -> Option<ActorIdentity> {
        AuthBridge::current_actor(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::jwt_with_exp;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use umrah_net::testing::FakeBackend;
    use umrah_net::UserProfile;

    struct FixedSession(Option<SessionUser>);

    #[async_trait]
    impl SessionProvider for FixedSession {
        async fn current_user(&self) -> Option<SessionUser> {
            self.0.clone()
        }
    }

    fn profile(id: u64, role: Option<&str>, email: Option<&str>) -> UserProfile {
        UserProfile {
            id: ActorId(id),
            name: Some(format!("user-{id}")),
            email: email.map(str::to_string),
            role: role.map(str::to_string),
            roles: Vec::new(),
        }
    }

    fn bridge(
        backend: &FakeBackend,
        session: Option<SessionUser>,
        store: &MemoryTokenStore,
    ) -> AuthBridge {
        AuthBridge::new(
            Arc::new(backend.clone()),
            Some(Arc::new(FixedSession(session))),
            vec![Arc::new(store.clone())],
        )
    }

    #[tokio::test]
    async fn test_session_plus_token() {
        let backend = FakeBackend::new();
        let store = MemoryTokenStore::new(Some("12|opaque"));
        let auth = bridge(
            &backend,
            Some(SessionUser {
                id: ActorId(3),
                name: "Office Staff".into(),
                email: None,
                role: Some("office".into()),
            }),
            &store,
        );

        let actor = auth.current_actor().await.unwrap();
        assert_eq!(actor.id, ActorId(3));
        assert_eq!(actor.role, ActorRole::Office);
        assert_eq!(backend.count("profile"), 0);
    }

    #[tokio::test]
    async fn test_no_token_means_nobody() {
        let backend = FakeBackend::new();
        let auth = bridge(&backend, None, &MemoryTokenStore::default());
        assert!(auth.current_actor().await.is_none());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_resolution() {
        let backend = FakeBackend::new();
        backend.add_profile("12|opaque", profile(5, Some("user"), None));
        backend.set_profile_delay(Duration::from_millis(200));
        let store = MemoryTokenStore::new(Some("12|opaque"));
        let auth = bridge(&backend, None, &store);

        let (a, b, c) = tokio::join!(
            auth.current_actor(),
            auth.current_actor(),
            auth.current_actor()
        );
        assert_eq!(a.as_ref().map(|i| i.id), Some(ActorId(5)));
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(backend.count("profile"), 1);

        // Served from cache afterwards.
        assert!(auth.current_actor().await.is_some());
        assert_eq!(backend.count("profile"), 1);
    }

    #[tokio::test]
    async fn test_expired_token_resolves_to_nobody() {
        let backend = FakeBackend::new();
        let expired = jwt_with_exp(Utc::now() - ChronoDuration::seconds(10));
        backend.add_profile(&expired, profile(5, Some("user"), None));
        let store = MemoryTokenStore::new(Some(&expired));
        let auth = bridge(
            &backend,
            Some(SessionUser {
                id: ActorId(5),
                name: "Pilgrim".into(),
                email: None,
                role: Some("pilgrim".into()),
            }),
            &store,
        );
        let mut signals = auth.subscribe();

        assert!(auth.current_actor().await.is_none());
        assert!(store.load().is_none());
        assert_eq!(signals.try_recv().unwrap(), AuthSignal::Cleared);
    }

    #[tokio::test]
    async fn test_unauthorized_profile_clears_credentials() {
        let backend = FakeBackend::new();
        let store = MemoryTokenStore::new(Some("12|revoked"));
        let auth = bridge(&backend, None, &store);

        assert!(auth.current_actor().await.is_none());
        assert_eq!(backend.count("profile"), 1);
        assert!(store.load().is_none());

        // No retry loop on a wiped store.
        assert!(auth.current_actor().await.is_none());
        assert_eq!(backend.count("profile"), 1);
    }

    #[tokio::test]
    async fn test_missing_role_is_an_error_unless_inference_enabled() {
        let backend = FakeBackend::new();
        backend.add_profile("12|t", profile(8, None, Some("ali@office.example")));
        let store = MemoryTokenStore::new(Some("12|t"));

        let strict = bridge(&backend, None, &store);
        assert!(strict.current_actor().await.is_none());

        let lenient = bridge(&backend, None, &store).with_role_inference(true);
        let actor = lenient.current_actor().await.unwrap();
        assert_eq!(actor.role, ActorRole::Office);
    }

    #[tokio::test]
    async fn test_role_inference_reaches_existing_clones() {
        let backend = FakeBackend::new();
        backend.add_profile("12|t", profile(8, None, Some("ali@office.example")));
        let store = MemoryTokenStore::new(Some("12|t"));

        let auth = bridge(&backend, None, &store);
        let shared = auth.clone();
        let _auth = auth.with_role_inference(true);

        let actor = shared.current_actor().await.unwrap();
        assert_eq!(actor.role, ActorRole::Office);
    }

    #[tokio::test]
    async fn test_refresh_user_re_resolves() {
        let backend = FakeBackend::new();
        backend.add_profile("12|t", profile(5, Some("user"), None));
        let store = MemoryTokenStore::new(Some("12|t"));
        let auth = bridge(&backend, None, &store);

        assert_eq!(auth.current_actor().await.unwrap().role, ActorRole::Pilgrim);
        backend.add_profile("12|t", profile(5, Some("admin"), None));
        assert_eq!(auth.refresh_user().await.unwrap().role, ActorRole::Admin);
        assert_eq!(backend.count("profile"), 2);
    }

    #[tokio::test]
    async fn test_store_and_clear_emit_signals() {
        let backend = FakeBackend::new();
        let store = MemoryTokenStore::default();
        let auth = bridge(&backend, None, &store);
        let mut signals = auth.subscribe();

        auth.store_token("12|new");
        assert_eq!(store.load().as_deref(), Some("12|new"));
        auth.clear_auth_data().await;
        assert!(store.load().is_none());

        assert_eq!(signals.recv().await.unwrap(), AuthSignal::Stored);
        assert_eq!(signals.recv().await.unwrap(), AuthSignal::Cleared);
    }

    #[test]
    fn test_role_inference_heuristic() {
        assert_eq!(infer_role("a@admin.umrah.test"), ActorRole::Admin);
        assert_eq!(infer_role("a@bus-co.test"), ActorRole::BusOperator);
        assert_eq!(infer_role("a@gmail.com"), ActorRole::Pilgrim);
    }
}
