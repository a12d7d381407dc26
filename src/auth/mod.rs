//! Credential resolution and request authentication
//!
//! Every protected request carries a bearer credential. [`CredentialResolver`]
//! maps it to a [`User`]: cache first, then the strategy chain (plaintext,
//! canonical hash, bounded salted scan). A successful resolution always ends
//! with a rate-limit check for the resolved user.

pub mod cache;
pub mod credential;
pub mod strategy;

pub use cache::{CachedIdentity, CredentialCache, MokaCredentialCache, NoopCredentialCache};
pub use strategy::{CredentialStrategy, ResolutionPath};

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::AppError;
use crate::metrics;
use crate::ratelimit::RateLimiter;
use crate::storage::{run_blocking, Store, StoreError, User, UserId};

/// Authentication, authorization and rate-limit failures
#[derive(Debug)]
pub enum AuthError {
    MissingCredential,
    MalformedCredential,
    InvalidCredential,
    Forbidden(String),
    RateLimited {
        retry_after_secs: u64,
        limit: Option<u32>,
        reset_at_ms: Option<i64>,
    },
    /// Store failure on the auth path; the detail is logged, never returned
    Internal(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "MISSING_API_KEY",
            Self::MalformedCredential => "INVALID_AUTH_FORMAT",
            Self::InvalidCredential => "INVALID_API_KEY",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Internal(_) => "AUTH_FAILED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredential | Self::MalformedCredential | Self::InvalidCredential => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::MissingCredential => "Missing authorization header".to_string(),
            Self::MalformedCredential => "Invalid authorization format".to_string(),
            Self::InvalidCredential => "Invalid API key".to_string(),
            Self::Forbidden(msg) => msg.clone(),
            Self::RateLimited {
                retry_after_secs, ..
            } => format!("Rate limit exceeded. Try again in {retry_after_secs} seconds"),
            Self::Internal(_) => "Authentication failed".to_string(),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Resolved identity, inserted into request extensions by [`auth_middleware`]
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    /// Cache key of the credential that authenticated this request
    pub cache_key: String,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub cache_ttl: Duration,
    pub salted_scan_limit: usize,
    /// Also persist the plaintext credential on issuance
    pub legacy_plaintext: bool,
}

/// Maps bearer credentials to users
pub struct CredentialResolver {
    store: Arc<dyn Store>,
    cache: Arc<dyn CredentialCache>,
    limiter: RateLimiter,
    strategies: Arc<Vec<Arc<dyn CredentialStrategy>>>,
    config: ResolverConfig,
}

/// Strip an optional `Bearer ` scheme. A bare credential is accepted as-is.
pub fn extract_credential(authorization: Option<&HeaderValue>) -> Result<&str, AuthError> {
    let raw = authorization
        .ok_or(AuthError::MissingCredential)?
        .to_str()
        .map_err(|_| AuthError::MalformedCredential)?;
    let credential = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    if credential.is_empty() {
        return Err(AuthError::MalformedCredential);
    }
    Ok(credential)
}

impl CredentialResolver {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn CredentialCache>,
        limiter: RateLimiter,
        config: ResolverConfig,
    ) -> Self {
        let strategies = Arc::new(strategy::default_chain(config.salted_scan_limit));
        Self {
            store,
            cache,
            limiter,
            strategies,
            config,
        }
    }

    pub fn cache_backend(&self) -> &'static str {
        self.cache.name()
    }

    pub fn limiter_backend(&self) -> &'static str {
        self.limiter.backend_name()
    }

    /// Authenticate a request from its `Authorization` header
    pub async fn authenticate(
        &self,
        authorization: Option<&HeaderValue>,
    ) -> Result<AuthenticatedUser, AuthError> {
        let credential = extract_credential(authorization)?;
        let cache_key = credential::cache_key(credential);

        let user = self.resolve(credential, &cache_key).await?;
        self.enforce_rate_limit(&user)?;

        Ok(AuthenticatedUser { user, cache_key })
    }

    /// Resolve a credential without the rate-limit side effect
    pub async fn resolve(&self, credential: &str, cache_key: &str) -> Result<User, AuthError> {
        if let Some(user) = self.resolve_cached(cache_key).await? {
            Self::record(ResolutionPath::Cache.as_str(), "success");
            return Ok(user);
        }

        let store = self.store.clone();
        let strategies = self.strategies.clone();
        let presented = credential.to_string();
        let resolved = run_blocking(move || {
            for strategy in strategies.iter() {
                if let Some(user) = strategy.resolve(store.as_ref(), &presented)? {
                    return Ok(Some((strategy.path(), user)));
                }
            }
            Ok(None)
        })
        .await
        .inspect_err(|_| Self::record("store", "error"))?;

        match resolved {
            Some((path, user)) => {
                Self::record(path.as_str(), "success");
                tracing::debug!(user_id = %user.id, path = path.as_str(), "Credential resolved");
                self.cache_identity(cache_key, &user);
                Ok(user)
            }
            None => {
                Self::record("none", "invalid");
                Err(AuthError::InvalidCredential)
            }
        }
    }

    /// Cache hit → fresh user, or `None` after evicting a stale entry
    async fn resolve_cached(&self, cache_key: &str) -> Result<Option<User>, AuthError> {
        let identity = match self.cache.get(cache_key) {
            Ok(Some(identity)) => identity,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(backend = self.cache.name(), error = %e, "Credential cache read failed");
                return Ok(None);
            }
        };

        let store = self.store.clone();
        let user_id = identity.user_id;
        let user = run_blocking(move || store.find_user(&user_id)).await?;

        match user {
            Some(user) if user.credential_version == identity.credential_version => Ok(Some(user)),
            _ => {
                tracing::debug!(user_id = %identity.user_id, "Stale credential cache entry");
                self.evict(cache_key);
                Ok(None)
            }
        }
    }

    fn cache_identity(&self, cache_key: &str, user: &User) {
        let identity = CachedIdentity {
            user_id: user.id,
            credential_version: user.credential_version,
        };
        if let Err(e) = self
            .cache
            .set_with_ttl(cache_key, identity, self.config.cache_ttl)
        {
            tracing::warn!(backend = self.cache.name(), error = %e, "Credential cache write failed");
        }
    }

    fn evict(&self, cache_key: &str) {
        if let Err(e) = self.cache.delete(cache_key) {
            tracing::warn!(backend = self.cache.name(), error = %e, "Credential cache delete failed");
        }
    }

    fn enforce_rate_limit(&self, user: &User) -> Result<(), AuthError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let decision = self.limiter.check_at(&user.id.to_string(), now_ms);
        if decision.allowed {
            return Ok(());
        }
        tracing::info!(user_id = %user.id, reset_at_ms = decision.reset_at_ms, "Rate limit exceeded");
        Err(AuthError::RateLimited {
            retry_after_secs: decision.retry_after_secs(now_ms),
            limit: Some(decision.limit),
            reset_at_ms: Some(decision.reset_at_ms),
        })
    }

    fn record(path: &str, result: &str) {
        metrics::AUTH_RESOLUTIONS_TOTAL
            .with_label_values(&[path, result])
            .inc();
    }

    // === Issuance ===

    /// Create an account and issue its first credential.
    /// Returns the user and the plaintext credential, which is never stored
    /// unless legacy plaintext mode is on.
    pub async fn register(&self, email: String) -> Result<(User, String), StoreError> {
        let (api_key, material) = credential::issue(1, self.config.legacy_plaintext);
        let store = self.store.clone();
        let user = run_blocking(move || store.create_user(&email, material)).await?;
        tracing::info!(user_id = %user.id, "User registered");
        Ok((user, api_key))
    }

    /// Replace a user's credential and invalidate every cache entry that
    /// could still map the superseded credential to this user
    pub async fn regenerate(
        &self,
        user_id: UserId,
        presented_cache_key: Option<&str>,
    ) -> Result<(User, String), StoreError> {
        let store = self.store.clone();
        let legacy_plaintext = self.config.legacy_plaintext;

        let (previous, updated, api_key) = run_blocking(move || {
            let previous = store
                .find_user(&user_id)?
                .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))?;
            let (api_key, material) =
                credential::issue(previous.credential_version + 1, legacy_plaintext);
            let updated = store.update_user_credential(&user_id, material)?;
            Ok((previous, updated, api_key))
        })
        .await?;

        let mut stale_keys: Vec<String> = presented_cache_key.map(str::to_string).into_iter().collect();
        if let Some(plaintext) = &previous.api_key {
            stale_keys.push(credential::cache_key(plaintext));
        }
        if let Some(hash) = previous.api_key_hash.as_deref().filter(|h| !credential::is_salted_hash(h)) {
            stale_keys.push(credential::cache_key_for_hash(hash));
        }
        for key in &stale_keys {
            self.evict(key);
        }

        tracing::info!(
            user_id = %user_id,
            version = updated.credential_version,
            "Credential regenerated"
        );
        Ok((updated, api_key))
    }
}

/// Authentication middleware for protected routes
pub async fn auth_middleware(
    State(resolver): State<Arc<CredentialResolver>>,
    mut request: Request,
    next: Next,
) -> Response {
    let authorization = request.headers().get(header::AUTHORIZATION).cloned();

    match resolver.authenticate(authorization.as_ref()).await {
        Ok(authenticated) => {
            request.extensions_mut().insert(authenticated);
            next.run(request).await
        }
        Err(e) => AppError::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{NoopRateLimiter, SlidingWindowLimiter};
    use crate::storage::{CredentialMaterial, RocksStore, WriteMode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn config() -> ResolverConfig {
        ResolverConfig {
            cache_ttl: Duration::from_secs(300),
            salted_scan_limit: 100,
            legacy_plaintext: false,
        }
    }

    struct Fixture {
        store: Arc<RocksStore>,
        cache: Arc<MokaCredentialCache>,
        resolver: CredentialResolver,
        _dir: TempDir,
    }

    fn fixture_with_limiter(limiter: RateLimiter) -> Fixture {
        fixture_with(limiter, config())
    }

    fn fixture_with(limiter: RateLimiter, config: ResolverConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path(), WriteMode::Async).unwrap());
        let cache = Arc::new(MokaCredentialCache::new(1000));
        let resolver = CredentialResolver::new(store.clone(), cache.clone(), limiter, config);
        Fixture {
            store,
            cache,
            resolver,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_limiter(RateLimiter::new(Arc::new(NoopRateLimiter)))
    }

    fn bearer(credential: &str) -> HeaderValue {
        HeaderValue::from_str(&format!("Bearer {credential}")).unwrap()
    }

    #[test]
    fn test_extract_credential() {
        assert!(matches!(extract_credential(None), Err(AuthError::MissingCredential)));
        assert!(matches!(
            extract_credential(Some(&HeaderValue::from_static("Bearer "))),
            Err(AuthError::MalformedCredential)
        ));
        assert_eq!(
            extract_credential(Some(&HeaderValue::from_static("Bearer mh_abc"))).unwrap(),
            "mh_abc"
        );
        assert_eq!(
            extract_credential(Some(&HeaderValue::from_static("mh_abc"))).unwrap(),
            "mh_abc"
        );
    }

    #[test]
    fn test_status_taxonomy() {
        assert_eq!(AuthError::MissingCredential.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidCredential.message(), "Invalid API key");
        assert_eq!(
            AuthError::Internal("rocksdb: io".into()).message(),
            "Authentication failed"
        );
        let limited = AuthError::RateLimited {
            retry_after_secs: 12,
            limit: Some(100),
            reset_at_ms: None,
        };
        assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.message(), "Rate limit exceeded. Try again in 12 seconds");
    }

    #[tokio::test]
    async fn test_register_then_authenticate_populates_cache() {
        let fx = fixture();
        let (user, api_key) = fx.resolver.register("a@example.com".to_string()).await.unwrap();
        assert!(credential::is_well_formed(&api_key));
        assert!(user.api_key.is_none());

        let auth = fx.resolver.authenticate(Some(&bearer(&api_key))).await.unwrap();
        assert_eq!(auth.user.id, user.id);

        let cached = fx.cache.get(&credential::cache_key(&api_key)).unwrap().unwrap();
        assert_eq!(cached.user_id, user.id);
    }

    #[tokio::test]
    async fn test_unknown_credential_is_401() {
        let fx = fixture();
        let err = fx
            .resolver
            .authenticate(Some(&bearer("mh_nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential));
    }

    #[tokio::test]
    async fn test_cache_entry_for_missing_user_falls_through() {
        let fx = fixture();
        let (user, api_key) = fx.resolver.register("a@example.com".to_string()).await.unwrap();
        let key = credential::cache_key(&api_key);

        // Point the cache at a user that does not exist
        fx.cache
            .set_with_ttl(
                &key,
                CachedIdentity {
                    user_id: UserId::new(),
                    credential_version: 1,
                },
                Duration::from_secs(300),
            )
            .unwrap();

        let auth = fx.resolver.authenticate(Some(&bearer(&api_key))).await.unwrap();
        assert_eq!(auth.user.id, user.id);
        assert_eq!(fx.cache.get(&key).unwrap().unwrap().user_id, user.id);
    }

    #[tokio::test]
    async fn test_legacy_plaintext_and_salted_users_resolve() {
        let fx = fixture();
        let legacy = fx
            .store
            .create_user(
                "legacy@example.com",
                CredentialMaterial {
                    plaintext: Some("legacy-key".to_string()),
                    hash: None,
                    version: 1,
                },
            )
            .unwrap();
        let salted = fx
            .store
            .create_user(
                "salted@example.com",
                CredentialMaterial {
                    plaintext: None,
                    hash: Some(bcrypt::hash("mh_salted", 4).unwrap()),
                    version: 1,
                },
            )
            .unwrap();

        let auth = fx.resolver.authenticate(Some(&bearer("legacy-key"))).await.unwrap();
        assert_eq!(auth.user.id, legacy.id);
        let auth = fx.resolver.authenticate(Some(&bearer("mh_salted"))).await.unwrap();
        assert_eq!(auth.user.id, salted.id);
    }

    #[tokio::test]
    async fn test_regenerate_invalidates_old_credential() {
        let fx = fixture();
        let (user, old_key) = fx.resolver.register("a@example.com".to_string()).await.unwrap();
        fx.resolver.authenticate(Some(&bearer(&old_key))).await.unwrap();

        let (updated, new_key) = fx.resolver.regenerate(user.id, None).await.unwrap();
        assert_eq!(updated.credential_version, 2);
        assert_ne!(old_key, new_key);

        assert!(fx.cache.get(&credential::cache_key(&old_key)).unwrap().is_none());
        assert!(matches!(
            fx.resolver.authenticate(Some(&bearer(&old_key))).await,
            Err(AuthError::InvalidCredential)
        ));
        assert_eq!(
            fx.resolver.authenticate(Some(&bearer(&new_key))).await.unwrap().user.id,
            user.id
        );
    }

    #[tokio::test]
    async fn test_legacy_plaintext_issuance_round_trip() {
        let fx = fixture_with(
            RateLimiter::new(Arc::new(NoopRateLimiter)),
            ResolverConfig {
                legacy_plaintext: true,
                ..config()
            },
        );
        let (user, old_key) = fx.resolver.register("a@example.com".to_string()).await.unwrap();
        assert_eq!(user.api_key.as_deref(), Some(old_key.as_str()));
        assert_eq!(user.api_key_hash, Some(credential::canonical_hash(&old_key)));

        // Both stored forms point at the same account
        let by_plaintext = fx.store.find_user_by_plaintext(&old_key).unwrap().unwrap();
        let by_hash = fx
            .store
            .find_user_by_hash(&credential::canonical_hash(&old_key))
            .unwrap()
            .unwrap();
        assert_eq!(by_plaintext.id, user.id);
        assert_eq!(by_hash.id, user.id);

        let auth = fx.resolver.authenticate(Some(&bearer(&old_key))).await.unwrap();
        assert_eq!(auth.user.id, user.id);

        let (updated, new_key) = fx
            .resolver
            .regenerate(user.id, Some(&auth.cache_key))
            .await
            .unwrap();
        assert_eq!(updated.api_key.as_deref(), Some(new_key.as_str()));
        assert!(fx.store.find_user_by_plaintext(&old_key).unwrap().is_none());

        assert!(matches!(
            fx.resolver.authenticate(Some(&bearer(&old_key))).await,
            Err(AuthError::InvalidCredential)
        ));
        assert_eq!(
            fx.resolver.authenticate(Some(&bearer(&new_key))).await.unwrap().user.id,
            user.id
        );
    }

    #[tokio::test]
    async fn test_cached_entry_from_older_version_is_stale() {
        let fx = fixture();
        let (user, old_key) = fx.resolver.register("a@example.com".to_string()).await.unwrap();
        let old_cache_key = credential::cache_key(&old_key);
        fx.resolver.regenerate(user.id, None).await.unwrap();

        // Simulate an entry written by a replica that missed the invalidation
        fx.cache
            .set_with_ttl(
                &old_cache_key,
                CachedIdentity {
                    user_id: user.id,
                    credential_version: 1,
                },
                Duration::from_secs(300),
            )
            .unwrap();

        assert!(matches!(
            fx.resolver.authenticate(Some(&bearer(&old_key))).await,
            Err(AuthError::InvalidCredential)
        ));
        assert!(fx.cache.get(&old_cache_key).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_applies_to_cached_and_uncached_paths() {
        let limiter = RateLimiter::new(Arc::new(SlidingWindowLimiter::new(
            3,
            Duration::from_secs(60),
        )));
        let fx = fixture_with_limiter(limiter);
        let (_, api_key) = fx.resolver.register("a@example.com".to_string()).await.unwrap();

        for _ in 0..3 {
            fx.resolver.authenticate(Some(&bearer(&api_key))).await.unwrap();
        }
        match fx.resolver.authenticate(Some(&bearer(&api_key))).await {
            Err(AuthError::RateLimited {
                retry_after_secs, ..
            }) => assert!((1..=60).contains(&retry_after_secs)),
            other => panic!("expected 429, got {other:?}"),
        }
    }

    struct FailingCache {
        reads: AtomicUsize,
    }

    impl CredentialCache for FailingCache {
        fn get(&self, _key: &str) -> anyhow::Result<Option<CachedIdentity>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("cache unreachable")
        }
        fn set_with_ttl(&self, _: &str, _: CachedIdentity, _: Duration) -> anyhow::Result<()> {
            anyhow::bail!("cache unreachable")
        }
        fn delete(&self, _key: &str) -> anyhow::Result<()> {
            anyhow::bail!("cache unreachable")
        }
        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_cache_failure_fails_open() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path(), WriteMode::Async).unwrap());
        let cache = Arc::new(FailingCache {
            reads: AtomicUsize::new(0),
        });
        let resolver = CredentialResolver::new(
            store,
            cache.clone(),
            RateLimiter::new(Arc::new(NoopRateLimiter)),
            config(),
        );

        let (user, api_key) = resolver.register("a@example.com".to_string()).await.unwrap();
        let auth = resolver.authenticate(Some(&bearer(&api_key))).await.unwrap();
        assert_eq!(auth.user.id, user.id);
        assert_eq!(cache.reads.load(Ordering::SeqCst), 1);
    }
}
