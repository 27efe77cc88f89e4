//! Turns a cache on disk into an [`AccountResolutionResult`].
//!
//! Resolvers never fail outright: every error becomes a field on the result
//! so the caller can fall through to another login strategy.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::account::{index_accounts, select_account, ResolvedAccount};
use crate::cache::TokenCache;
use crate::config::{ResolverConfig, IDE_BROKER_CLIENT_ID};
use crate::credential::{CredentialProvider, SharedCacheCredentialProvider, TokenExchange};
use crate::environment::CloudEnvironment;
use crate::error::{AuthError, AuthResult};
use crate::tenant::TenantLister;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    BrokerCache,
    SecretFile,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrokerCache => "broker_cache",
            Self::SecretFile => "secret_file",
        }
    }
}

/// Terminal state of one resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Resolved,
    Unavailable,
    Corrupt,
    NoMatch,
    Failed,
}

impl ResolutionOutcome {
    pub fn from_error(error: &AuthError) -> Self {
        match error {
            AuthError::CacheUnavailable(_) => Self::Unavailable,
            AuthError::CacheCorrupt(_) => Self::Corrupt,
            AuthError::NoCandidateAccount => Self::NoMatch,
            _ => Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Unavailable => "unavailable",
            Self::Corrupt => "corrupt",
            Self::NoMatch => "no_match",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone)]
pub struct AccountResolutionResult {
    pub method: AuthMethod,
    pub outcome: ResolutionOutcome,
    /// True iff an account was resolved and a credential provider built.
    pub authenticated: bool,
    pub environment: Option<CloudEnvironment>,
    pub username: Option<String>,
    pub home_tenant_id: Option<String>,
    pub tenant_ids: Vec<String>,
    pub subscription_ids: Vec<String>,
    /// Why the outcome is not `Resolved`.
    pub error: Option<AuthError>,
    /// Tenant enumeration failure; does not affect `authenticated`.
    pub tenant_error: Option<AuthError>,
    credential_provider: Option<Arc<dyn CredentialProvider>>,
}

impl AccountResolutionResult {
    pub fn from_error(method: AuthMethod, error: AuthError) -> Self {
        Self {
            method,
            outcome: ResolutionOutcome::from_error(&error),
            authenticated: false,
            environment: None,
            username: None,
            home_tenant_id: None,
            tenant_ids: Vec::new(),
            subscription_ids: Vec::new(),
            error: Some(error),
            tenant_error: None,
            credential_provider: None,
        }
    }

    pub fn resolved(
        method: AuthMethod,
        environment: CloudEnvironment,
        username: Option<String>,
        credential_provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            method,
            outcome: ResolutionOutcome::Resolved,
            authenticated: true,
            environment: Some(environment),
            username,
            home_tenant_id: None,
            tenant_ids: Vec::new(),
            subscription_ids: Vec::new(),
            error: None,
            tenant_error: None,
            credential_provider: Some(credential_provider),
        }
    }

    pub fn credential_provider(&self) -> Option<&Arc<dyn CredentialProvider>> {
        self.credential_provider.as_ref()
    }

    /// Fills `tenant_ids` using an unscoped credential. Failures are recorded
    /// in `tenant_error` and leave the tenant list empty.
    pub fn enumerate_tenants(&mut self, lister: &dyn TenantLister) {
        let (Some(environment), Some(provider)) =
            (self.environment, self.credential_provider.as_ref())
        else {
            return;
        };

        match lister.list_tenants(environment, &provider.common()) {
            Ok(tenant_ids) => {
                self.tenant_ids = tenant_ids;
                self.tenant_error = None;
            }
            Err(err) => {
                warn!(method = self.method.as_str(), error = %err, "tenant enumeration failed");
                self.tenant_ids.clear();
                self.tenant_error = Some(match err {
                    AuthError::TenantEnumerationFailed(_) => err,
                    other => AuthError::TenantEnumerationFailed(other.to_string()),
                });
            }
        }
    }
}

impl PartialEq for AccountResolutionResult {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
            && self.outcome == other.outcome
            && self.authenticated == other.authenticated
            && self.environment == other.environment
            && self.username == other.username
            && self.home_tenant_id == other.home_tenant_id
            && self.tenant_ids == other.tenant_ids
            && self.subscription_ids == other.subscription_ids
            && self.error == other.error
            && self.tenant_error == other.tenant_error
            && self.credential_provider.is_some() == other.credential_provider.is_some()
    }
}

impl fmt::Debug for AccountResolutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountResolutionResult")
            .field("method", &self.method)
            .field("outcome", &self.outcome)
            .field("authenticated", &self.authenticated)
            .field("environment", &self.environment)
            .field("username", &self.username)
            .field("home_tenant_id", &self.home_tenant_id)
            .field("tenant_ids", &self.tenant_ids)
            .field("subscription_ids", &self.subscription_ids)
            .field("error", &self.error)
            .field("tenant_error", &self.tenant_error)
            .field("has_credential_provider", &self.credential_provider.is_some())
            .finish()
    }
}

/// A strategy that tries to produce a signed-in account without user interaction.
pub trait AccountResolver {
    fn method(&self) -> AuthMethod;

    fn resolve(&self) -> AccountResolutionResult;
}

/// Resolves the account the IDE broker has already signed in.
pub struct BrokerCacheResolver {
    cache_path: PathBuf,
    client_id: String,
    environment_filter: Option<CloudEnvironment>,
    exchange: Arc<dyn TokenExchange>,
    tenant_lister: Arc<dyn TenantLister>,
}

impl BrokerCacheResolver {
    pub fn new(
        cache_path: impl Into<PathBuf>,
        exchange: Arc<dyn TokenExchange>,
        tenant_lister: Arc<dyn TenantLister>,
    ) -> Self {
        Self {
            cache_path: cache_path.into(),
            client_id: IDE_BROKER_CLIENT_ID.to_string(),
            environment_filter: None,
            exchange,
            tenant_lister,
        }
    }

    pub fn from_config(
        config: &ResolverConfig,
        exchange: Arc<dyn TokenExchange>,
        tenant_lister: Arc<dyn TenantLister>,
    ) -> Self {
        Self::new(config.cache_path.clone(), exchange, tenant_lister)
            .with_client_id(config.client_id.clone())
            .with_environment(config.environment)
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Restricts resolution to a single cloud.
    pub fn with_environment(mut self, environment: Option<CloudEnvironment>) -> Self {
        self.environment_filter = environment;
        self
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    fn select(&self) -> AuthResult<ResolvedAccount> {
        let cache = TokenCache::read(&self.cache_path)?;
        let index = index_accounts(cache.accounts());
        debug!(
            access_tokens = cache.access_token_count(),
            accounts = index.len(),
            "indexed token cache"
        );

        let candidate = select_account(
            cache.access_tokens(),
            &index,
            &self.client_id,
            self.environment_filter,
        )
        .ok_or(AuthError::NoCandidateAccount)?;

        let account = ResolvedAccount::from(candidate);
        if account.username.trim().is_empty() {
            return Err(AuthError::InvalidAccount(format!(
                "account {} has no username",
                account.home_account_id
            )));
        }
        Ok(account)
    }
}

impl AccountResolver for BrokerCacheResolver {
    fn method(&self) -> AuthMethod {
        AuthMethod::BrokerCache
    }

    fn resolve(&self) -> AccountResolutionResult {
        let account = match self.select() {
            Ok(account) => account,
            Err(err) => {
                let result = AccountResolutionResult::from_error(self.method(), err);
                match result.outcome {
                    ResolutionOutcome::Unavailable | ResolutionOutcome::NoMatch => debug!(
                        path = %self.cache_path.display(),
                        outcome = result.outcome.as_str(),
                        "no cached broker account"
                    ),
                    _ => warn!(
                        path = %self.cache_path.display(),
                        outcome = result.outcome.as_str(),
                        error = ?result.error,
                        "broker cache resolution failed"
                    ),
                }
                return result;
            }
        };

        let provider: Arc<dyn CredentialProvider> = Arc::new(SharedCacheCredentialProvider::new(
            account.environment,
            self.client_id.clone(),
            account.username.clone(),
            Arc::clone(&self.exchange),
        ));
        info!(environment = %account.environment, "resolved cached broker account");

        let mut result = AccountResolutionResult::resolved(
            self.method(),
            account.environment,
            Some(account.username),
            provider,
        );
        result.home_tenant_id = account.home_tenant_id;
        result.enumerate_tenants(self.tenant_lister.as_ref());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{AccessToken, Credential, CredentialRequest, Grant};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn write_cache(path: &Path, cache: &serde_json::Value) {
        fs::write(path, serde_json::to_vec(cache).expect("encode cache")).expect("write cache");
    }

    fn single_account_cache(target: &str, username: &str) -> serde_json::Value {
        serde_json::json!({
            "AccessToken": {
                "token-1": {
                    "home_account_id": "uid.utid",
                    "environment": "login.microsoftonline.com",
                    "client_id": IDE_BROKER_CLIENT_ID,
                    "target": target,
                    "secret": "at-secret"
                }
            },
            "Account": {
                "account-1": {
                    "home_account_id": "uid.utid",
                    "environment": "login.microsoftonline.com",
                    "realm": "utid",
                    "local_account_id": "uid",
                    "username": username,
                    "name": "Dev"
                }
            }
        })
    }

    fn counting_exchange(calls: Arc<AtomicUsize>) -> Arc<dyn TokenExchange> {
        Arc::new(
            move |_request: &CredentialRequest, _scopes: &[String]| -> AuthResult<AccessToken> {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(AccessToken {
                    token: "at".to_string(),
                    expires_on: None,
                })
            },
        )
    }

    fn static_tenants(tenants: &'static [&'static str]) -> Arc<dyn TenantLister> {
        Arc::new(
            move |_environment: CloudEnvironment, _credential: &Credential| -> AuthResult<Vec<String>> {
                Ok(tenants.iter().map(|tenant| tenant.to_string()).collect())
            },
        )
    }

    #[test]
    fn resolves_account_whose_token_targets_a_registry_endpoint() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("msal.cache");
        write_cache(
            &path,
            &single_account_cache(
                CloudEnvironment::UsGovernment.management_endpoint(),
                "gov@example.com",
            ),
        );
        let exchanges = Arc::new(AtomicUsize::new(0));
        let resolver = BrokerCacheResolver::new(
            &path,
            counting_exchange(Arc::clone(&exchanges)),
            static_tenants(&["tenant-a", "tenant-b"]),
        );

        let result = resolver.resolve();
        assert!(result.authenticated);
        assert_eq!(result.outcome, ResolutionOutcome::Resolved);
        assert_eq!(result.environment, Some(CloudEnvironment::UsGovernment));
        assert_eq!(result.username.as_deref(), Some("gov@example.com"));
        assert_eq!(result.home_tenant_id.as_deref(), Some("utid"));
        assert_eq!(result.tenant_ids, vec!["tenant-a", "tenant-b"]);
        assert_eq!(result.error, None);
        assert_eq!(exchanges.load(Ordering::SeqCst), 0);

        let provider = result.credential_provider().expect("provider");
        let credential = provider.for_tenant("tenant-a");
        assert_eq!(
            credential.request().grant,
            Grant::SharedCache {
                client_id: IDE_BROKER_CLIENT_ID.to_string(),
                username: "gov@example.com".to_string(),
            }
        );
        credential.get_token(&[]).expect("token");
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tenant_lister_receives_unscoped_credential() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("msal.cache");
        write_cache(
            &path,
            &single_account_cache(CloudEnvironment::Global.management_endpoint(), "dev@example.com"),
        );
        let seen = Arc::new(Mutex::new(Vec::<CredentialRequest>::new()));
        let seen_ref = Arc::clone(&seen);
        let lister: Arc<dyn TenantLister> = Arc::new(
            move |environment: CloudEnvironment, credential: &Credential| -> AuthResult<Vec<String>> {
                assert_eq!(environment, CloudEnvironment::Global);
                if let Ok(mut list) = seen_ref.lock() {
                    list.push(credential.request().clone());
                }
                Ok(vec!["t1".to_string()])
            },
        );
        let resolver =
            BrokerCacheResolver::new(&path, counting_exchange(Arc::new(AtomicUsize::new(0))), lister);

        let result = resolver.resolve();
        assert_eq!(result.tenant_ids, vec!["t1"]);
        let seen = seen.lock().expect("seen");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].tenant_id, None);
    }

    #[test]
    fn missing_cache_is_unauthenticated_without_escaping() {
        let temp = TempDir::new().expect("temp dir");
        let resolver = BrokerCacheResolver::new(
            temp.path().join("absent/msal.cache"),
            counting_exchange(Arc::new(AtomicUsize::new(0))),
            static_tenants(&[]),
        );

        let result = resolver.resolve();
        assert!(!result.authenticated);
        assert_eq!(result.outcome, ResolutionOutcome::Unavailable);
        assert!(matches!(result.error, Some(AuthError::CacheUnavailable(_))));
        assert!(result.credential_provider().is_none());
    }

    #[test]
    fn malformed_cache_carries_cache_corrupt() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("msal.cache");
        for contents in ["\"not json\"", "\"not json", "not json"] {
            fs::write(&path, contents).expect("write");
            let resolver = BrokerCacheResolver::new(
                &path,
                counting_exchange(Arc::new(AtomicUsize::new(0))),
                static_tenants(&[]),
            );

            let result = resolver.resolve();
            assert!(!result.authenticated, "contents: {}", contents);
            assert_eq!(result.outcome, ResolutionOutcome::Corrupt, "contents: {}", contents);
            assert!(matches!(result.error, Some(AuthError::CacheCorrupt(_))));
        }
    }

    #[test]
    fn malformed_foreign_records_do_not_block_resolution() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("msal.cache");
        let mut cache =
            single_account_cache(CloudEnvironment::Global.management_endpoint(), "dev@example.com");
        cache["AccessToken"]["foreign"] = serde_json::json!({
            "home_account_id": "other.utid",
            "client_id": "someone-else",
            "target": null
        });
        cache["AccessToken"]["garbage"] = serde_json::json!("not a record");
        cache["Account"]["other"] = serde_json::json!({
            "home_account_id": "other.utid",
            "username": "other@example.com",
            "local_account_id": null
        });
        write_cache(&path, &cache);
        let resolver = BrokerCacheResolver::new(
            &path,
            counting_exchange(Arc::new(AtomicUsize::new(0))),
            static_tenants(&[]),
        );

        let result = resolver.resolve();
        assert!(result.authenticated);
        assert_eq!(result.outcome, ResolutionOutcome::Resolved);
        assert_eq!(result.username.as_deref(), Some("dev@example.com"));
    }

    #[test]
    fn cache_without_own_client_tokens_is_no_match() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("msal.cache");
        let mut cache =
            single_account_cache(CloudEnvironment::Global.management_endpoint(), "dev@example.com");
        cache["AccessToken"]["token-1"]["client_id"] =
            serde_json::Value::String("04b07795-8ddb-461a-bbee-02f9e1bf7b46".to_string());
        write_cache(&path, &cache);
        let resolver = BrokerCacheResolver::new(
            &path,
            counting_exchange(Arc::new(AtomicUsize::new(0))),
            static_tenants(&[]),
        );

        let result = resolver.resolve();
        assert!(!result.authenticated);
        assert_eq!(result.outcome, ResolutionOutcome::NoMatch);
        assert_eq!(result.error, Some(AuthError::NoCandidateAccount));
    }

    #[test]
    fn unreadable_cache_is_failed() {
        let temp = TempDir::new().expect("temp dir");
        let resolver = BrokerCacheResolver::new(
            temp.path(),
            counting_exchange(Arc::new(AtomicUsize::new(0))),
            static_tenants(&[]),
        );

        let result = resolver.resolve();
        assert!(!result.authenticated);
        assert_eq!(result.outcome, ResolutionOutcome::Failed);
        assert!(matches!(result.error, Some(AuthError::Io(_))));
    }

    #[test]
    fn account_without_username_is_failed() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("msal.cache");
        write_cache(
            &path,
            &single_account_cache(CloudEnvironment::Global.management_endpoint(), "  "),
        );
        let resolver = BrokerCacheResolver::new(
            &path,
            counting_exchange(Arc::new(AtomicUsize::new(0))),
            static_tenants(&[]),
        );

        let result = resolver.resolve();
        assert!(!result.authenticated);
        assert_eq!(result.outcome, ResolutionOutcome::Failed);
        assert!(matches!(result.error, Some(AuthError::InvalidAccount(_))));
    }

    #[test]
    fn tenant_failure_keeps_account_resolved() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("msal.cache");
        write_cache(
            &path,
            &single_account_cache(CloudEnvironment::Global.management_endpoint(), "dev@example.com"),
        );
        let lister: Arc<dyn TenantLister> = Arc::new(
            |_environment: CloudEnvironment, credential: &Credential| -> AuthResult<Vec<String>> {
                credential.get_token(&[])?;
                Ok(vec!["unreachable".to_string()])
            },
        );
        let failing_exchange: Arc<dyn TokenExchange> = Arc::new(
            |_request: &CredentialRequest, _scopes: &[String]| -> AuthResult<AccessToken> {
                Err(AuthError::CredentialExchangeFailed("interaction required".to_string()))
            },
        );
        let resolver = BrokerCacheResolver::new(&path, failing_exchange, lister);

        let result = resolver.resolve();
        assert!(result.authenticated);
        assert_eq!(result.outcome, ResolutionOutcome::Resolved);
        assert_eq!(result.username.as_deref(), Some("dev@example.com"));
        assert!(result.tenant_ids.is_empty());
        assert_eq!(result.error, None);
        match result.tenant_error {
            Some(AuthError::TenantEnumerationFailed(message)) => {
                assert!(message.contains("interaction required"))
            }
            other => panic!("expected TenantEnumerationFailed, got {:?}", other),
        }
    }

    #[test]
    fn environment_filter_pins_sovereign_cloud() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("msal.cache");
        let cache = serde_json::json!({
            "AccessToken": {
                "t-global": {
                    "home_account_id": "global.utid",
                    "client_id": IDE_BROKER_CLIENT_ID,
                    "target": "https://management.core.windows.net//.default"
                },
                "t-china": {
                    "home_account_id": "china.utid",
                    "client_id": IDE_BROKER_CLIENT_ID,
                    "target": "https://management.core.chinacloudapi.cn//.default"
                }
            },
            "Account": {
                "a-global": {"home_account_id": "global.utid", "username": "global@example.com"},
                "a-china": {"home_account_id": "china.utid", "username": "china@example.cn"}
            }
        });
        write_cache(&path, &cache);
        let exchange = counting_exchange(Arc::new(AtomicUsize::new(0)));

        let unpinned =
            BrokerCacheResolver::new(&path, Arc::clone(&exchange), static_tenants(&[])).resolve();
        assert_eq!(unpinned.environment, Some(CloudEnvironment::Global));

        let pinned = BrokerCacheResolver::new(&path, exchange, static_tenants(&[]))
            .with_environment(Some(CloudEnvironment::China))
            .resolve();
        assert_eq!(pinned.environment, Some(CloudEnvironment::China));
        assert_eq!(pinned.username.as_deref(), Some("china@example.cn"));
    }

    #[test]
    fn resolving_twice_yields_equal_results() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("msal.cache");
        write_cache(
            &path,
            &single_account_cache(CloudEnvironment::Global.management_endpoint(), "dev@example.com"),
        );
        let resolver = BrokerCacheResolver::new(
            &path,
            counting_exchange(Arc::new(AtomicUsize::new(0))),
            static_tenants(&["t1"]),
        );

        let first = resolver.resolve();
        let second = resolver.resolve();
        assert_eq!(first, second);
        assert!(first.authenticated);
    }
}
