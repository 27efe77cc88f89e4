//! Fallback resolution from the secret file left behind by an earlier CLI login.

use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::credential::{CredentialProvider, RefreshTokenCredentialProvider, TokenExchange};
use crate::environment::CloudEnvironment;
use crate::error::{AuthError, AuthResult};
use crate::resolver::{AccountResolutionResult, AccountResolver, AuthMethod, ResolutionOutcome};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SecretFile {
    environment: Option<String>,
    refresh_token: Option<String>,
    default_subscription: Option<String>,
    user_info: Option<SecretUserInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SecretUserInfo {
    displayable_id: Option<String>,
    tenant_id: Option<String>,
}

pub struct SecretFileResolver {
    path: PathBuf,
    exchange: Arc<dyn TokenExchange>,
}

impl SecretFileResolver {
    pub fn new(path: impl Into<PathBuf>, exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            path: path.into(),
            exchange,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> AuthResult<SecretFile> {
        let data = fs::read(&self.path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => AuthError::CacheUnavailable(self.path.display().to_string()),
            _ => AuthError::Io(format!("failed to read {}: {}", self.path.display(), err)),
        })?;
        serde_json::from_slice::<SecretFile>(&data).map_err(|err| {
            AuthError::CacheCorrupt(format!(
                "failed to parse {}: {}",
                self.path.display(),
                err
            ))
        })
    }
}

impl AccountResolver for SecretFileResolver {
    fn method(&self) -> AuthMethod {
        AuthMethod::SecretFile
    }

    fn resolve(&self) -> AccountResolutionResult {
        let secret = match self.load() {
            Ok(secret) => secret,
            Err(err) => {
                let result = AccountResolutionResult::from_error(self.method(), err);
                if result.outcome == ResolutionOutcome::Unavailable {
                    debug!(path = %self.path.display(), "no secret file");
                } else {
                    warn!(path = %self.path.display(), error = ?result.error, "secret file unusable");
                }
                return result;
            }
        };

        let Some(refresh_token) = secret
            .refresh_token
            .filter(|token| !token.trim().is_empty())
        else {
            warn!(path = %self.path.display(), "secret file has no refresh token");
            return AccountResolutionResult::from_error(
                self.method(),
                AuthError::InvalidAccount(format!(
                    "missing refresh_token in {}",
                    self.path.display()
                )),
            );
        };

        let environment = secret
            .environment
            .as_deref()
            .and_then(|name| name.parse::<CloudEnvironment>().ok())
            .unwrap_or(CloudEnvironment::Global);
        let user_info = secret.user_info.unwrap_or_default();
        let provider: Arc<dyn CredentialProvider> = Arc::new(RefreshTokenCredentialProvider::new(
            environment,
            refresh_token,
            Arc::clone(&self.exchange),
        ));
        info!(environment = %environment, "resolved account from secret file");

        let mut result = AccountResolutionResult::resolved(
            self.method(),
            environment,
            user_info.displayable_id,
            provider,
        );
        result.home_tenant_id = user_info.tenant_id;
        result.subscription_ids = secret
            .default_subscription
            .filter(|id| !id.trim().is_empty())
            .into_iter()
            .collect();
        result
    }
}
