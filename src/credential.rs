//! Deferred credentials handed out once an account has been resolved.
//!
//! Building a provider or a [`Credential`] never talks to the network. The
//! exchange only happens when [`Credential::get_token`] is called, through
//! whatever [`TokenExchange`] the provider closed over.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::process::Command as ProcessCommand;
use std::sync::Arc;
use tracing::debug;

use crate::environment::CloudEnvironment;
use crate::error::{AuthError, AuthResult};

pub type ProcessRunner = Arc<dyn Fn(&str, &[String]) -> ProcessOutput + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// What the exchange is allowed to redeem.
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    /// A silent request against the broker's shared cache.
    SharedCache { client_id: String, username: String },
    /// A refresh token saved by an earlier login.
    RefreshToken { refresh_token: String },
}

impl Grant {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SharedCache { .. } => "shared_cache",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedCache {
                client_id,
                username,
            } => f
                .debug_struct("SharedCache")
                .field("client_id", client_id)
                .field("username", username)
                .finish(),
            Self::RefreshToken { .. } => f
                .debug_struct("RefreshToken")
                .field("refresh_token", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    pub environment: CloudEnvironment,
    /// `None` asks for a token usable before any tenant is known.
    pub tenant_id: Option<String>,
    pub grant: Grant,
}

/// Performs the actual token exchange for a credential.
pub trait TokenExchange: Send + Sync {
    fn exchange(&self, request: &CredentialRequest, scopes: &[String]) -> AuthResult<AccessToken>;
}

impl<F> TokenExchange for F
where
    F: Fn(&CredentialRequest, &[String]) -> AuthResult<AccessToken> + Send + Sync,
{
    fn exchange(&self, request: &CredentialRequest, scopes: &[String]) -> AuthResult<AccessToken> {
        self(request, scopes)
    }
}

/// A constructed but not yet exercised credential.
#[derive(Clone)]
pub struct Credential {
    request: CredentialRequest,
    exchange: Arc<dyn TokenExchange>,
}

impl Credential {
    pub fn new(request: CredentialRequest, exchange: Arc<dyn TokenExchange>) -> Self {
        Self { request, exchange }
    }

    pub fn request(&self) -> &CredentialRequest {
        &self.request
    }

    pub fn get_token(&self, scopes: &[String]) -> AuthResult<AccessToken> {
        self.exchange
            .exchange(&self.request, scopes)
            .map_err(|err| match err {
                AuthError::CredentialExchangeFailed(_) => err,
                other => AuthError::CredentialExchangeFailed(other.to_string()),
            })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Hands out credentials for a resolved account on demand.
pub trait CredentialProvider: Send + Sync {
    fn for_tenant(&self, tenant_id: &str) -> Credential;

    /// A credential not bound to any tenant, used to list tenants.
    fn common(&self) -> Credential;
}

/// Credentials redeemed silently from the broker's shared token cache.
pub struct SharedCacheCredentialProvider {
    environment: CloudEnvironment,
    client_id: String,
    username: String,
    exchange: Arc<dyn TokenExchange>,
}

impl SharedCacheCredentialProvider {
    pub fn new(
        environment: CloudEnvironment,
        client_id: impl Into<String>,
        username: impl Into<String>,
        exchange: Arc<dyn TokenExchange>,
    ) -> Self {
        Self {
            environment,
            client_id: client_id.into(),
            username: username.into(),
            exchange,
        }
    }

    fn build(&self, tenant_id: Option<&str>) -> Credential {
        Credential::new(
            CredentialRequest {
                environment: self.environment,
                tenant_id: tenant_id.map(str::to_string),
                grant: Grant::SharedCache {
                    client_id: self.client_id.clone(),
                    username: self.username.clone(),
                },
            },
            Arc::clone(&self.exchange),
        )
    }
}

impl CredentialProvider for SharedCacheCredentialProvider {
    fn for_tenant(&self, tenant_id: &str) -> Credential {
        self.build(Some(tenant_id))
    }

    fn common(&self) -> Credential {
        self.build(None)
    }
}

/// Credentials redeemed from a saved refresh token.
pub struct RefreshTokenCredentialProvider {
    environment: CloudEnvironment,
    refresh_token: String,
    exchange: Arc<dyn TokenExchange>,
}

impl RefreshTokenCredentialProvider {
    pub fn new(
        environment: CloudEnvironment,
        refresh_token: impl Into<String>,
        exchange: Arc<dyn TokenExchange>,
    ) -> Self {
        Self {
            environment,
            refresh_token: refresh_token.into(),
            exchange,
        }
    }

    fn build(&self, tenant_id: Option<&str>) -> Credential {
        Credential::new(
            CredentialRequest {
                environment: self.environment,
                tenant_id: tenant_id.map(str::to_string),
                grant: Grant::RefreshToken {
                    refresh_token: self.refresh_token.clone(),
                },
            },
            Arc::clone(&self.exchange),
        )
    }
}

impl CredentialProvider for RefreshTokenCredentialProvider {
    fn for_tenant(&self, tenant_id: &str) -> Credential {
        self.build(Some(tenant_id))
    }

    fn common(&self) -> Credential {
        self.build(None)
    }
}

/// Delegates the exchange to `az account get-access-token`.
pub struct AzureCliExchange {
    executable: String,
    runner: ProcessRunner,
}

impl AzureCliExchange {
    pub fn new(executable: impl Into<String>) -> Self {
        Self::with_runner(executable, Arc::new(default_process_runner))
    }

    pub fn with_runner(executable: impl Into<String>, runner: ProcessRunner) -> Self {
        Self {
            executable: executable.into(),
            runner,
        }
    }

    fn arguments(request: &CredentialRequest, scopes: &[String]) -> Vec<String> {
        let mut arguments = vec!["account".to_string(), "get-access-token".to_string()];
        if !scopes.is_empty() {
            arguments.push("--scope".to_string());
            arguments.extend(scopes.iter().cloned());
        }
        if let Some(tenant_id) = request.tenant_id.as_deref() {
            arguments.push("--tenant".to_string());
            arguments.push(tenant_id.to_string());
        }
        arguments.push("--output".to_string());
        arguments.push("json".to_string());
        arguments
    }
}

impl TokenExchange for AzureCliExchange {
    fn exchange(&self, request: &CredentialRequest, scopes: &[String]) -> AuthResult<AccessToken> {
        debug!(
            grant = request.grant.kind(),
            environment = %request.environment,
            tenant_id = request.tenant_id.as_deref().unwrap_or("-"),
            "exchanging token through azure cli"
        );
        let output = (self.runner)(&self.executable, &Self::arguments(request, scopes));
        if output.status != 0 {
            return Err(AuthError::CredentialExchangeFailed(format!(
                "az account get-access-token failed ({}): {}",
                output.status,
                output.stderr.trim()
            )));
        }

        let root: Value = serde_json::from_str(&output.stdout).map_err(|err| {
            AuthError::CredentialExchangeFailed(format!("az output is not JSON: {}", err))
        })?;
        let token = root
            .get("accessToken")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                AuthError::CredentialExchangeFailed("az output missing accessToken".to_string())
            })?;
        let expires_on = root
            .get("expires_on")
            .and_then(|value| {
                value
                    .as_i64()
                    .or_else(|| value.as_str().and_then(|text| text.parse::<i64>().ok()))
            })
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0));

        Ok(AccessToken {
            token: token.to_string(),
            expires_on,
        })
    }
}

pub fn default_process_runner(executable: &str, arguments: &[String]) -> ProcessOutput {
    match ProcessCommand::new(executable).args(arguments).output() {
        Ok(output) => ProcessOutput {
            status: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        },
        Err(err) => ProcessOutput {
            status: 1,
            stdout: String::new(),
            stderr: err.to_string(),
        },
    }
}
