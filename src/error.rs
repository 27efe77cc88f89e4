use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Failures raised while resolving a cached account.
///
/// Payloads are plain strings so a resolution result can be cloned and
/// compared; the resolver turns every variant into a field on the result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("token cache not found: {0}")]
    CacheUnavailable(String),

    #[error("token cache is corrupt: {0}")]
    CacheCorrupt(String),

    #[error("no cached account matches this client")]
    NoCandidateAccount,

    #[error("cached account is unusable: {0}")]
    InvalidAccount(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("credential exchange failed: {0}")]
    CredentialExchangeFailed(String),

    #[error("tenant enumeration failed: {0}")]
    TenantEnumerationFailed(String),

    #[error("configuration error: {0}")]
    Config(String),
}
