//! Cached-credential discovery for tools that piggyback on an IDE identity
//! broker.
//!
//! The broker keeps an MSAL-style token cache on disk. This crate reads that
//! cache, reconstructs the distinct signed-in accounts, matches them to a known
//! cloud environment and hands back a deferred credential that can mint
//! tenant-scoped tokens later without touching the cache again.

pub mod account;
pub mod cache;
pub mod config;
pub mod credential;
pub mod environment;
pub mod error;
pub mod log;
pub mod resolver;
pub mod secret_file;
pub mod tenant;

pub use account::{index_accounts, select_account, CandidateAccount, ResolvedAccount};
pub use cache::{AccessTokenRecord, AccountRecord, TokenCache};
pub use config::{ResolverConfig, IDE_BROKER_CLIENT_ID};
pub use credential::{
    AccessToken, AzureCliExchange, Credential, CredentialProvider, CredentialRequest, Grant,
    RefreshTokenCredentialProvider, SharedCacheCredentialProvider, TokenExchange,
};
pub use environment::CloudEnvironment;
pub use error::{AuthError, AuthResult};
pub use log::ResolutionLogWriter;
pub use resolver::{
    AccountResolutionResult, AccountResolver, AuthMethod, BrokerCacheResolver, ResolutionOutcome,
};
pub use secret_file::SecretFileResolver;
pub use tenant::{ArmTenantLister, TenantLister};
