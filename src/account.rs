//! Account indexing and candidate selection over a decoded token cache.

use std::collections::HashMap;
use tracing::debug;

use crate::cache::{AccessTokenRecord, AccountRecord};
use crate::environment::CloudEnvironment;

/// A cached account provisionally matched to an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateAccount<'a> {
    pub environment: CloudEnvironment,
    pub account: &'a AccountRecord,
}

/// The single account chosen for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAccount {
    pub environment: CloudEnvironment,
    pub username: String,
    pub home_account_id: String,
    pub home_tenant_id: Option<String>,
}

impl From<CandidateAccount<'_>> for ResolvedAccount {
    fn from(candidate: CandidateAccount<'_>) -> Self {
        let realm = candidate.account.realm.trim();
        Self {
            environment: candidate.environment,
            username: candidate.account.username.clone(),
            home_account_id: candidate.account.home_account_id.clone(),
            home_tenant_id: (!realm.is_empty()).then(|| realm.to_string()),
        }
    }
}

/// Groups accounts by home account id. The first record seen for an id wins.
pub fn index_accounts<'a, I>(accounts: I) -> HashMap<&'a str, &'a AccountRecord>
where
    I: IntoIterator<Item = &'a AccountRecord>,
{
    let mut index = HashMap::new();
    for account in accounts {
        index
            .entry(account.home_account_id.as_str())
            .or_insert(account);
    }
    index
}

/// Picks the account to sign in with.
///
/// Only tokens issued to `client_id` count. A candidate in the global public
/// cloud beats every other candidate; otherwise the first candidate in cache
/// order is returned.
pub fn select_account<'a, I>(
    access_tokens: I,
    index: &HashMap<&'a str, &'a AccountRecord>,
    client_id: &str,
    environment_filter: Option<CloudEnvironment>,
) -> Option<CandidateAccount<'a>>
where
    I: IntoIterator<Item = &'a AccessTokenRecord>,
{
    let candidates = collect_candidates(access_tokens, index, client_id, environment_filter);
    debug!(candidates = candidates.len(), "collected cached account candidates");

    candidates
        .iter()
        .find(|candidate| candidate.environment.is_global())
        .or_else(|| candidates.first())
        .copied()
}

fn collect_candidates<'a, I>(
    access_tokens: I,
    index: &HashMap<&'a str, &'a AccountRecord>,
    client_id: &str,
    environment_filter: Option<CloudEnvironment>,
) -> Vec<CandidateAccount<'a>>
where
    I: IntoIterator<Item = &'a AccessTokenRecord>,
{
    let mut candidates: Vec<CandidateAccount<'a>> = Vec::new();
    for token in access_tokens {
        if !token.issued_to(client_id) {
            continue;
        }
        let Some(account) = index.get(token.home_account_id.as_str()).copied() else {
            continue;
        };
        let Some(environment) = CloudEnvironment::match_by_prefix(&token.target) else {
            continue;
        };
        if environment_filter.is_some_and(|pinned| pinned != environment) {
            continue;
        }

        let candidate = CandidateAccount {
            environment,
            account,
        };
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}
