//! Reader for the broker's on-disk token cache.
//!
//! The cache is a JSON object owned by the identity broker. Only the
//! `AccessToken` and `Account` sections are decoded; everything else in the
//! file, including token secrets, is skipped.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::{self, DeserializeOwned, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::marker::PhantomData;
use std::path::Path;
use tracing::debug;

use crate::error::{AuthError, AuthResult};

/// One cached access-token entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccessTokenRecord {
    #[serde(deserialize_with = "lenient_text")]
    pub home_account_id: String,
    #[serde(deserialize_with = "lenient_text")]
    pub environment: String,
    #[serde(deserialize_with = "lenient_text")]
    pub client_id: String,
    #[serde(deserialize_with = "lenient_text")]
    pub target: String,
    #[serde(deserialize_with = "lenient_string")]
    pub realm: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub credential_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub cached_at: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub expires_on: Option<String>,
}

impl AccessTokenRecord {
    /// Expiry of the cached token, when the broker recorded one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let seconds = self.expires_on.as_deref()?.trim().parse::<i64>().ok()?;
        DateTime::from_timestamp(seconds, 0)
    }

    pub fn issued_to(&self, client_id: &str) -> bool {
        self.client_id.eq_ignore_ascii_case(client_id)
    }
}

/// One cached signed-in identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(default)]
pub struct AccountRecord {
    #[serde(deserialize_with = "lenient_text")]
    pub home_account_id: String,
    #[serde(deserialize_with = "lenient_text")]
    pub environment: String,
    #[serde(deserialize_with = "lenient_text")]
    pub realm: String,
    #[serde(deserialize_with = "lenient_text")]
    pub local_account_id: String,
    #[serde(deserialize_with = "lenient_text")]
    pub username: String,
    #[serde(deserialize_with = "lenient_text")]
    pub name: String,
}

/// Decoded broker cache. Entries keep the order they had in the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenCache {
    #[serde(rename = "AccessToken", default, deserialize_with = "ordered_entries")]
    access_tokens: Vec<(String, AccessTokenRecord)>,
    #[serde(rename = "Account", default, deserialize_with = "ordered_entries")]
    accounts: Vec<(String, AccountRecord)>,
}

impl TokenCache {
    /// Reads and decodes the cache at `path`.
    ///
    /// A missing file is `CacheUnavailable`; bytes that do not decode are
    /// `CacheCorrupt`.
    pub fn read(path: &Path) -> AuthResult<Self> {
        let data = read_shared(path)?;
        debug!(path = %path.display(), bytes = data.len(), "read token cache");
        Self::from_slice(&data)
    }

    pub fn from_slice(data: &[u8]) -> AuthResult<Self> {
        serde_json::from_slice::<TokenCache>(data)
            .map_err(|err| AuthError::CacheCorrupt(err.to_string()))
    }

    pub fn access_tokens(&self) -> impl Iterator<Item = &AccessTokenRecord> {
        self.access_tokens.iter().map(|(_, record)| record)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountRecord> {
        self.accounts.iter().map(|(_, record)| record)
    }

    pub fn access_token_count(&self) -> usize {
        self.access_tokens.len()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }
}

fn read_shared(path: &Path) -> AuthResult<Vec<u8>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(AuthError::CacheUnavailable(path.display().to_string()));
        }
        Err(err) => {
            return Err(AuthError::Io(format!(
                "failed to open {}: {}",
                path.display(),
                err
            )));
        }
    };

    // The broker owns the file; never block on its lock.
    let locked = FileExt::try_lock_shared(&file).is_ok();
    if !locked {
        debug!(path = %path.display(), "token cache is locked by its owner, reading anyway");
    }

    let mut data = Vec::new();
    let read = file.read_to_end(&mut data);
    if locked {
        let _ = FileExt::unlock(&file);
    }
    read.map_err(|err| AuthError::Io(format!("failed to read {}: {}", path.display(), err)))?;
    Ok(data)
}

/// Decodes one cache section in file order. Entries that are not records
/// are skipped; only a section that is not a map fails the decode.
fn ordered_entries<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    struct EntriesVisitor<T>(PhantomData<T>);

    impl<'de, T: DeserializeOwned> Visitor<'de> for EntriesVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of cache entries")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, Value>()? {
                match serde_json::from_value::<T>(value) {
                    Ok(record) => entries.push((key, record)),
                    Err(err) => {
                        debug!(key = %key, error = %err, "skipping unreadable cache entry")
                    }
                }
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_any(EntriesVisitor(PhantomData))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}

// MSAL writers disagree on whether timestamps are strings or numbers.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}
