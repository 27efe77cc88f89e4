//! Append-only JSON-lines audit log of resolution attempts.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::resolver::AccountResolutionResult;

const LOG_FILE_NAME: &str = "resolution.log";
const ROTATED_LOG_FILE_NAME: &str = "resolution.log.1";

pub struct ResolutionLogWriter {
    log_dir: PathBuf,
    log_file: PathBuf,
    max_log_bytes: u64,
}

impl ResolutionLogWriter {
    pub fn new(log_dir: PathBuf) -> Self {
        let log_file = log_dir.join(LOG_FILE_NAME);
        Self {
            log_dir,
            log_file,
            max_log_bytes: 5 * 1024 * 1024,
        }
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Records one resolution. The username is stored as a fingerprint only.
    /// Logging failures are swallowed; the audit log never affects resolution.
    pub fn record(&self, result: &AccountResolutionResult) {
        let line = resolution_line(result);
        if let Err(err) = self.append(&line) {
            debug!(path = %self.log_file.display(), error = %err, "audit log write failed");
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        fs::create_dir_all(&self.log_dir)?;
        self.rotate_if_needed()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?;
        restrict_permissions(&file);
        writeln!(file, "{}", line)
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let size = match fs::metadata(&self.log_file) {
            Ok(metadata) => metadata.len(),
            Err(_) => return Ok(()),
        };
        if size <= self.max_log_bytes {
            return Ok(());
        }

        let rotated = self.log_dir.join(ROTATED_LOG_FILE_NAME);
        if rotated.exists() {
            let _ = fs::remove_file(&rotated);
        }
        fs::rename(&self.log_file, rotated)
    }
}

fn resolution_line(result: &AccountResolutionResult) -> String {
    let mut payload = Map::new();
    payload.insert(
        "timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    payload.insert("event".to_string(), Value::from("account_resolution"));
    payload.insert("method".to_string(), Value::from(result.method.as_str()));
    payload.insert("outcome".to_string(), Value::from(result.outcome.as_str()));
    payload.insert("authenticated".to_string(), Value::Bool(result.authenticated));
    payload.insert("tenant_count".to_string(), Value::from(result.tenant_ids.len()));

    let optional = [
        ("environment", result.environment.map(|environment| environment.to_string())),
        ("account", account_fingerprint(result.username.as_deref())),
        ("error", result.error.as_ref().map(ToString::to_string)),
        ("tenant_error", result.tenant_error.as_ref().map(ToString::to_string)),
    ];
    for (key, value) in optional {
        if let Some(value) = value.filter(|value| !value.trim().is_empty()) {
            payload.insert(key.to_string(), Value::String(value.trim().to_string()));
        }
    }
    Value::Object(payload).to_string()
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) {
    use std::os::unix::fs::PermissionsExt;
    let _ = file.set_permissions(fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) {}

/// Short stable fingerprint of an account name, safe to write to disk.
pub fn account_fingerprint(username: Option<&str>) -> Option<String> {
    let raw = username?.trim();
    if raw.is_empty() {
        return None;
    }
    let digest = Sha256::digest(raw.to_ascii_lowercase().as_bytes());
    Some(hex::encode(digest)[..16].to_string())
}
