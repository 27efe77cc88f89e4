use std::path::{Path, PathBuf};

use crate::environment::CloudEnvironment;
use crate::error::AuthResult;

/// Client id the IDE broker uses for its own cached tokens.
pub const IDE_BROKER_CLIENT_ID: &str = "872cd9fa-d31f-45e0-9eab-6e460a02d1f1";

const TOKEN_CACHE_ENV: &str = "BROKERCRED_TOKEN_CACHE";
const SECRET_FILE_ENV: &str = "BROKERCRED_SECRET_FILE";
const ENVIRONMENT_ENV: &str = "BROKERCRED_ENVIRONMENT";
const AZ_BIN_ENV: &str = "BROKERCRED_AZ_BIN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    pub cache_path: PathBuf,
    pub secret_file_path: PathBuf,
    pub environment: Option<CloudEnvironment>,
    pub client_id: String,
    pub az_executable: String,
    pub log_dir: PathBuf,
}

impl ResolverConfig {
    pub fn new(home_dir: PathBuf) -> Self {
        let cache_path = default_cache_path(&home_dir, env_override("LOCALAPPDATA").as_deref());
        Self {
            secret_file_path: home_dir.join(".azure/azure-secret.json"),
            log_dir: home_dir.join(".brokercred/logs"),
            cache_path,
            environment: None,
            client_id: IDE_BROKER_CLIENT_ID.to_string(),
            az_executable: "az".to_string(),
        }
    }

    /// Defaults for `home_dir`, overridden by `BROKERCRED_*` variables.
    pub fn from_env(home_dir: PathBuf) -> AuthResult<Self> {
        let mut config = Self::new(home_dir);
        if let Some(path) = env_override(TOKEN_CACHE_ENV) {
            config.cache_path = PathBuf::from(path);
        }
        if let Some(path) = env_override(SECRET_FILE_ENV) {
            config.secret_file_path = PathBuf::from(path);
        }
        if let Some(name) = env_override(ENVIRONMENT_ENV) {
            config.environment = Some(name.parse()?);
        }
        if let Some(executable) = env_override(AZ_BIN_ENV) {
            config.az_executable = executable;
        }
        Ok(config)
    }
}

/// Where the broker persists its cache: under `%LOCALAPPDATA%` on Windows,
/// under the home directory elsewhere.
fn default_cache_path(home_dir: &Path, local_app_data: Option<&str>) -> PathBuf {
    let root = if cfg!(windows) {
        local_app_data
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join("AppData/Local"))
    } else {
        home_dir.to_path_buf()
    };
    root.join(".IdentityService").join("msal.cache")
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_live_under_home() {
        let config = ResolverConfig::new(PathBuf::from("/home/dev"));
        assert_eq!(config.client_id, IDE_BROKER_CLIENT_ID);
        assert_eq!(config.environment, None);
        assert_eq!(
            config.secret_file_path,
            PathBuf::from("/home/dev/.azure/azure-secret.json")
        );
        assert_eq!(config.log_dir, PathBuf::from("/home/dev/.brokercred/logs"));
        assert!(config.cache_path.ends_with(".IdentityService/msal.cache"));
    }

    #[cfg(not(windows))]
    #[test]
    fn cache_path_ignores_local_app_data_off_windows() {
        assert_eq!(
            default_cache_path(Path::new("/home/dev"), Some("C:/Users/dev/AppData/Local")),
            PathBuf::from("/home/dev/.IdentityService/msal.cache")
        );
    }

    #[test]
    fn unset_env_values_do_not_override() {
        assert_eq!(env_override("BROKERCRED_TEST_DEFINITELY_UNSET"), None);
    }
}
