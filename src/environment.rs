//! Registry of the cloud environments a cached token can belong to.

use std::fmt;
use std::str::FromStr;

use crate::error::AuthError;

/// A known cloud. Declaration order is the registry priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudEnvironment {
    Global,
    China,
    Germany,
    UsGovernment,
}

const KNOWN_ENVIRONMENTS: [CloudEnvironment; 4] = [
    CloudEnvironment::Global,
    CloudEnvironment::China,
    CloudEnvironment::Germany,
    CloudEnvironment::UsGovernment,
];

impl CloudEnvironment {
    /// Every known environment, global public cloud first.
    pub fn all() -> &'static [CloudEnvironment] {
        &KNOWN_ENVIRONMENTS
    }

    /// Returns the first environment whose management endpoint is a
    /// case-sensitive prefix of `target`.
    pub fn match_by_prefix(target: &str) -> Option<CloudEnvironment> {
        Self::all()
            .iter()
            .copied()
            .find(|environment| target.starts_with(environment.management_endpoint()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Global => "AzureCloud",
            Self::China => "AzureChinaCloud",
            Self::Germany => "AzureGermanCloud",
            Self::UsGovernment => "AzureUSGovernment",
        }
    }

    /// Audience prefix carried by tokens issued for this cloud's management plane.
    pub fn management_endpoint(&self) -> &'static str {
        match self {
            Self::Global => "https://management.core.windows.net/",
            Self::China => "https://management.core.chinacloudapi.cn/",
            Self::Germany => "https://management.core.cloudapi.de/",
            Self::UsGovernment => "https://management.core.usgovcloudapi.net/",
        }
    }

    pub fn resource_manager_endpoint(&self) -> &'static str {
        match self {
            Self::Global => "https://management.azure.com/",
            Self::China => "https://management.chinacloudapi.cn/",
            Self::Germany => "https://management.microsoftazure.de/",
            Self::UsGovernment => "https://management.usgovcloudapi.net/",
        }
    }

    pub fn authority_host(&self) -> &'static str {
        match self {
            Self::Global => "https://login.microsoftonline.com/",
            Self::China => "https://login.chinacloudapi.cn/",
            Self::Germany => "https://login.microsoftonline.de/",
            Self::UsGovernment => "https://login.microsoftonline.us/",
        }
    }

    /// Scope requesting a Resource Manager token in this cloud.
    pub fn default_scope(&self) -> String {
        format!("{}.default", self.resource_manager_endpoint())
    }

    pub fn is_global(&self) -> bool {
        *self == Self::Global
    }
}

impl fmt::Display for CloudEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CloudEnvironment {
    type Err = AuthError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['_', '-', ' '], "");
        match normalized.as_str() {
            "azurecloud" | "azure" | "global" | "public" => Ok(Self::Global),
            "azurechinacloud" | "azurechina" | "china" => Ok(Self::China),
            "azuregermancloud" | "azuregermany" | "germany" | "german" => Ok(Self::Germany),
            "azureusgovernment" | "azureusgov" | "usgovernment" | "usgov" => {
                Ok(Self::UsGovernment)
            }
            _ => Err(AuthError::Config(format!("unknown cloud environment: {}", raw))),
        }
    }
}
