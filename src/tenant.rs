//! Tenant enumeration for a resolved account.

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::credential::Credential;
use crate::environment::CloudEnvironment;
use crate::error::{AuthError, AuthResult};

const TENANTS_API_VERSION: &str = "2020-01-01";
const MAX_TENANT_PAGES: usize = 50;

/// Lists the tenants a credential can reach.
pub trait TenantLister: Send + Sync {
    fn list_tenants(
        &self,
        environment: CloudEnvironment,
        credential: &Credential,
    ) -> AuthResult<Vec<String>>;
}

impl<F> TenantLister for F
where
    F: Fn(CloudEnvironment, &Credential) -> AuthResult<Vec<String>> + Send + Sync,
{
    fn list_tenants(
        &self,
        environment: CloudEnvironment,
        credential: &Credential,
    ) -> AuthResult<Vec<String>> {
        self(environment, credential)
    }
}

/// Lists tenants through the Resource Manager `/tenants` endpoint.
pub struct ArmTenantLister {
    timeout: Duration,
}

impl ArmTenantLister {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ArmTenantLister {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl TenantLister for ArmTenantLister {
    fn list_tenants(
        &self,
        environment: CloudEnvironment,
        credential: &Credential,
    ) -> AuthResult<Vec<String>> {
        let token = credential.get_token(&[environment.default_scope()])?;
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| {
                AuthError::TenantEnumerationFailed(format!("failed to build HTTP client: {}", err))
            })?;

        let mut url = format!(
            "{}tenants?api-version={}",
            environment.resource_manager_endpoint(),
            TENANTS_API_VERSION
        );
        let mut tenants = Vec::new();
        for _ in 0..MAX_TENANT_PAGES {
            let response = client
                .get(&url)
                .header("Accept", "application/json")
                .bearer_auth(&token.token)
                .send()
                .map_err(|err| {
                    AuthError::TenantEnumerationFailed(format!("failed to list tenants: {}", err))
                })?;
            let status = response.status();
            let text = response.text().map_err(|err| {
                AuthError::TenantEnumerationFailed(format!(
                    "failed to read tenant response: {}",
                    err
                ))
            })?;
            if !status.is_success() {
                return Err(AuthError::TenantEnumerationFailed(format!(
                    "tenant listing failed ({}): {}",
                    status.as_u16(),
                    text.chars().take(200).collect::<String>()
                )));
            }

            let (page, next_link) = parse_tenant_page(&text)?;
            for tenant_id in page {
                if !tenants.contains(&tenant_id) {
                    tenants.push(tenant_id);
                }
            }
            match next_page_url(environment, next_link)? {
                Some(link) => url = link,
                None => break,
            }
        }

        debug!(environment = %environment, tenants = tenants.len(), "listed tenants");
        Ok(tenants)
    }
}

#[derive(Debug, Deserialize)]
struct TenantPage {
    #[serde(default)]
    value: Vec<TenantEntry>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TenantEntry {
    #[serde(rename = "tenantId")]
    tenant_id: Option<String>,
}

fn parse_tenant_page(text: &str) -> AuthResult<(Vec<String>, Option<String>)> {
    let page: TenantPage = serde_json::from_str(text).map_err(|err| {
        AuthError::TenantEnumerationFailed(format!("tenant response is not valid JSON: {}", err))
    })?;
    let tenants = page
        .value
        .into_iter()
        .filter_map(|entry| entry.tenant_id)
        .filter(|tenant_id| !tenant_id.trim().is_empty())
        .collect();
    let next_link = page.next_link.filter(|link| !link.trim().is_empty());
    Ok((tenants, next_link))
}

/// The bearer token is only ever sent back to the environment's own
/// Resource Manager host.
fn next_page_url(
    environment: CloudEnvironment,
    next_link: Option<String>,
) -> AuthResult<Option<String>> {
    let Some(link) = next_link else {
        return Ok(None);
    };
    if link.starts_with(environment.resource_manager_endpoint()) {
        Ok(Some(link))
    } else {
        Err(AuthError::TenantEnumerationFailed(format!(
            "refusing tenant page outside {}",
            environment.resource_manager_endpoint()
        )))
    }
}
