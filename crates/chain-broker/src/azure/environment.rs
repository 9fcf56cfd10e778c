//! Per-cloud endpoint roots and API versions.
//!
//! Identical resource types accept different API versions across clouds, so every
//! request resolves its `api-version` through this table.

use crate::config::{AzureStackConfig, AZURE_STACK};
use crate::error::{BrokerError, Result};

/// API versions for the resource types the broker touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersions {
    /// `Microsoft.Resources/resourceGroups`.
    pub resource_groups: &'static str,
    /// `Microsoft.Resources/deployments`.
    pub deployments: &'static str,
}

/// A static cloud environment entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudEnvironment {
    pub name: &'static str,
    /// Resource manager root; empty for Azure Stack, which derives it from config.
    pub resource_manager_url: &'static str,
    /// Identity endpoint root; empty for Azure Stack.
    pub active_directory_url: &'static str,
    pub api_versions: ApiVersions,
}

/// API versions accepted by the public and US Government clouds.
pub const PUBLIC_API_VERSIONS: ApiVersions = ApiVersions {
    resource_groups: "2017-05-10",
    deployments: "2017-05-10",
};

pub const AZURE_CLOUD: CloudEnvironment = CloudEnvironment {
    name: "AzureCloud",
    resource_manager_url: "https://management.azure.com/",
    active_directory_url: "https://login.microsoftonline.com",
    api_versions: PUBLIC_API_VERSIONS,
};

pub const AZURE_CHINA_CLOUD: CloudEnvironment = CloudEnvironment {
    name: "AzureChinaCloud",
    resource_manager_url: "https://management.chinacloudapi.cn/",
    active_directory_url: "https://login.chinacloudapi.cn",
    api_versions: ApiVersions {
        resource_groups: "2016-09-01",
        deployments: "2016-09-01",
    },
};

pub const AZURE_US_GOVERNMENT: CloudEnvironment = CloudEnvironment {
    name: "AzureUSGovernment",
    resource_manager_url: "https://management.usgovcloudapi.net/",
    active_directory_url: "https://login.microsoftonline.us",
    api_versions: PUBLIC_API_VERSIONS,
};

pub const AZURE_GERMAN_CLOUD: CloudEnvironment = CloudEnvironment {
    name: "AzureGermanCloud",
    resource_manager_url: "https://management.microsoftazure.de/",
    active_directory_url: "https://login.microsoftonline.de",
    api_versions: ApiVersions {
        resource_groups: "2016-09-01",
        deployments: "2016-09-01",
    },
};

pub const AZURE_STACK_CLOUD: CloudEnvironment = CloudEnvironment {
    name: AZURE_STACK,
    resource_manager_url: "",
    active_directory_url: "",
    api_versions: ApiVersions {
        resource_groups: "2016-02-01",
        deployments: "2016-02-01",
    },
};

/// Every known environment.
pub const ENVIRONMENTS: [CloudEnvironment; 5] = [
    AZURE_CLOUD,
    AZURE_CHINA_CLOUD,
    AZURE_US_GOVERNMENT,
    AZURE_GERMAN_CLOUD,
    AZURE_STACK_CLOUD,
];

impl CloudEnvironment {
    /// Look up an environment by its exact name.
    ///
    /// # Errors
    /// Returns [`BrokerError::Config`] for unknown names.
    pub fn by_name(name: &str) -> Result<Self> {
        ENVIRONMENTS
            .iter()
            .find(|env| env.name == name)
            .copied()
            .ok_or_else(|| {
                BrokerError::Config(format!(
                    "unknown environment {name:?}; expected one of {}",
                    ENVIRONMENTS.map(|e| e.name).join(", ")
                ))
            })
    }
}

/// Concrete endpoints a client talks to, after Azure Stack substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Resource manager root, always with a trailing slash.
    pub resource_manager: String,
    /// Identity endpoint root, without a trailing slash.
    pub active_directory: String,
    /// Tenant segment for the token URL; Azure Stack ADFS always uses `adfs`.
    pub tenant: String,
    /// Audience requested in the credential grant.
    pub token_resource: String,
    pub api_versions: ApiVersions,
}

impl Endpoints {
    /// Resolve the endpoints for `environment`.
    ///
    /// # Errors
    /// Returns [`BrokerError::Config`] for unknown environments or an incomplete
    /// Azure Stack block.
    pub fn resolve(
        environment: &str,
        tenant_id: &str,
        azure_stack: Option<&AzureStackConfig>,
    ) -> Result<Self> {
        let env = CloudEnvironment::by_name(environment)?;
        if env.name != AZURE_STACK {
            return Ok(Self {
                resource_manager: env.resource_manager_url.to_string(),
                active_directory: env.active_directory_url.to_string(),
                tenant: tenant_id.to_string(),
                token_resource: env.resource_manager_url.to_string(),
                api_versions: env.api_versions,
            });
        }

        let stack = azure_stack.ok_or_else(|| {
            BrokerError::Config("AzureStack environment requires azureStack settings".to_string())
        })?;
        stack.validate()?;

        let (active_directory, tenant) = if stack.authentication == "AzureAD" {
            (AZURE_CLOUD.active_directory_url.to_string(), tenant_id.to_string())
        } else {
            (format!("https://adfs.{}", stack.domain), "adfs".to_string())
        };

        Ok(Self {
            resource_manager: format!("https://{}.{}/", stack.endpoint_prefix, stack.domain),
            active_directory,
            tenant,
            token_resource: stack.resource.clone(),
            api_versions: env.api_versions,
        })
    }

    /// Endpoints pointing at a single base URL; used against local fakes.
    pub fn custom(base_url: &str, tenant: impl Into<String>, api_versions: ApiVersions) -> Self {
        let trimmed = base_url.trim_end_matches('/');
        Self {
            resource_manager: format!("{trimmed}/"),
            active_directory: trimmed.to_string(),
            tenant: tenant.into(),
            token_resource: format!("{trimmed}/"),
            api_versions,
        }
    }

    /// Token URL for the client credential grant.
    #[must_use]
    pub fn token_url(&self) -> String {
        format!("{}/{}/oauth2/token", self.active_directory, self.tenant)
    }
}
