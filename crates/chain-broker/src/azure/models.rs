//! Azure Resource Manager request and response models.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrokerError, Result};

// ============================================================================
// Provisioning state
// ============================================================================

/// Provider-reported lifecycle state of a deployment or resource group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    /// Anything the provider reports that is not terminal (`Accepted`,
    /// `Running`, `Deleting`, ...).
    Running,
    Succeeded,
    Failed,
    /// The resource does not exist.
    NotFound,
}

impl ProvisioningState {
    /// Interpret a provider state string, ignoring case.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "notfound" => Self::NotFound,
            _ => Self::Running,
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::NotFound => write!(f, "notfound"),
        }
    }
}

// ============================================================================
// Resource group types
// ============================================================================

/// Body of a resource group PUT.
#[derive(Debug, Serialize)]
pub struct CreateResourceGroupRequest {
    pub location: String,
}

/// Resource group as returned by GET.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceGroup {
    pub name: Option<String>,
    pub location: Option<String>,
    pub properties: Option<ResourceGroupProperties>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupProperties {
    pub provisioning_state: Option<String>,
}

impl ResourceGroup {
    /// # Errors
    /// Returns [`BrokerError::ProviderState`] if `properties.provisioningState`
    /// is absent.
    pub fn provisioning_state(&self) -> Result<ProvisioningState> {
        self.properties
            .as_ref()
            .and_then(|p| p.provisioning_state.as_deref())
            .map(ProvisioningState::parse)
            .ok_or_else(|| {
                BrokerError::ProviderState(
                    "resource group response has no properties.provisioningState".to_string(),
                )
            })
    }
}

// ============================================================================
// Deployment request types
// ============================================================================

/// A template or parameters file hosted at a URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateLink {
    pub uri: String,
    pub content_version: String,
}

impl TemplateLink {
    pub fn new(uri: impl Into<String>, content_version: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            content_version: content_version.into(),
        }
    }
}

/// The `{ "value": ... }` wrapper every template parameter needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameter {
    pub value: Value,
}

impl TemplateParameter {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            value: Value::String(value.into()),
        }
    }

    #[must_use]
    pub fn number(value: u64) -> Self {
        Self {
            value: Value::from(value),
        }
    }
}

/// Flat parameter map, ordered so request bodies are deterministic.
pub type TemplateParameters = BTreeMap<String, TemplateParameter>;

/// Where the template comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    Inline(Value),
    Link(TemplateLink),
}

/// Where the parameter values come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ParametersSource {
    Inline(TemplateParameters),
    Link(TemplateLink),
}

/// Deployment mode; the broker only ever merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeploymentMode {
    Incremental,
}

/// A template deployment to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRequest {
    pub name: String,
    pub template: TemplateSource,
    pub parameters: ParametersSource,
}

impl DeploymentRequest {
    pub fn new(
        name: impl Into<String>,
        template: TemplateSource,
        parameters: ParametersSource,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            parameters,
        }
    }

    /// Build a request from loose optionals, requiring exactly one template
    /// source and exactly one parameters source.
    ///
    /// # Errors
    /// Returns [`BrokerError::Config`] when both or neither of a pair is given.
    pub fn from_parts(
        name: impl Into<String>,
        template: Option<Value>,
        template_link: Option<TemplateLink>,
        parameters: Option<TemplateParameters>,
        parameters_link: Option<TemplateLink>,
    ) -> Result<Self> {
        let template = match (template, template_link) {
            (Some(t), None) => TemplateSource::Inline(t),
            (None, Some(link)) => TemplateSource::Link(link),
            _ => {
                return Err(BrokerError::Config(
                    "exactly one of template or templateLink must be supplied".to_string(),
                ))
            }
        };
        let parameters = match (parameters, parameters_link) {
            (Some(p), None) => ParametersSource::Inline(p),
            (None, Some(link)) => ParametersSource::Link(link),
            _ => {
                return Err(BrokerError::Config(
                    "exactly one of parameters or parametersLink must be supplied".to_string(),
                ))
            }
        };
        Ok(Self::new(name, template, parameters))
    }

    /// The PUT body the provider expects.
    #[must_use]
    pub fn to_body(&self) -> DeploymentBody<'_> {
        let (template, template_link) = match &self.template {
            TemplateSource::Inline(t) => (Some(t), None),
            TemplateSource::Link(link) => (None, Some(link)),
        };
        let (parameters, parameters_link) = match &self.parameters {
            ParametersSource::Inline(p) => (Some(p), None),
            ParametersSource::Link(link) => (None, Some(link)),
        };
        DeploymentBody {
            properties: DeploymentBodyProperties {
                template,
                template_link,
                parameters,
                parameters_link,
                mode: DeploymentMode::Incremental,
            },
        }
    }
}

/// Serialized form of a [`DeploymentRequest`].
#[derive(Debug, Serialize)]
pub struct DeploymentBody<'a> {
    pub properties: DeploymentBodyProperties<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentBodyProperties<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_link: Option<&'a TemplateLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<&'a TemplateParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters_link: Option<&'a TemplateLink>,
    pub mode: DeploymentMode,
}

/// How the provider acknowledged a deployment PUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentSubmission {
    /// 200: an existing deployment was updated.
    Ok,
    /// 201: a new deployment was created.
    Created,
}

// ============================================================================
// Deployment response types
// ============================================================================

/// Deployment as returned by GET.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentExtended {
    pub id: Option<String>,
    pub name: Option<String>,
    pub properties: Option<DeploymentExtendedProperties>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentExtendedProperties {
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub outputs: Option<HashMap<String, DeploymentOutput>>,
}

/// A single template output.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentOutput {
    #[serde(rename = "type")]
    pub output_type: Option<String>,
    pub value: Option<Value>,
}

/// Output key holding the consortium admin site URL.
pub const ADMIN_SITE_OUTPUT: &str = "admin-site";

/// Output key holding the Ethereum JSON-RPC endpoint.
pub const RPC_ENDPOINT_OUTPUT: &str = "ethereum-rpc-endpoint";

/// Endpoints of a finished consortium deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutputs {
    #[serde(rename = "adminSiteURL")]
    pub admin_site_url: String,
    #[serde(rename = "rpcURL")]
    pub rpc_url: String,
}

impl DeploymentExtended {
    /// # Errors
    /// Returns [`BrokerError::ProviderState`] if `properties.provisioningState`
    /// is absent.
    pub fn provisioning_state(&self) -> Result<ProvisioningState> {
        self.properties
            .as_ref()
            .and_then(|p| p.provisioning_state.as_deref())
            .map(ProvisioningState::parse)
            .ok_or_else(|| {
                BrokerError::ProviderState(
                    "deployment response has no properties.provisioningState".to_string(),
                )
            })
    }

    /// String value of output `key`.
    ///
    /// # Errors
    /// Returns [`BrokerError::ProviderState`] if the outputs block, the key, or
    /// its string value is missing.
    pub fn output_string(&self, key: &str) -> Result<&str> {
        let outputs = self
            .properties
            .as_ref()
            .and_then(|p| p.outputs.as_ref())
            .ok_or_else(|| {
                BrokerError::ProviderState(
                    "deployment response has no properties.outputs".to_string(),
                )
            })?;
        let output = outputs.get(key).ok_or_else(|| {
            BrokerError::ProviderState(format!("deployment outputs have no {key:?} entry"))
        })?;
        output
            .value
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BrokerError::ProviderState(format!("deployment output {key:?} is not a string"))
            })
    }

    /// # Errors
    /// See [`DeploymentExtended::output_string`].
    pub fn consortium_outputs(&self) -> Result<DeploymentOutputs> {
        Ok(DeploymentOutputs {
            admin_site_url: self.output_string(ADMIN_SITE_OUTPUT)?.to_string(),
            rpc_url: self.output_string(RPC_ENDPOINT_OUTPUT)?.to_string(),
        })
    }
}
