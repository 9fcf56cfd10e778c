//! Validated configuration handed to the broker at startup.
//!
//! Every `validate` reports all offending keys at once so an operator can fix a
//! deployment manifest in one pass.

use std::fmt;

use crate::error::{BrokerError, Result};

/// Name of the on-premises cloud environment.
pub const AZURE_STACK: &str = "AzureStack";

/// VM sizes accepted by the consortium template.
pub const SUPPORTED_VM_SIZES: &[&str] = &[
    "Standard_A1",
    "Standard_A2",
    "Standard_A3",
    "Standard_A4",
    "Standard_A5",
    "Standard_A6",
    "Standard_A7",
    "Standard_D1",
    "Standard_D2",
    "Standard_D3",
    "Standard_D4",
    "Standard_D11",
    "Standard_D12",
    "Standard_D13",
    "Standard_D14",
    "Standard_D1_v2",
    "Standard_D2_v2",
    "Standard_D3_v2",
    "Standard_D4_v2",
    "Standard_D5_v2",
    "Standard_D11_v2",
    "Standard_D12_v2",
    "Standard_D13_v2",
    "Standard_D14_v2",
    "Standard_D15_v2",
    "Standard_F1",
    "Standard_F2",
    "Standard_F4",
    "Standard_F8",
    "Standard_F16",
];

fn missing(keys: &[(&'static str, &str)]) -> Vec<&'static str> {
    keys.iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(key, _)| *key)
        .collect()
}

/// Service principal used to talk to Azure Resource Manager.
#[derive(Clone)]
pub struct AzureConfig {
    /// Cloud environment name (`AzureCloud`, `AzureChinaCloud`, ...).
    pub environment: String,
    /// Tenant of the service principal.
    pub tenant_id: String,
    /// Client (application) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

impl AzureConfig {
    /// Create a new Azure config.
    pub fn new(
        environment: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            environment: environment.into(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// # Errors
    /// Returns [`BrokerError::Config`] naming every empty field.
    pub fn validate(&self) -> Result<()> {
        let keys = missing(&[
            ("environment", self.environment.as_str()),
            ("tenantID", self.tenant_id.as_str()),
            ("clientID", self.client_id.as_str()),
            ("clientSecret", self.client_secret.as_str()),
        ]);
        if keys.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::Config(format!(
                "Missing required parameters: {}",
                keys.join(", ")
            )))
        }
    }

    /// Whether the environment is the on-premises variant.
    #[must_use]
    pub fn is_azure_stack(&self) -> bool {
        self.environment == AZURE_STACK
    }
}

impl fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfig")
            .field("environment", &self.environment)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Extra settings required when the environment is `AzureStack`.
#[derive(Debug, Clone, Default)]
pub struct AzureStackConfig {
    /// Domain of the Azure Stack deployment (e.g. `local.azurestack.external`).
    pub domain: String,
    /// `AzureAD`, `AzureStackAD` or `AzureStack`.
    pub authentication: String,
    /// Token audience for the Azure Stack resource manager.
    pub resource: String,
    /// Endpoint prefix for the resource manager (e.g. `management`).
    pub endpoint_prefix: String,
}

impl AzureStackConfig {
    /// Create a new Azure Stack config.
    pub fn new(
        domain: impl Into<String>,
        authentication: impl Into<String>,
        resource: impl Into<String>,
        endpoint_prefix: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            authentication: authentication.into(),
            resource: resource.into(),
            endpoint_prefix: endpoint_prefix.into(),
        }
    }

    /// # Errors
    /// Returns [`BrokerError::Config`] naming every empty field.
    pub fn validate(&self) -> Result<()> {
        let keys = missing(&[
            ("azureStackDomain", self.domain.as_str()),
            ("azureStackAuthentication", self.authentication.as_str()),
            ("azureStackResource", self.resource.as_str()),
            ("azureStackEndpointPrefix", self.endpoint_prefix.as_str()),
        ]);
        if keys.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::Config(format!(
                "Missing required parameters when 'environment' is 'AzureStack': {}",
                keys.join(", ")
            )))
        }
    }
}

/// Cloud credentials plus the optional Azure Stack block.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub azure: AzureConfig,
    pub azure_stack: AzureStackConfig,
}

impl CloudConfig {
    /// # Errors
    /// Returns the first failing section; the Azure Stack block is only checked
    /// when the environment asks for it.
    pub fn validate(&self) -> Result<()> {
        self.azure.validate()?;
        if self.azure.is_azure_stack() {
            self.azure_stack.validate()?;
        }
        Ok(())
    }
}

/// Where resources are created.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Subscription that owns every resource group the broker creates.
    pub subscription_id: String,
    /// Location for new resource groups.
    pub location: String,
}

impl ResourceConfig {
    pub fn new(subscription_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            location: location.into(),
        }
    }

    /// # Errors
    /// Returns [`BrokerError::Config`] naming every empty field.
    pub fn validate(&self) -> Result<()> {
        let keys = missing(&[
            ("subscriptionID", self.subscription_id.as_str()),
            ("location", self.location.as_str()),
        ]);
        if keys.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::Config(format!(
                "Missing required parameters: {}",
                keys.join(", ")
            )))
        }
    }
}

/// Parameters for the Ethereum consortium template.
#[derive(Clone)]
pub struct BlockchainConfig {
    pub name_prefix: String,
    pub admin_username: String,
    pub admin_password: String,
    pub ethereum_account_psswd: String,
    pub ethereum_account_passphrase: String,
    pub ethereum_network_id: u64,
    pub num_consortium_members: u64,
    pub num_mining_nodes_per_member: u64,
    pub mn_node_vm_size: String,
    pub num_tx_nodes: u64,
    pub tx_node_vm_size: String,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            name_prefix: "blockchain".to_string(),
            admin_username: "gethadmin".to_string(),
            admin_password: String::new(),
            ethereum_account_psswd: String::new(),
            ethereum_account_passphrase: String::new(),
            ethereum_network_id: 553_289,
            num_consortium_members: 2,
            num_mining_nodes_per_member: 1,
            mn_node_vm_size: "Standard_D1_v2".to_string(),
            num_tx_nodes: 1,
            tx_node_vm_size: "Standard_D1_v2".to_string(),
        }
    }
}

impl BlockchainConfig {
    /// Check the template's parameter constraints.
    ///
    /// # Errors
    /// Returns [`BrokerError::Config`] listing every violated constraint.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for (key, value) in [
            ("adminPassword", self.admin_password.as_str()),
            ("ethereumAccountPsswd", self.ethereum_account_psswd.as_str()),
            ("ethereumAccountPassphrase", self.ethereum_account_passphrase.as_str()),
            ("namePrefix", self.name_prefix.as_str()),
        ] {
            if value.is_empty() {
                problems.push(format!("{key} is required"));
            }
        }

        if self.name_prefix.len() > 6 {
            problems.push("namePrefix should be 6 alphanumeric characters or less".to_string());
        }
        if self.admin_username.is_empty() || self.admin_username.len() > 64 {
            problems.push(
                "adminUsername should not be empty and 64 characters or less".to_string(),
            );
        }
        if !self.admin_password.is_empty() && !(12..=72).contains(&self.admin_password.len()) {
            problems.push("adminPassword length should be in [12, 72]".to_string());
        }
        if !self.ethereum_account_psswd.is_empty() && self.ethereum_account_psswd.len() < 12 {
            problems.push("ethereumAccountPsswd should be 12 characters or more".to_string());
        }
        if !self.ethereum_account_passphrase.is_empty()
            && self.ethereum_account_passphrase.len() < 12
        {
            problems.push("ethereumAccountPassphrase should be 12 characters or more".to_string());
        }
        if !(5..(1_u64 << 31)).contains(&self.ethereum_network_id) {
            problems.push("ethereumNetworkID should be in [5, 2^31)".to_string());
        }
        if !(2..=5).contains(&self.num_consortium_members) {
            problems.push("numConsortiumMembers should be in [2, 5]".to_string());
        }
        if !(1..=19).contains(&self.num_mining_nodes_per_member) {
            problems.push("numMiningNodesPerMember should be in [1, 19]".to_string());
        }
        if self.num_tx_nodes == 0 {
            problems.push("numTXNodes should be at least 1".to_string());
        }
        if !SUPPORTED_VM_SIZES.contains(&self.mn_node_vm_size.as_str()) {
            problems.push(format!(
                "Unsupported mining node VM size: {}",
                self.mn_node_vm_size
            ));
        }
        if !SUPPORTED_VM_SIZES.contains(&self.tx_node_vm_size.as_str()) {
            problems.push(format!(
                "Unsupported transaction node VM size: {}",
                self.tx_node_vm_size
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::Config(problems.join("; ")))
        }
    }
}

impl fmt::Debug for BlockchainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockchainConfig")
            .field("name_prefix", &self.name_prefix)
            .field("admin_username", &self.admin_username)
            .field("admin_password", &"<redacted>")
            .field("ethereum_account_psswd", &"<redacted>")
            .field("ethereum_account_passphrase", &"<redacted>")
            .field("ethereum_network_id", &self.ethereum_network_id)
            .field("num_consortium_members", &self.num_consortium_members)
            .field("num_mining_nodes_per_member", &self.num_mining_nodes_per_member)
            .field("mn_node_vm_size", &self.mn_node_vm_size)
            .field("num_tx_nodes", &self.num_tx_nodes)
            .field("tx_node_vm_size", &self.tx_node_vm_size)
            .finish()
    }
}
