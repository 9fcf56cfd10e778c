//! Idempotent "resource group, then template deployment" orchestration.

use std::sync::Arc;

use tracing::{debug, info};

use crate::azure::{
    DeploymentRequest, DeploymentSubmission, ParametersSource, TemplateLink, TemplateParameter,
    TemplateParameters, TemplateSource,
};
use crate::config::BlockchainConfig;
use crate::error::{Result, ResultExt};
use crate::traits::ResourceManager;

/// Public Ethereum consortium network template.
pub const CONSORTIUM_TEMPLATE_URI: &str = "https://raw.githubusercontent.com/Azure/azure-quickstart-templates/master/ethereum-consortium-blockchain-network/azuredeploy.json";

/// Content version pinned for [`CONSORTIUM_TEMPLATE_URI`].
pub const CONSORTIUM_TEMPLATE_VERSION: &str = "1.0.0.0";

/// Drives group creation and deployment submission for one instance.
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    resources: Arc<dyn ResourceManager>,
    blockchain: BlockchainConfig,
}

impl DeploymentOrchestrator {
    pub fn new(resources: Arc<dyn ResourceManager>, blockchain: BlockchainConfig) -> Self {
        Self {
            resources,
            blockchain,
        }
    }

    #[must_use]
    pub fn resources(&self) -> &Arc<dyn ResourceManager> {
        &self.resources
    }

    /// Create `group` if needed and submit the consortium deployment.
    ///
    /// Returns once the provider accepts the deployment PUT; completion is
    /// observed by polling. A group created before a failed submission is
    /// left in place and reused by the next attempt.
    ///
    /// # Errors
    /// Any provider error, wrapped with `ensure-provisioned`.
    pub async fn ensure_provisioned(
        &self,
        group: &str,
        deployment_name: &str,
    ) -> Result<DeploymentSubmission> {
        self.submit(group, deployment_name)
            .await
            .op_context("ensure-provisioned")
    }

    async fn submit(&self, group: &str, deployment_name: &str) -> Result<DeploymentSubmission> {
        if self.resources.group_exists(group).await? {
            debug!(group, "Resource group already exists");
        } else {
            self.resources.create_group(group).await?;
        }

        let request = self.deployment_request(deployment_name);
        let submission = self.resources.deploy_template(group, &request).await?;
        info!(group, deployment = deployment_name, ?submission, "Deployment accepted");
        Ok(submission)
    }

    /// Linked-template request carrying the configured parameters.
    #[must_use]
    pub fn deployment_request(&self, deployment_name: &str) -> DeploymentRequest {
        DeploymentRequest::new(
            deployment_name,
            TemplateSource::Link(TemplateLink::new(
                CONSORTIUM_TEMPLATE_URI,
                CONSORTIUM_TEMPLATE_VERSION,
            )),
            ParametersSource::Inline(template_parameters(&self.blockchain)),
        )
    }
}

/// Template parameters in the `{ "value": ... }` shape the provider expects.
#[must_use]
pub fn template_parameters(config: &BlockchainConfig) -> TemplateParameters {
    let strings = [
        ("namePrefix", &config.name_prefix),
        ("adminUsername", &config.admin_username),
        ("adminPassword", &config.admin_password),
        ("ethereumAccountPsswd", &config.ethereum_account_psswd),
        ("ethereumAccountPassphrase", &config.ethereum_account_passphrase),
        ("mnNodeVMSize", &config.mn_node_vm_size),
        ("txNodeVMSize", &config.tx_node_vm_size),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), TemplateParameter::string(value.as_str())));

    let numbers = [
        ("ethereumNetworkID", config.ethereum_network_id),
        ("numConsortiumMembers", config.num_consortium_members),
        ("numMiningNodesPerMember", config.num_mining_nodes_per_member),
        ("numTXNodes", config.num_tx_nodes),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), TemplateParameter::number(value)));

    strings.chain(numbers).collect()
}
