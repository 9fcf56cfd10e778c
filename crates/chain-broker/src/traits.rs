//! Resource manager trait implemented by the Azure REST client.

use async_trait::async_trait;

use crate::azure::{DeploymentOutputs, DeploymentRequest, DeploymentSubmission, ProvisioningState};
use crate::error::Result;

/// Typed resource-group and deployment operations.
///
/// Every call names the resource group explicitly; implementations never keep
/// per-instance state.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Whether the resource group exists.
    async fn group_exists(&self, group: &str) -> Result<bool>;

    /// Create (or update) the resource group in the configured location.
    async fn create_group(&self, group: &str) -> Result<()>;

    /// Start deleting the resource group.
    async fn delete_group(&self, group: &str) -> Result<()>;

    /// Submit a template deployment into `group`.
    async fn deploy_template(
        &self,
        group: &str,
        request: &DeploymentRequest,
    ) -> Result<DeploymentSubmission>;

    /// Provisioning state of deployment `name`.
    async fn check_completion(&self, group: &str, name: &str) -> Result<ProvisioningState>;

    /// Provisioning state of the resource group; absence maps to `NotFound`.
    async fn check_resource_status(&self, group: &str) -> Result<ProvisioningState>;

    /// Admin site and RPC endpoint published by deployment `name`.
    async fn get_outputs(&self, group: &str, name: &str) -> Result<DeploymentOutputs>;
}
