//! Provisioning broker state machine.
//!
//! Instance state is never stored locally. Provision and deprovision kick off
//! provider-side work and hand back an [`OperationToken`]; [`ProvisioningBroker::poll`]
//! infers progress from the provider every time it is called.
//!
//! ```text
//! NotProvisioned --provision--> Provisioning --(Succeeded)--> Provisioned
//!                                     \--(Failed)-----------> Failed
//! Provisioned --deprovision--> Deprovisioning --(NotFound)--> NotProvisioned
//! ```

mod locks;
mod operation;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

pub use locks::{KeyedGuard, KeyedLocks};
pub use operation::{
    is_valid_instance_id, validate_instance_id, OperationToken, OperationVerb, MAX_INSTANCE_ID_LEN,
};

use crate::azure::ProvisioningState;
use crate::deployment::DeploymentOrchestrator;
use crate::error::{Result, ResultExt};
use crate::traits::ResourceManager;

/// Outcome of [`ProvisioningBroker::provision`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionResponse {
    /// Always `true`; completion is observed by polling.
    pub is_async: bool,
    pub operation: OperationToken,
}

/// Outcome of [`ProvisioningBroker::deprovision`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeprovisionResponse {
    /// Always `false`: the delete is kicked off synchronously.
    pub is_async: bool,
    /// `None` when there was nothing to delete.
    pub operation: Option<OperationToken>,
}

/// Caller-facing progress of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastOperation {
    pub state: OperationState,
    pub description: String,
}

impl LastOperation {
    fn new(state: OperationState, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
        }
    }
}

/// Lifecycle entry point shared by every request handler.
pub struct ProvisioningBroker {
    orchestrator: DeploymentOrchestrator,
    resources: Arc<dyn ResourceManager>,
    locks: KeyedLocks,
}

impl ProvisioningBroker {
    #[must_use]
    pub fn new(orchestrator: DeploymentOrchestrator) -> Self {
        let resources = Arc::clone(orchestrator.resources());
        Self {
            orchestrator,
            resources,
            locks: KeyedLocks::new(),
        }
    }

    /// Start provisioning `instance_id`.
    ///
    /// The instance id names both the resource group and the deployment.
    /// Mutations on the same instance are serialized; different instances
    /// proceed independently.
    ///
    /// # Errors
    /// [`crate::BrokerError::InvalidInstanceId`] before any provider call when
    /// the id cannot name a resource group, otherwise any orchestrator error
    /// wrapped with `provision`.
    pub async fn provision(&self, instance_id: &str) -> Result<ProvisionResponse> {
        validate_instance_id(instance_id)?;
        info!(instance_id, "Provisioning service instance");
        let _guard = self.locks.acquire(instance_id).await;

        self.orchestrator
            .ensure_provisioned(instance_id, instance_id)
            .await
            .op_context("provision")?;

        Ok(ProvisionResponse {
            is_async: true,
            operation: OperationToken::provision(instance_id),
        })
    }

    /// Start deleting `instance_id`'s resource group.
    ///
    /// An instance whose group is already gone is reported as done with no
    /// operation to poll.
    ///
    /// # Errors
    /// [`crate::BrokerError::InvalidInstanceId`] for an unusable id, otherwise
    /// any provider error wrapped with `deprovision`.
    pub async fn deprovision(&self, instance_id: &str) -> Result<DeprovisionResponse> {
        validate_instance_id(instance_id)?;
        info!(instance_id, "Deprovisioning service instance");
        let _guard = self.locks.acquire(instance_id).await;

        let exists = self
            .resources
            .group_exists(instance_id)
            .await
            .op_context("deprovision")?;
        if !exists {
            info!(instance_id, "Resource group already absent");
            return Ok(DeprovisionResponse {
                is_async: false,
                operation: None,
            });
        }

        self.resources
            .delete_group(instance_id)
            .await
            .op_context("deprovision")?;

        Ok(DeprovisionResponse {
            is_async: false,
            operation: Some(OperationToken::deprovision(instance_id)),
        })
    }

    /// Report the progress of `operation` for `instance_id`.
    ///
    /// Polling only reads provider state and takes no lock. Provider failures
    /// are reported as [`OperationState::Failed`] with the error text.
    ///
    /// # Errors
    /// Returns [`crate::BrokerError::InvalidInstanceId`] for an unusable id and
    /// [`crate::BrokerError::MalformedToken`] when `operation` is not
    /// `verb:name`; the provider is not contacted in either case.
    pub async fn poll(&self, instance_id: &str, operation: &str) -> Result<LastOperation> {
        validate_instance_id(instance_id)?;
        let token: OperationToken = operation.parse()?;

        let outcome = match token.verb {
            OperationVerb::Provision => self.poll_provision(instance_id, &token.name).await,
            OperationVerb::Deprovision => self.poll_deprovision(&token.name).await,
        };

        Ok(outcome.unwrap_or_else(|e| {
            warn!(instance_id, operation, error = %e, "Poll failed");
            LastOperation::new(OperationState::Failed, e.to_string())
        }))
    }

    async fn poll_provision(&self, group: &str, deployment: &str) -> Result<LastOperation> {
        let state = self.resources.check_completion(group, deployment).await?;
        info!(group, deployment, state = %state, "Deployment progress");

        match state {
            ProvisioningState::Succeeded => {
                let outputs = self.resources.get_outputs(group, deployment).await?;
                let description = serde_json::to_string(&outputs)?;
                Ok(LastOperation::new(OperationState::Succeeded, description))
            }
            ProvisioningState::Failed => Ok(LastOperation::new(OperationState::Failed, "")),
            ProvisioningState::Running | ProvisioningState::NotFound => {
                Ok(LastOperation::new(OperationState::InProgress, ""))
            }
        }
    }

    async fn poll_deprovision(&self, group: &str) -> Result<LastOperation> {
        let state = self.resources.check_resource_status(group).await?;
        info!(group, state = %state, "Resource group progress");

        Ok(match state {
            ProvisioningState::NotFound => LastOperation::new(OperationState::Succeeded, ""),
            ProvisioningState::Failed => LastOperation::new(OperationState::Failed, ""),
            ProvisioningState::Running | ProvisioningState::Succeeded => {
                LastOperation::new(OperationState::InProgress, "")
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::azure::DeploymentOutputs;
    use crate::config::BlockchainConfig;
    use crate::error::BrokerError;
    use crate::testing::StubResourceManager;

    fn broker(stub: &Arc<StubResourceManager>) -> ProvisioningBroker {
        ProvisioningBroker::new(DeploymentOrchestrator::new(
            stub.clone(),
            BlockchainConfig::default(),
        ))
    }

    #[tokio::test]
    async fn provision_fresh_instance() {
        let stub = Arc::new(StubResourceManager::default());
        let response = broker(&stub).provision("inst-1").await.unwrap();

        assert!(response.is_async);
        assert_eq!(response.operation.to_string(), "provision:inst-1");
        assert_eq!(stub.calls.create_group.load(Ordering::SeqCst), 1);
        assert_eq!(stub.calls.deploy_template.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provision_error_carries_context() {
        let stub = Arc::new(StubResourceManager::default());
        *stub.fail_deploy.lock().unwrap() = Some(409);

        let err = broker(&stub).provision("inst-1").await.unwrap_err();
        assert!(err.to_string().starts_with("provision: ensure-provisioned: "));
        assert_eq!(err.status(), Some(409));
    }

    #[tokio::test]
    async fn poll_succeeded_reports_outputs() {
        let stub = Arc::new(StubResourceManager::default());
        *stub.deployment_state.lock().unwrap() = ProvisioningState::Succeeded;
        *stub.outputs.lock().unwrap() = Some(DeploymentOutputs {
            admin_site_url: "http://a".to_string(),
            rpc_url: "http://b".to_string(),
        });

        let last = broker(&stub).poll("inst-1", "provision:inst-1").await.unwrap();
        assert_eq!(last.state, OperationState::Succeeded);
        assert_eq!(last.description, r#"{"adminSiteURL":"http://a","rpcURL":"http://b"}"#);
    }

    #[tokio::test]
    async fn poll_provision_states() {
        let stub = Arc::new(StubResourceManager::default());
        let broker = broker(&stub);

        let last = broker.poll("inst-1", "provision:inst-1").await.unwrap();
        assert_eq!(last.state, OperationState::InProgress);

        *stub.deployment_state.lock().unwrap() = ProvisioningState::Failed;
        let last = broker.poll("inst-1", "provision:inst-1").await.unwrap();
        assert_eq!(last.state, OperationState::Failed);
        assert_eq!(stub.calls.get_outputs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn poll_succeeded_without_outputs_fails() {
        let stub = Arc::new(StubResourceManager::default());
        *stub.deployment_state.lock().unwrap() = ProvisioningState::Succeeded;

        let last = broker(&stub).poll("inst-1", "provision:inst-1").await.unwrap();
        assert_eq!(last.state, OperationState::Failed);
        assert!(last.description.contains("outputs"));
    }

    #[tokio::test]
    async fn poll_deprovision_states() {
        let stub = Arc::new(StubResourceManager::default());
        let broker = broker(&stub);

        let last = broker.poll("inst-1", "deprovision:inst-1").await.unwrap();
        assert_eq!(last.state, OperationState::InProgress);

        *stub.group_state.lock().unwrap() = ProvisioningState::NotFound;
        let last = broker.poll("inst-1", "deprovision:inst-1").await.unwrap();
        assert_eq!(last.state, OperationState::Succeeded);

        *stub.group_state.lock().unwrap() = ProvisioningState::Failed;
        let last = broker.poll("inst-1", "deprovision:inst-1").await.unwrap();
        assert_eq!(last.state, OperationState::Failed);
        assert_eq!(stub.calls.check_completion.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_tokens_never_reach_the_provider() {
        let stub = Arc::new(StubResourceManager::default());
        let broker = broker(&stub);

        for raw in ["", "inst-1", ":inst-1", "provision:", "resize:inst-1", "provision:a:b"] {
            let err = broker.poll("inst-1", raw).await.unwrap_err();
            assert!(matches!(err, BrokerError::MalformedToken(_)), "{raw:?}");
        }
        assert_eq!(stub.calls.total(), 0);
    }

    #[tokio::test]
    async fn unusable_instance_ids_never_reach_the_provider() {
        let stub = Arc::new(StubResourceManager::default().with_group("victim"));
        let broker = broker(&stub);

        for id in ["inst-9/../victim", "..", "", "inst-1."] {
            let err = broker.provision(id).await.unwrap_err();
            assert!(matches!(err, BrokerError::InvalidInstanceId(_)), "{id:?}");
            let err = broker.deprovision(id).await.unwrap_err();
            assert!(matches!(err, BrokerError::InvalidInstanceId(_)), "{id:?}");
            let err = broker.poll(id, "provision:inst-1").await.unwrap_err();
            assert!(matches!(err, BrokerError::InvalidInstanceId(_)), "{id:?}");
        }
        assert_eq!(stub.calls.total(), 0);
    }

    #[tokio::test]
    async fn deprovision_absent_group_is_a_no_op() {
        let stub = Arc::new(StubResourceManager::default());
        let response = broker(&stub).deprovision("inst-1").await.unwrap();

        assert!(!response.is_async);
        assert!(response.operation.is_none());
        assert_eq!(stub.calls.delete_group.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deprovision_existing_group() {
        let stub = Arc::new(StubResourceManager::default().with_group("inst-1"));
        let response = broker(&stub).deprovision("inst-1").await.unwrap();

        assert!(!response.is_async);
        assert_eq!(
            response.operation.map(|t| t.to_string()).as_deref(),
            Some("deprovision:inst-1")
        );
        assert_eq!(stub.calls.delete_group.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn same_instance_mutations_are_serialized() {
        let stub = Arc::new(
            StubResourceManager::default().with_mutation_delay(Duration::from_millis(50)),
        );
        let broker = Arc::new(broker(&stub));

        let (a, b) = tokio::join!(broker.provision("inst-1"), broker.deprovision("inst-1"));
        a.unwrap();
        b.unwrap();
        assert_eq!(stub.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_instances_may_overlap() {
        let stub = Arc::new(
            StubResourceManager::default().with_mutation_delay(Duration::from_millis(50)),
        );
        let broker = Arc::new(broker(&stub));

        let (a, b) = tokio::join!(broker.provision("inst-1"), broker.provision("inst-2"));
        a.unwrap();
        b.unwrap();
        assert_eq!(stub.max_in_flight.load(Ordering::SeqCst), 2);
    }
}
