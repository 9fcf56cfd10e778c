//! In-memory [`ResourceManager`] used by unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::azure::{
    DeploymentOutputs, DeploymentRequest, DeploymentSubmission, ProvisioningState,
};
use crate::error::{BrokerError, Result};
use crate::traits::ResourceManager;

#[derive(Default)]
pub(crate) struct Calls {
    pub group_exists: AtomicUsize,
    pub create_group: AtomicUsize,
    pub delete_group: AtomicUsize,
    pub deploy_template: AtomicUsize,
    pub check_completion: AtomicUsize,
    pub check_resource_status: AtomicUsize,
    pub get_outputs: AtomicUsize,
}

impl Calls {
    pub fn total(&self) -> usize {
        [
            &self.group_exists,
            &self.create_group,
            &self.delete_group,
            &self.deploy_template,
            &self.check_completion,
            &self.check_resource_status,
            &self.get_outputs,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

/// Stub provider with scripted answers and call counters.
///
/// `in_flight`/`max_in_flight` track overlapping mutations per stub so tests
/// can observe whether lifecycle calls interleave.
pub(crate) struct StubResourceManager {
    pub calls: Calls,
    pub groups: Mutex<HashSet<String>>,
    pub deployment_state: Mutex<ProvisioningState>,
    pub group_state: Mutex<ProvisioningState>,
    pub outputs: Mutex<Option<DeploymentOutputs>>,
    pub fail_deploy: Mutex<Option<u16>>,
    pub last_request: Mutex<Option<DeploymentRequest>>,
    pub mutation_delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Default for StubResourceManager {
    fn default() -> Self {
        Self {
            calls: Calls::default(),
            groups: Mutex::new(HashSet::new()),
            deployment_state: Mutex::new(ProvisioningState::Running),
            group_state: Mutex::new(ProvisioningState::Succeeded),
            outputs: Mutex::new(None),
            fail_deploy: Mutex::new(None),
            last_request: Mutex::new(None),
            mutation_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl StubResourceManager {
    pub fn with_group(self, group: &str) -> Self {
        self.groups.lock().unwrap().insert(group.to_string());
        self
    }

    pub fn with_mutation_delay(mut self, delay: Duration) -> Self {
        self.mutation_delay = delay;
        self
    }

    async fn mutation(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.mutation_delay.is_zero() {
            tokio::time::sleep(self.mutation_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceManager for StubResourceManager {
    async fn group_exists(&self, group: &str) -> Result<bool> {
        self.calls.group_exists.fetch_add(1, Ordering::SeqCst);
        self.mutation().await;
        Ok(self.groups.lock().unwrap().contains(group))
    }

    async fn create_group(&self, group: &str) -> Result<()> {
        self.calls.create_group.fetch_add(1, Ordering::SeqCst);
        self.groups.lock().unwrap().insert(group.to_string());
        Ok(())
    }

    async fn delete_group(&self, group: &str) -> Result<()> {
        self.calls.delete_group.fetch_add(1, Ordering::SeqCst);
        self.groups.lock().unwrap().remove(group);
        Ok(())
    }

    async fn deploy_template(
        &self,
        _group: &str,
        request: &DeploymentRequest,
    ) -> Result<DeploymentSubmission> {
        self.calls.deploy_template.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.fail_deploy.lock().unwrap() {
            return Err(BrokerError::Status {
                status,
                body: "InvalidTemplate".to_string(),
            });
        }
        *self.last_request.lock().unwrap() = Some(request.clone());
        Ok(DeploymentSubmission::Created)
    }

    async fn check_completion(&self, _group: &str, _name: &str) -> Result<ProvisioningState> {
        self.calls.check_completion.fetch_add(1, Ordering::SeqCst);
        Ok(*self.deployment_state.lock().unwrap())
    }

    async fn check_resource_status(&self, _group: &str) -> Result<ProvisioningState> {
        self.calls.check_resource_status.fetch_add(1, Ordering::SeqCst);
        Ok(*self.group_state.lock().unwrap())
    }

    async fn get_outputs(&self, _group: &str, _name: &str) -> Result<DeploymentOutputs> {
        self.calls.get_outputs.fetch_add(1, Ordering::SeqCst);
        self.outputs.lock().unwrap().clone().ok_or_else(|| {
            BrokerError::ProviderState("deployment response has no properties.outputs".to_string())
        })
    }
}
