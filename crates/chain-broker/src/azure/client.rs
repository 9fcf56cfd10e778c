//! Azure Resource Manager REST client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::credential::CredentialCache;
use super::environment::Endpoints;
use super::models::{
    CreateResourceGroupRequest, DeploymentExtended, DeploymentOutputs, DeploymentRequest,
    DeploymentSubmission, ProvisioningState, ResourceGroup,
};
use super::retry::RetryPolicy;
use crate::config::{CloudConfig, ResourceConfig};
use crate::error::{BrokerError, Result};
use crate::traits::ResourceManager;

/// Per-request transport timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const USER_AGENT: &str = "azureblockchainbroker";

/// Which `api-version` a request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ResourceGroup,
    Deployment,
}

/// A fully read management API response.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RestResponse {
    fn into_status_error(self) -> BrokerError {
        BrokerError::Status {
            status: self.status.as_u16(),
            body: self.body,
        }
    }

    fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            warn!(error = %e, body = %self.body, "Failed to parse response");
            BrokerError::ProviderState(format!("unparseable response body: {e}"))
        })
    }
}

/// Authenticated client for resource groups and template deployments in one
/// subscription.
#[derive(Clone)]
pub struct AzureRestClient {
    http: Client,
    credentials: Arc<CredentialCache>,
    endpoints: Endpoints,
    subscription_id: String,
    location: String,
    retry: RetryPolicy,
    request_timeout: Option<Duration>,
}

impl AzureRestClient {
    /// Create a client from validated configuration.
    ///
    /// # Errors
    /// Returns error if the environment cannot be resolved or the HTTP client
    /// cannot be created.
    pub fn from_config(cloud: &CloudConfig, resource: &ResourceConfig) -> Result<Self> {
        let stack = cloud.azure.is_azure_stack().then_some(&cloud.azure_stack);
        let endpoints =
            Endpoints::resolve(&cloud.azure.environment, &cloud.azure.tenant_id, stack)?;
        Self::new(
            endpoints,
            &cloud.azure.client_id,
            &cloud.azure.client_secret,
            &resource.subscription_id,
            &resource.location,
        )
    }

    /// Create a client against explicit endpoints.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(
        endpoints: Endpoints,
        client_id: &str,
        client_secret: &str,
        subscription_id: impl Into<String>,
        location: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(BrokerError::Transport)?;
        let credentials = Arc::new(CredentialCache::new(
            http.clone(),
            &endpoints,
            client_id,
            client_secret,
        ));

        Ok(Self {
            http,
            credentials,
            endpoints,
            subscription_id: subscription_id.into(),
            location: location.into(),
            retry: RetryPolicy::default(),
            request_timeout: None,
        })
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cap each management request at `timeout` instead of the client default.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// The credential cache backing this client.
    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    fn api_version(&self, kind: ResourceKind) -> &'static str {
        match kind {
            ResourceKind::ResourceGroup => self.endpoints.api_versions.resource_groups,
            ResourceKind::Deployment => self.endpoints.api_versions.deployments,
        }
    }

    fn group_path<'a>(&'a self, group: &'a str) -> Vec<&'a str> {
        vec!["subscriptions", self.subscription_id.as_str(), "resourcegroups", group]
    }

    fn deployment_path<'a>(&'a self, group: &'a str, name: &'a str) -> Vec<&'a str> {
        let mut path = self.group_path(group);
        path.extend(["providers", "Microsoft.Resources", "deployments", name]);
        path
    }

    /// Append `segments` to the resource manager root, percent-encoding each
    /// one so names can never add, remove or escape path segments.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.endpoints.resource_manager).map_err(|e| {
            BrokerError::Config(format!(
                "invalid resource manager URL {}: {e}",
                self.endpoints.resource_manager
            ))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                BrokerError::Config(format!(
                    "resource manager URL {} cannot be a base",
                    self.endpoints.resource_manager
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Issue an authenticated request, retrying transient failures.
    ///
    /// The `api-version` for `kind` is always appended to `query`. A 401 forces
    /// one credential refresh and is reissued without using up an attempt.
    ///
    /// # Errors
    /// Returns [`BrokerError::Auth`] if no token can be obtained,
    /// [`BrokerError::Status`] when every attempt hit a transient status, and
    /// [`BrokerError::Transport`] for network failures.
    pub async fn request(
        &self,
        method: Method,
        kind: ResourceKind,
        path: &[&str],
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<RestResponse> {
        let url = self.url(path)?;
        let path = url.path().to_string();
        let api_version = self.api_version(kind);
        let mut attempt = 0;
        let mut refreshed = false;

        loop {
            attempt += 1;
            let credential = self.credentials.get_token(false).await?;

            let mut builder = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(credential.access_token())
                .query(&[("api-version", api_version)])
                .query(query);
            if let Some(body) = body {
                builder = builder.json(body);
            }
            if let Some(timeout) = self.request_timeout {
                builder = builder.timeout(timeout);
            }

            debug!(method = %method, url = %url, attempt, "Management API request");

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e)
                    if RetryPolicy::is_retryable_error(&e)
                        && self.retry.allows_retry_after(attempt) =>
                {
                    warn!(
                        "{method} {path} failed (attempt {attempt}/{}): {e}. Retrying in {:?}...",
                        self.retry.max_attempts, self.retry.backoff
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    continue;
                }
                Err(e) => return Err(BrokerError::Transport(e)),
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed {
                warn!(%path, "Management API rejected token, refreshing");
                refreshed = true;
                attempt -= 1;
                self.credentials.get_token(true).await?;
                continue;
            }

            let body = response.text().await?;
            if RetryPolicy::is_transient(status) {
                if !self.retry.allows_retry_after(attempt) {
                    debug!(
                        "Exhausted {} attempts for {method} {path}; last status: {status}",
                        self.retry.max_attempts
                    );
                    return Err(BrokerError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                warn!(
                    "{method} {path} returned {status} (attempt {attempt}/{}). Retrying in {:?}...",
                    self.retry.max_attempts,
                    self.retry.backoff
                );
                tokio::time::sleep(self.retry.backoff).await;
                continue;
            }

            debug!(status = status.as_u16(), %path, "Management API response");
            return Ok(RestResponse { status, body });
        }
    }

    async fn get_deployment(&self, group: &str, name: &str) -> Result<DeploymentExtended> {
        let response = self
            .request(
                Method::GET,
                ResourceKind::Deployment,
                &self.deployment_path(group, name),
                &[],
                None,
            )
            .await?;
        if response.status != StatusCode::OK {
            return Err(response.into_status_error());
        }
        response.json()
    }
}

#[async_trait]
impl ResourceManager for AzureRestClient {
    async fn group_exists(&self, group: &str) -> Result<bool> {
        let response = self
            .request(
                Method::HEAD,
                ResourceKind::ResourceGroup,
                &self.group_path(group),
                &[],
                None,
            )
            .await?;
        match response.status.as_u16() {
            200..=399 => Ok(true),
            400..=499 => Ok(false),
            _ => Err(response.into_status_error()),
        }
    }

    async fn create_group(&self, group: &str) -> Result<()> {
        info!(group, location = %self.location, "Creating resource group");

        let body = serde_json::to_value(CreateResourceGroupRequest {
            location: self.location.clone(),
        })?;
        let response = self
            .request(
                Method::PUT,
                ResourceKind::ResourceGroup,
                &self.group_path(group),
                &[],
                Some(&body),
            )
            .await?;
        match response.status {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            _ => Err(response.into_status_error()),
        }
    }

    async fn delete_group(&self, group: &str) -> Result<()> {
        info!(group, "Deleting resource group");

        let response = self
            .request(
                Method::DELETE,
                ResourceKind::ResourceGroup,
                &self.group_path(group),
                &[],
                None,
            )
            .await?;
        match response.status {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(()),
            _ => Err(response.into_status_error()),
        }
    }

    async fn deploy_template(
        &self,
        group: &str,
        request: &DeploymentRequest,
    ) -> Result<DeploymentSubmission> {
        info!(group, deployment = %request.name, "Submitting template deployment");

        let body = serde_json::to_value(request.to_body())?;
        let response = self
            .request(
                Method::PUT,
                ResourceKind::Deployment,
                &self.deployment_path(group, &request.name),
                &[],
                Some(&body),
            )
            .await?;
        // Both are documented success codes for a deployment PUT.
        match response.status {
            StatusCode::OK => Ok(DeploymentSubmission::Ok),
            StatusCode::CREATED => Ok(DeploymentSubmission::Created),
            _ => Err(response.into_status_error()),
        }
    }

    async fn check_completion(&self, group: &str, name: &str) -> Result<ProvisioningState> {
        let state = self.get_deployment(group, name).await?.provisioning_state()?;
        debug!(group, deployment = name, state = %state, "Deployment state");
        Ok(state)
    }

    async fn check_resource_status(&self, group: &str) -> Result<ProvisioningState> {
        let response = self
            .request(
                Method::GET,
                ResourceKind::ResourceGroup,
                &self.group_path(group),
                &[],
                None,
            )
            .await?;
        let state = match response.status {
            StatusCode::OK => response.json::<ResourceGroup>()?.provisioning_state()?,
            StatusCode::NOT_FOUND => ProvisioningState::NotFound,
            _ => return Err(response.into_status_error()),
        };
        debug!(group, state = %state, "Resource group state");
        Ok(state)
    }

    async fn get_outputs(&self, group: &str, name: &str) -> Result<DeploymentOutputs> {
        self.get_deployment(group, name).await?.consortium_outputs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::environment::PUBLIC_API_VERSIONS;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GROUP_PATH: &str = "/subscriptions/sub-1/resourcegroups/inst-1";
    const DEPLOYMENT_PATH: &str =
        "/subscriptions/sub-1/resourcegroups/inst-1/providers/Microsoft.Resources/deployments/inst-1";

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/tenant/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_on": (chrono::Utc::now().timestamp() + 3600).to_string(),
            })))
            .mount(server)
            .await;
    }

    async fn client_for(server: &MockServer) -> AzureRestClient {
        mount_token(server).await;
        let endpoints = Endpoints::custom(&server.uri(), "tenant", PUBLIC_API_VERSIONS);
        AzureRestClient::new(endpoints, "client", "secret", "sub-1", "westus")
            .unwrap()
            .with_retry_policy(RetryPolicy::with_backoff(Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn request_attaches_bearer_and_api_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .and(header("authorization", "Bearer tok"))
            .and(query_param("api-version", "2017-05-10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": { "provisioningState": "Succeeded" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let state = client.check_resource_status("inst-1").await.unwrap();
        assert_eq!(state, ProvisioningState::Succeeded);
    }

    #[tokio::test]
    async fn transient_status_is_retried_to_the_bound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.check_resource_status("inst-1").await.unwrap_err();
        assert!(matches!(err, BrokerError::Status { status: 503, ref body } if body == "busy"));
    }

    #[tokio::test]
    async fn transient_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.create_group("inst-1").await.unwrap();
    }

    #[tokio::test]
    async fn network_timeouts_are_retried_to_the_bound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server)
            .await
            .with_request_timeout(Duration::from_millis(100));
        let err = client.check_resource_status("inst-1").await.unwrap_err();
        assert!(matches!(err, BrokerError::Transport(ref e) if e.is_timeout()), "{err:?}");
    }

    #[tokio::test]
    async fn non_transient_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.create_group("inst-1").await.unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().contains("conflict"));
    }

    #[tokio::test]
    async fn unauthorized_forces_one_token_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.delete_group("inst-1").await.unwrap();
    }

    #[tokio::test]
    async fn names_are_encoded_as_single_path_segments() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/subscriptions/sub-1/resourcegroups/victim"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/subscriptions/sub-1/resourcegroups/inst-9%2F..%2Fvictim"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        client.delete_group("inst-9/../victim").await.unwrap();

        let url = client.url(&client.deployment_path("a?b", "c#d")).unwrap();
        assert_eq!(
            url.path(),
            concat!(
                "/subscriptions/sub-1/resourcegroups/a%3Fb",
                "/providers/Microsoft.Resources/deployments/c%23d"
            )
        );
        assert!(url.query().is_none());
    }

    #[tokio::test]
    async fn create_group_sends_location() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(GROUP_PATH))
            .and(body_json(json!({ "location": "westus" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).await.create_group("inst-1").await.unwrap();
    }

    #[tokio::test]
    async fn group_exists_maps_status_ranges() {
        let cases = [(200, true), (204, true), (304, true), (404, false), (403, false)];
        for (code, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("HEAD"))
                .and(path(GROUP_PATH))
                .respond_with(ResponseTemplate::new(code))
                .mount(&server)
                .await;

            let exists = client_for(&server).await.group_exists("inst-1").await.unwrap();
            assert_eq!(exists, expected, "status {code}");
        }
    }

    #[tokio::test]
    async fn delete_group_rejects_unexpected_success_code() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let err = client_for(&server).await.delete_group("inst-1").await.unwrap_err();
        assert_eq!(err.status(), Some(204));
    }

    #[tokio::test]
    async fn deploy_template_distinguishes_ok_and_created() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(ResponseTemplate::new(201))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let request = DeploymentRequest::from_parts(
            "inst-1",
            Some(json!({ "resources": [] })),
            None,
            Some(Default::default()),
            None,
        )
        .unwrap();
        assert_eq!(
            client.deploy_template("inst-1", &request).await.unwrap(),
            DeploymentSubmission::Created
        );
        assert_eq!(
            client.deploy_template("inst-1", &request).await.unwrap(),
            DeploymentSubmission::Ok
        );
    }

    #[tokio::test]
    async fn check_completion_does_not_map_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_string("DeploymentNotFound"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .check_completion("inst-1", "inst-1")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn check_resource_status_maps_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(GROUP_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let state = client_for(&server)
            .await
            .check_resource_status("inst-1")
            .await
            .unwrap();
        assert_eq!(state, ProvisioningState::NotFound);
    }

    #[tokio::test]
    async fn get_outputs_requires_both_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DEPLOYMENT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {
                    "provisioningState": "Succeeded",
                    "outputs": { "admin-site": { "type": "String", "value": "http://a" } }
                }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .get_outputs("inst-1", "inst-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::ProviderState(ref m) if m.contains("ethereum-rpc-endpoint")
        ));
    }
}
