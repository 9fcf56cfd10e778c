//! Azure Resource Manager integration.
//!
//! - [`CredentialCache`]: client-credential tokens shared by every request
//! - [`AzureRestClient`]: resource group and template deployment calls with
//!   bounded retries
//! - [`Endpoints`]: per-cloud endpoint roots and API versions

mod client;
mod credential;
mod environment;
mod models;
mod retry;

pub use client::{AzureRestClient, ResourceKind, RestResponse};
pub use credential::{Credential, CredentialCache};
pub use environment::{ApiVersions, CloudEnvironment, Endpoints, ENVIRONMENTS, PUBLIC_API_VERSIONS};
pub use models::*;
pub use retry::{RetryPolicy, TRANSIENT_STATUSES};
