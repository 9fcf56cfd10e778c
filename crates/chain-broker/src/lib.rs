//! Service broker that provisions Ethereum consortium networks on Azure.
//!
//! Each service instance maps to one resource group named after the instance
//! id. Provisioning submits a linked template deployment into that group and
//! progress is polled with an opaque `verb:name` operation token.
//!
//! ## Layers
//!
//! 1. [`azure`] - credential cache and Resource Manager REST client
//! 2. [`deployment`] - idempotent "group exists, then deploy" orchestration
//! 3. [`broker`] - provision / deprovision / poll state machine
//! 4. [`server`] - Open Service Broker HTTP surface

pub mod azure;
pub mod broker;
pub mod config;
pub mod deployment;
pub mod error;
pub mod server;
pub mod traits;

#[cfg(test)]
mod testing;

pub use broker::{
    DeprovisionResponse, LastOperation, OperationState, OperationToken, OperationVerb,
    ProvisionResponse, ProvisioningBroker,
};
pub use config::{AzureConfig, AzureStackConfig, BlockchainConfig, CloudConfig, ResourceConfig};
pub use deployment::DeploymentOrchestrator;
pub use error::{BrokerError, Result, ResultExt};
pub use traits::ResourceManager;
