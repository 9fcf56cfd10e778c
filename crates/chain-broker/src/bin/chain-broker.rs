//! Chain broker - service broker for Ethereum consortium networks on Azure.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chain_broker::azure::AzureRestClient;
use chain_broker::server::{self, AppState, BasicAuth, ServiceIdentity};
use chain_broker::{
    AzureConfig, AzureStackConfig, BlockchainConfig, CloudConfig, DeploymentOrchestrator,
    ProvisioningBroker, ResourceConfig,
};

/// Chain broker - provisions Ethereum consortium networks on Azure.
#[derive(Parser)]
#[command(name = "chain-broker")]
#[command(about = "Open Service Broker for Azure blockchain networks")]
#[command(rename_all = "camelCase")]
#[allow(clippy::struct_field_names)]
struct Cli {
    /// host:port to serve the service broker API on.
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:9000")]
    listen_addr: String,

    /// Name of the service registered with the platform.
    #[arg(long, env = "SERVICE_NAME", default_value = "azureblockchain")]
    service_name: String,

    /// ID of the service registered with the platform.
    #[arg(
        long = "serviceID",
        env = "SERVICE_ID",
        default_value = "abb90071-f3e2-4a31-99f0-fc5d552dbbba"
    )]
    service_id: String,

    /// Azure environment: AzureCloud, AzureChinaCloud, AzureUSGovernment,
    /// AzureGermanCloud or AzureStack.
    #[arg(long, env = "AZURE_ENVIRONMENT", default_value = "AzureCloud")]
    environment: String,

    /// Tenant id of the service principal.
    #[arg(long = "tenantID", env = "AZURE_TENANT_ID", default_value = "")]
    tenant_id: String,

    /// Client id of the service principal.
    #[arg(long = "clientID", env = "AZURE_CLIENT_ID", default_value = "")]
    client_id: String,

    /// Client secret of the service principal.
    #[arg(long, env = "AZURE_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    client_secret: String,

    /// Azure Stack domain (environment AzureStack only).
    #[arg(long, env = "AZURE_STACK_DOMAIN", default_value = "")]
    azure_stack_domain: String,

    /// Azure Stack authentication: AzureAD, AzureStackAD or AzureStack.
    #[arg(long, env = "AZURE_STACK_AUTHENTICATION", default_value = "")]
    azure_stack_authentication: String,

    /// Azure Stack token resource.
    #[arg(long, env = "AZURE_STACK_RESOURCE", default_value = "")]
    azure_stack_resource: String,

    /// Azure Stack endpoint prefix.
    #[arg(long, env = "AZURE_STACK_ENDPOINT_PREFIX", default_value = "")]
    azure_stack_endpoint_prefix: String,

    /// Subscription that owns the instance resource groups.
    #[arg(long = "subscriptionID", env = "AZURE_SUBSCRIPTION_ID", default_value = "")]
    subscription_id: String,

    /// Location for new resource groups.
    #[arg(long, env = "AZURE_LOCATION", default_value = "southcentralus")]
    location: String,

    /// Base for resource names (6 alphanumeric characters or less).
    #[arg(long, env = "NAME_PREFIX", default_value = "blockchain")]
    name_prefix: String,

    /// Administrator username of each deployed VM.
    #[arg(long, env = "ADMIN_USERNAME", default_value = "gethadmin")]
    admin_username: String,

    /// Administrator password of each deployed VM.
    #[arg(long, env = "ADMIN_PASSWORD", default_value = "", hide_env_values = true)]
    admin_password: String,

    /// Password securing the generated Ethereum account.
    #[arg(long, env = "ETHEREUM_ACCOUNT_PSSWD", default_value = "", hide_env_values = true)]
    ethereum_account_psswd: String,

    /// Passphrase for the generated Ethereum account's private key.
    #[arg(
        long,
        env = "ETHEREUM_ACCOUNT_PASSPHRASE",
        default_value = "",
        hide_env_values = true
    )]
    ethereum_account_passphrase: String,

    /// Private Ethereum network id.
    #[arg(long = "ethereumNetworkID", env = "ETHEREUM_NETWORK_ID", default_value_t = 553_289)]
    ethereum_network_id: u64,

    /// Number of consortium members.
    #[arg(long, env = "NUM_CONSORTIUM_MEMBERS", default_value_t = 2)]
    num_consortium_members: u64,

    /// Mining nodes per consortium member.
    #[arg(long, env = "NUM_MINING_NODES_PER_MEMBER", default_value_t = 1)]
    num_mining_nodes_per_member: u64,

    /// VM size of mining nodes.
    #[arg(long = "mnNodeVMSize", env = "MN_NODE_VM_SIZE", default_value = "Standard_D1_v2")]
    mn_node_vm_size: String,

    /// Number of load balanced transaction nodes.
    #[arg(long = "numTXNodes", env = "NUM_TX_NODES", default_value_t = 1)]
    num_tx_nodes: u64,

    /// VM size of transaction nodes.
    #[arg(long = "txNodeVMSize", env = "TX_NODE_VM_SIZE", default_value = "Standard_D1_v2")]
    tx_node_vm_size: String,

    /// Basic auth username platform callers must present.
    #[arg(long, env = "USERNAME", default_value = "")]
    broker_username: String,

    /// Basic auth password platform callers must present.
    #[arg(long, env = "PASSWORD", default_value = "", hide_env_values = true)]
    broker_password: String,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long = "log-json", default_value = "false")]
    log_json: bool,
}

impl Cli {
    fn cloud_config(&self) -> CloudConfig {
        CloudConfig {
            azure: AzureConfig::new(
                &self.environment,
                &self.tenant_id,
                &self.client_id,
                &self.client_secret,
            ),
            azure_stack: AzureStackConfig::new(
                &self.azure_stack_domain,
                &self.azure_stack_authentication,
                &self.azure_stack_resource,
                &self.azure_stack_endpoint_prefix,
            ),
        }
    }

    fn resource_config(&self) -> ResourceConfig {
        ResourceConfig::new(&self.subscription_id, &self.location)
    }

    fn blockchain_config(&self) -> BlockchainConfig {
        BlockchainConfig {
            name_prefix: self.name_prefix.clone(),
            admin_username: self.admin_username.clone(),
            admin_password: self.admin_password.clone(),
            ethereum_account_psswd: self.ethereum_account_psswd.clone(),
            ethereum_account_passphrase: self.ethereum_account_passphrase.clone(),
            ethereum_network_id: self.ethereum_network_id,
            num_consortium_members: self.num_consortium_members,
            num_mining_nodes_per_member: self.num_mining_nodes_per_member,
            mn_node_vm_size: self.mn_node_vm_size.clone(),
            num_tx_nodes: self.num_tx_nodes,
            tx_node_vm_size: self.tx_node_vm_size.clone(),
        }
    }

    fn validate_service(&self) -> Result<()> {
        if self.service_name.is_empty() {
            bail!("serviceName is required");
        }
        if self.service_id.is_empty() {
            bail!("serviceID is required");
        }
        if self.broker_username.is_empty() || self.broker_password.is_empty() {
            bail!("USERNAME and PASSWORD must be set for broker authentication");
        }
        Ok(())
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let cloud = cli.cloud_config();
    let resource = cli.resource_config();
    let blockchain = cli.blockchain_config();

    cli.validate_service()?;
    cloud.validate().context("invalid cloud configuration")?;
    resource.validate().context("invalid resource configuration")?;
    blockchain.validate().context("invalid blockchain configuration")?;

    info!(
        environment = %cloud.azure.environment,
        location = %resource.location,
        "Starting chain broker"
    );

    let client = AzureRestClient::from_config(&cloud, &resource)
        .context("Failed to create Azure REST client")?;
    let orchestrator = DeploymentOrchestrator::new(Arc::new(client), blockchain);
    let state = Arc::new(AppState {
        broker: ProvisioningBroker::new(orchestrator),
        service: ServiceIdentity {
            name: cli.service_name.clone(),
            id: cli.service_id.clone(),
        },
        auth: BasicAuth {
            username: cli.broker_username.clone(),
            password: cli.broker_password.clone(),
        },
    });

    server::run_server(state, &cli.listen_addr, shutdown_signal()).await
}
