//! The Scaleway API surface the tasks consume

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use keel_common::retry::{poll_until, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT};
use keel_common::{Error, Result};
use keel_tasks::Context;

use super::model::*;

#[cfg(test)]
use mockall::automock;

/// Scaleway APIs used while reconciling a cluster
///
/// Listing calls return every page. Lookups of a missing object return
/// `Ok(None)`; mutations of a missing object fail with not-exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScwCloud: Send + Sync {
    /// Default region (`fr-par`)
    fn region(&self) -> String;

    /// Default zone (`fr-par-1`)
    fn zone(&self) -> String;

    /// Servers in `zone` carrying every tag in `tags`
    async fn list_servers(&self, zone: &str, tags: Vec<String>) -> Result<Vec<Server>>;

    /// One server
    async fn get_server(&self, zone: &str, id: &str) -> Result<Option<Server>>;

    /// Create a stopped server
    async fn create_server(&self, request: CreateServerRequest) -> Result<Server>;

    /// Power a server on or off
    async fn server_action(&self, zone: &str, id: &str, action: ServerAction) -> Result<()>;

    /// Stop and delete a server together with its volumes
    async fn delete_server(&self, zone: &str, id: &str) -> Result<()>;

    /// User-data entry `key` of a server
    async fn get_user_data(&self, zone: &str, id: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Set user-data entry `key` of a server
    async fn set_user_data(&self, zone: &str, id: &str, key: &str, data: Vec<u8>) -> Result<()>;

    /// Image ID for a marketplace label, for `commercial_type` in `zone`
    async fn resolve_image(&self, zone: &str, commercial_type: &str, label: &str) -> Result<String>;

    /// Marketplace label of an image ID
    async fn image_label(&self, image_id: &str) -> Result<String>;

    /// Plug a server into a private network
    async fn attach_private_nic(&self, zone: &str, server_id: &str, private_network_id: &str) -> Result<()>;

    /// Replace the tags of an object
    async fn set_tags(
        &self,
        resource: TaggedResource,
        locality: &str,
        id: &str,
        tags: Vec<String>,
    ) -> Result<()>;

    /// Load balancers named `name`
    async fn list_load_balancers(&self, zone: &str, name: &str) -> Result<Vec<LoadBalancer>>;

    /// Create a load balancer
    async fn create_load_balancer(&self, request: CreateLoadBalancerRequest) -> Result<LoadBalancer>;

    /// Records named `name` (relative) in `dns_zone`
    async fn list_dns_records(&self, dns_zone: &str, name: &str) -> Result<Vec<DnsRecord>>;

    /// Replace the record set `name`/`record_type` with one record per value
    async fn set_dns_records(
        &self,
        dns_zone: &str,
        name: &str,
        record_type: &str,
        ttl: u32,
        data: Vec<String>,
    ) -> Result<()>;

    /// VPCs named `name`
    async fn list_vpcs(&self, region: &str, name: &str) -> Result<Vec<Vpc>>;

    /// Create a VPC
    async fn create_vpc(&self, region: &str, name: &str, tags: Vec<String>) -> Result<Vpc>;

    /// Private networks named `name`
    async fn list_private_networks(&self, region: &str, name: &str) -> Result<Vec<PrivateNetwork>>;

    /// Create a private network
    async fn create_private_network(&self, request: CreatePrivateNetworkRequest) -> Result<PrivateNetwork>;

    /// DHCP configurations in `zone`
    async fn list_dhcp_configs(&self, zone: &str) -> Result<Vec<DhcpConfig>>;

    /// Create a DHCP configuration
    async fn create_dhcp_config(&self, zone: &str, subnet: &str, address: Option<String>) -> Result<DhcpConfig>;

    /// Gateways named `name`
    async fn list_gateways(&self, zone: &str, name: &str) -> Result<Vec<Gateway>>;

    /// Create a gateway
    async fn create_gateway(&self, request: CreateGatewayRequest) -> Result<Gateway>;

    /// Networks attached to `gateway_id`
    async fn list_gateway_networks(&self, zone: &str, gateway_id: &str) -> Result<Vec<GatewayNetwork>>;

    /// Attach a private network to a gateway
    async fn create_gateway_network(&self, request: CreateGatewayNetworkRequest) -> Result<GatewayNetwork>;

    /// Project SSH keys
    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>>;

    /// Register an SSH key
    async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKey>;
}

/// Cloud handle held by task contexts
pub type ScwCloudHandle = Arc<dyn ScwCloud>;

/// Task context for Scaleway runs
pub type ScwContext = Context<ScwCloudHandle>;

/// Polling parameters for [`wait_for_server_state`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitOptions {
    /// Give up after this long
    pub timeout: Duration,
    /// Delay between polls
    pub interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_POLL_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Poll a server until it reaches `state`
///
/// Stops with `Cancelled` as soon as `cancel` fires.
pub async fn wait_for_server_state(
    cloud: &dyn ScwCloud,
    zone: &str,
    id: &str,
    state: ServerState,
    options: WaitOptions,
    cancel: &CancellationToken,
) -> Result<Server> {
    let operation = format!("server {id} to be {state}");
    poll_until(&operation, options.interval, options.timeout, cancel, || async {
        let server = cloud
            .get_server(zone, id)
            .await?
            .ok_or_else(|| Error::not_exist(format!("server {zone}/{id}")))?;
        if server.state == state {
            return Ok(Some(server));
        }
        debug!(server = %id, current = %server.state, wanted = %state, "waiting for server");
        Ok(None)
    })
    .await
}
