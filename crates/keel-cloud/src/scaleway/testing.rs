//! In-memory Scaleway
//!
//! Backs the task tests in this crate and the model and bootstrap tests
//! downstream. Every mutating call is recorded in order.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use keel_common::{Error, Result};

use super::cloud::ScwCloud;
use super::model::*;
use super::tasks::ssh_key::openssh_fingerprint;

#[derive(Default)]
struct FakeState {
    servers: BTreeMap<String, Server>,
    user_data: HashMap<(String, String), Vec<u8>>,
    images: BTreeMap<String, String>,
    load_balancers: BTreeMap<String, LoadBalancer>,
    dns_records: BTreeMap<String, Vec<DnsRecord>>,
    vpcs: BTreeMap<String, Vpc>,
    private_networks: BTreeMap<String, PrivateNetwork>,
    dhcp_configs: BTreeMap<String, DhcpConfig>,
    gateways: BTreeMap<String, Gateway>,
    gateway_networks: BTreeMap<String, GatewayNetwork>,
    ssh_keys: BTreeMap<String, SshKey>,
    calls: Vec<String>,
    next_id: u64,
    next_address: u8,
}

impl FakeState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }
}

/// Scaleway held in memory
pub struct FakeScwCloud {
    region: String,
    zone: String,
    state: Mutex<FakeState>,
}

impl Default for FakeScwCloud {
    fn default() -> Self {
        Self::new("fr-par-1")
    }
}

impl FakeScwCloud {
    /// Empty cloud defaulting to `zone`
    pub fn new(zone: &str) -> Self {
        let region = zone.rsplit_once('-').map(|(r, _)| r).unwrap_or(zone).to_string();
        Self {
            region,
            zone: zone.to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Register a marketplace image
    pub fn with_image(self, label: &str, image_id: &str) -> Self {
        self.state
            .lock()
            .images
            .insert(label.to_string(), image_id.to_string());
        self
    }

    /// Seed an existing server
    pub fn insert_server(&self, server: Server) {
        self.state.lock().servers.insert(server.id.clone(), server);
    }

    /// Seed a user-data entry
    pub fn insert_user_data(&self, server_id: &str, key: &str, data: &[u8]) {
        self.state
            .lock()
            .user_data
            .insert((server_id.to_string(), key.to_string()), data.to_vec());
    }

    /// Seed a DNS record
    pub fn insert_dns_record(&self, dns_zone: &str, record: DnsRecord) {
        self.state
            .lock()
            .dns_records
            .entry(dns_zone.to_string())
            .or_default()
            .push(record);
    }

    /// Every server, ordered by ID
    pub fn servers(&self) -> Vec<Server> {
        self.state.lock().servers.values().cloned().collect()
    }

    /// Every record in `dns_zone`
    pub fn dns_records(&self, dns_zone: &str) -> Vec<DnsRecord> {
        self.state
            .lock()
            .dns_records
            .get(dns_zone)
            .cloned()
            .unwrap_or_default()
    }

    /// Stored user data
    pub fn user_data(&self, server_id: &str, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .user_data
            .get(&(server_id.to_string(), key.to_string()))
            .cloned()
    }

    /// Every load balancer
    pub fn load_balancers(&self) -> Vec<LoadBalancer> {
        self.state.lock().load_balancers.values().cloned().collect()
    }

    /// Every gateway network
    pub fn gateway_networks(&self) -> Vec<GatewayNetwork> {
        self.state.lock().gateway_networks.values().cloned().collect()
    }

    /// Mutating calls, oldest first
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`
    pub fn call_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl ScwCloud for FakeScwCloud {
    fn region(&self) -> String {
        self.region.clone()
    }

    fn zone(&self) -> String {
        self.zone.clone()
    }

    async fn list_servers(&self, zone: &str, tags: Vec<String>) -> Result<Vec<Server>> {
        Ok(self
            .state
            .lock()
            .servers
            .values()
            .filter(|s| s.zone == zone && tags.iter().all(|t| s.tags.contains(t)))
            .cloned()
            .collect())
    }

    async fn get_server(&self, zone: &str, id: &str) -> Result<Option<Server>> {
        Ok(self
            .state
            .lock()
            .servers
            .get(id)
            .filter(|s| s.zone == zone)
            .cloned())
    }

    async fn create_server(&self, request: CreateServerRequest) -> Result<Server> {
        let mut state = self.state.lock();
        let id = state.id("srv");
        let volume = state.id("vol");
        let server = Server {
            id: id.clone(),
            name: request.name.clone(),
            zone: request.zone,
            commercial_type: request.commercial_type,
            image_id: request.image_id,
            tags: request.tags,
            state: ServerState::Stopped,
            volume_ids: vec![volume],
            ..Default::default()
        };
        state.calls.push(format!("create_server {}", request.name));
        state.servers.insert(id, server.clone());
        Ok(server)
    }

    async fn server_action(&self, zone: &str, id: &str, action: ServerAction) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("server_action {id} {action:?}"));
        state.next_address = state.next_address.wrapping_add(1);
        let n = state.next_address;
        let server = state
            .servers
            .get_mut(id)
            .filter(|s| s.zone == zone)
            .ok_or_else(|| Error::not_exist(format!("server {id}")))?;
        match action {
            ServerAction::PowerOn => {
                server.state = ServerState::Running;
                server.private_ip.get_or_insert_with(|| format!("10.0.0.{n}"));
                server.public_ip.get_or_insert_with(|| format!("51.15.0.{n}"));
            }
            ServerAction::PowerOff => server.state = ServerState::Stopped,
        }
        Ok(())
    }

    async fn delete_server(&self, zone: &str, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("delete_server {id}"));
        if !state.servers.get(id).is_some_and(|s| s.zone == zone) {
            return Err(Error::not_exist(format!("server {id}")));
        }
        state.servers.remove(id);
        state.user_data.retain(|(server, _), _| server != id);
        Ok(())
    }

    async fn get_user_data(&self, _zone: &str, id: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.user_data(id, key))
    }

    async fn set_user_data(&self, _zone: &str, id: &str, key: &str, data: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock();
        if !state.servers.contains_key(id) {
            return Err(Error::not_exist(format!("server {id}")));
        }
        state.calls.push(format!("set_user_data {id} {key}"));
        state.user_data.insert((id.to_string(), key.to_string()), data);
        Ok(())
    }

    async fn resolve_image(&self, _zone: &str, _commercial_type: &str, label: &str) -> Result<String> {
        self.state
            .lock()
            .images
            .get(label)
            .cloned()
            .ok_or_else(|| Error::invalid_input(format!("no image found for label {label:?}")))
    }

    async fn image_label(&self, image_id: &str) -> Result<String> {
        self.state
            .lock()
            .images
            .iter()
            .find(|(_, id)| id.as_str() == image_id)
            .map(|(label, _)| label.clone())
            .ok_or_else(|| Error::not_exist(format!("image {image_id}")))
    }

    async fn attach_private_nic(&self, zone: &str, server_id: &str, private_network_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(format!("attach_private_nic {server_id} {private_network_id}"));
        let server = state
            .servers
            .get_mut(server_id)
            .filter(|s| s.zone == zone)
            .ok_or_else(|| Error::not_exist(format!("server {server_id}")))?;
        if !server.private_network_ids.iter().any(|id| id == private_network_id) {
            server.private_network_ids.push(private_network_id.to_string());
        }
        Ok(())
    }

    async fn set_tags(&self, resource: TaggedResource, _locality: &str, id: &str, tags: Vec<String>) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("set_tags {resource:?} {id}"));
        let missing = || Error::not_exist(format!("{resource:?} {id}"));
        match resource {
            TaggedResource::Server => state.servers.get_mut(id).ok_or_else(missing)?.tags = tags,
            TaggedResource::LoadBalancer => state.load_balancers.get_mut(id).ok_or_else(missing)?.tags = tags,
            TaggedResource::Vpc => state.vpcs.get_mut(id).ok_or_else(missing)?.tags = tags,
            TaggedResource::PrivateNetwork => state.private_networks.get_mut(id).ok_or_else(missing)?.tags = tags,
            TaggedResource::Gateway => state.gateways.get_mut(id).ok_or_else(missing)?.tags = tags,
        }
        Ok(())
    }

    async fn list_load_balancers(&self, zone: &str, name: &str) -> Result<Vec<LoadBalancer>> {
        Ok(self
            .state
            .lock()
            .load_balancers
            .values()
            .filter(|lb| lb.zone == zone && lb.name == name)
            .cloned()
            .collect())
    }

    async fn create_load_balancer(&self, request: CreateLoadBalancerRequest) -> Result<LoadBalancer> {
        let mut state = self.state.lock();
        let id = state.id("lb");
        state.next_address = state.next_address.wrapping_add(1);
        let lb = LoadBalancer {
            id: id.clone(),
            name: request.name.clone(),
            zone: request.zone,
            description: request.description,
            lb_type: request.lb_type,
            tags: request.tags,
            ip_addresses: vec![format!("51.159.0.{}", state.next_address)],
            private_network_ids: request.private_network_id.into_iter().collect(),
        };
        state.calls.push(format!("create_load_balancer {}", request.name));
        state.load_balancers.insert(id, lb.clone());
        Ok(lb)
    }

    async fn list_dns_records(&self, dns_zone: &str, name: &str) -> Result<Vec<DnsRecord>> {
        Ok(self
            .dns_records(dns_zone)
            .into_iter()
            .filter(|r| r.name == name)
            .collect())
    }

    async fn set_dns_records(
        &self,
        dns_zone: &str,
        name: &str,
        record_type: &str,
        ttl: u32,
        data: Vec<String>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state
            .calls
            .push(format!("set_dns_records {name}.{dns_zone} {record_type} {}", data.join(",")));
        let mut ids: Vec<String> = (0..data.len()).map(|_| state.id("rec")).collect();
        let records = state.dns_records.entry(dns_zone.to_string()).or_default();
        records.retain(|r| !(r.name == name && r.record_type == record_type));
        for value in data {
            records.push(DnsRecord {
                id: ids.remove(0),
                name: name.to_string(),
                record_type: record_type.to_string(),
                data: value,
                ttl,
            });
        }
        Ok(())
    }

    async fn list_vpcs(&self, region: &str, name: &str) -> Result<Vec<Vpc>> {
        Ok(self
            .state
            .lock()
            .vpcs
            .values()
            .filter(|v| v.region == region && v.name == name)
            .cloned()
            .collect())
    }

    async fn create_vpc(&self, region: &str, name: &str, tags: Vec<String>) -> Result<Vpc> {
        let mut state = self.state.lock();
        let id = state.id("vpc");
        let vpc = Vpc {
            id: id.clone(),
            name: name.to_string(),
            region: region.to_string(),
            tags,
        };
        state.calls.push(format!("create_vpc {name}"));
        state.vpcs.insert(id, vpc.clone());
        Ok(vpc)
    }

    async fn list_private_networks(&self, region: &str, name: &str) -> Result<Vec<PrivateNetwork>> {
        Ok(self
            .state
            .lock()
            .private_networks
            .values()
            .filter(|pn| pn.region == region && pn.name == name)
            .cloned()
            .collect())
    }

    async fn create_private_network(&self, request: CreatePrivateNetworkRequest) -> Result<PrivateNetwork> {
        let mut state = self.state.lock();
        if !state.vpcs.contains_key(&request.vpc_id) {
            return Err(Error::not_exist(format!("vpc {}", request.vpc_id)));
        }
        let id = state.id("pn");
        let pn = PrivateNetwork {
            id: id.clone(),
            name: request.name.clone(),
            region: request.region,
            vpc_id: request.vpc_id,
            subnets: vec![request.subnet.unwrap_or_else(|| "172.16.0.0/22".to_string())],
            tags: request.tags,
        };
        state.calls.push(format!("create_private_network {}", request.name));
        state.private_networks.insert(id, pn.clone());
        Ok(pn)
    }

    async fn list_dhcp_configs(&self, zone: &str) -> Result<Vec<DhcpConfig>> {
        Ok(self
            .state
            .lock()
            .dhcp_configs
            .values()
            .filter(|d| d.zone == zone)
            .cloned()
            .collect())
    }

    async fn create_dhcp_config(&self, zone: &str, subnet: &str, address: Option<String>) -> Result<DhcpConfig> {
        let mut state = self.state.lock();
        let id = state.id("dhcp");
        let dhcp = DhcpConfig {
            id: id.clone(),
            zone: zone.to_string(),
            subnet: subnet.to_string(),
            address,
        };
        state.calls.push(format!("create_dhcp_config {subnet}"));
        state.dhcp_configs.insert(id, dhcp.clone());
        Ok(dhcp)
    }

    async fn list_gateways(&self, zone: &str, name: &str) -> Result<Vec<Gateway>> {
        Ok(self
            .state
            .lock()
            .gateways
            .values()
            .filter(|g| g.zone == zone && g.name == name)
            .cloned()
            .collect())
    }

    async fn create_gateway(&self, request: CreateGatewayRequest) -> Result<Gateway> {
        let mut state = self.state.lock();
        let id = state.id("gw");
        state.next_address = state.next_address.wrapping_add(1);
        let gateway = Gateway {
            id: id.clone(),
            name: request.name.clone(),
            zone: request.zone,
            gateway_type: request.gateway_type,
            tags: request.tags,
            bastion_enabled: request.bastion_enabled,
            public_ip: Some(format!("62.210.0.{}", state.next_address)),
        };
        state.calls.push(format!("create_gateway {}", request.name));
        state.gateways.insert(id, gateway.clone());
        Ok(gateway)
    }

    async fn list_gateway_networks(&self, zone: &str, gateway_id: &str) -> Result<Vec<GatewayNetwork>> {
        Ok(self
            .state
            .lock()
            .gateway_networks
            .values()
            .filter(|g| g.zone == zone && g.gateway_id == gateway_id)
            .cloned()
            .collect())
    }

    async fn create_gateway_network(&self, request: CreateGatewayNetworkRequest) -> Result<GatewayNetwork> {
        let mut state = self.state.lock();
        if !state.gateways.contains_key(&request.gateway_id) {
            return Err(Error::not_exist(format!("gateway {}", request.gateway_id)));
        }
        let id = state.id("gwn");
        let gwn = GatewayNetwork {
            id: id.clone(),
            zone: request.zone,
            gateway_id: request.gateway_id.clone(),
            private_network_id: request.private_network_id.clone(),
            dhcp_id: request.dhcp_id,
            enable_masquerade: request.enable_masquerade,
        };
        state.calls.push(format!(
            "create_gateway_network {} {}",
            request.gateway_id, request.private_network_id
        ));
        state.gateway_networks.insert(id, gwn.clone());
        Ok(gwn)
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>> {
        Ok(self.state.lock().ssh_keys.values().cloned().collect())
    }

    async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKey> {
        let fingerprint = openssh_fingerprint(public_key)?;
        let mut state = self.state.lock();
        let id = state.id("key");
        let key = SshKey {
            id: id.clone(),
            name: name.to_string(),
            public_key: public_key.to_string(),
            fingerprint: format!("2048 MD5:{fingerprint} {name} (ssh-rsa)"),
        };
        state.calls.push(format!("create_ssh_key {name}"));
        state.ssh_keys.insert(id, key.clone());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tag_filter_requires_every_tag() {
        let cloud = FakeScwCloud::default();
        cloud
            .create_server(CreateServerRequest {
                zone: "fr-par-1".into(),
                name: "nodes-0".into(),
                tags: vec!["a".into(), "b".into()],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(cloud.list_servers("fr-par-1", vec!["a".into()]).await.unwrap().len(), 1);
        assert_eq!(
            cloud
                .list_servers("fr-par-1", vec!["a".into(), "c".into()])
                .await
                .unwrap()
                .len(),
            0
        );
        assert!(cloud.list_servers("nl-ams-1", vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn power_on_assigns_addresses() {
        let cloud = FakeScwCloud::default();
        let server = cloud
            .create_server(CreateServerRequest {
                zone: "fr-par-1".into(),
                name: "cp-0".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(server.state, ServerState::Stopped);

        cloud
            .server_action("fr-par-1", &server.id, ServerAction::PowerOn)
            .await
            .unwrap();
        let running = cloud.get_server("fr-par-1", &server.id).await.unwrap().unwrap();
        assert_eq!(running.state, ServerState::Running);
        assert!(running.private_ip.is_some());
        assert!(running.public_ip.is_some());
    }

    #[tokio::test]
    async fn dns_record_sets_are_replaced() {
        let cloud = FakeScwCloud::default();
        cloud
            .set_dns_records("example.com", "api.demo", "A", 60, vec!["1.1.1.1".into(), "2.2.2.2".into()])
            .await
            .unwrap();
        cloud
            .set_dns_records("example.com", "api.demo", "A", 60, vec!["3.3.3.3".into()])
            .await
            .unwrap();
        let records = cloud.list_dns_records("example.com", "api.demo").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, "3.3.3.3");
    }

    #[tokio::test]
    async fn images_resolve_both_ways() {
        let cloud = FakeScwCloud::default().with_image("ubuntu_jammy", "img-1");
        assert_eq!(cloud.resolve_image("fr-par-1", "DEV1-M", "ubuntu_jammy").await.unwrap(), "img-1");
        assert_eq!(cloud.image_label("img-1").await.unwrap(), "ubuntu_jammy");
        assert!(cloud.resolve_image("fr-par-1", "DEV1-M", "debian").await.is_err());
    }
}
