//! DNS records for the API and kops-controller endpoints
//!
//! Records are first published with a placeholder address. At render time
//! the placeholder is swapped for the live control-plane addresses when any
//! are known; once a record exists it is left to the in-cluster DNS
//! controller.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use keel_common::api::InstanceGroupRole;
use keel_common::{Error, Result};
use keel_tasks::{keys_of_kind, Changes, DeltaTask, Lifecycle, TaskKey, TaskMap, TerraformTarget};

use crate::scaleway::{cluster_tag, role_tag, ScwCloudHandle, ScwContext};

/// Address published before the real one is known
pub const PLACEHOLDER_IP: &str = "203.0.113.123";

/// TTL of records created with the placeholder
pub const PLACEHOLDER_TTL: u32 = 60;

/// One DNS record set
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecordTask {
    /// Fully qualified record name
    pub name: String,
    /// Zone the record lives in
    pub dns_zone: String,
    /// Record type
    #[serde(rename = "type")]
    pub record_type: String,
    /// Record value
    pub data: String,
    /// TTL in seconds
    pub ttl: u32,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl DnsRecordTask {
    /// A record for `name` in `dns_zone`, published with the placeholder address
    pub fn placeholder(name: impl Into<String>, dns_zone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dns_zone: dns_zone.into(),
            record_type: "A".to_string(),
            data: PLACEHOLDER_IP.to_string(),
            ttl: PLACEHOLDER_TTL,
            lifecycle: Lifecycle::Sync,
        }
    }

    /// Record name relative to the zone
    pub fn relative_name(&self) -> Result<&str> {
        let zone = self.dns_zone.trim_end_matches('.');
        let name = self.name.trim_end_matches('.');
        name.strip_suffix(zone)
            .and_then(|n| n.strip_suffix('.'))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::invalid_input(format!("record {name} is not inside zone {zone}")))
    }

    fn is_internal(&self) -> bool {
        self.name.contains(".internal.")
    }

    async fn control_plane_addresses(&self, ctx: &ScwContext) -> Result<Vec<String>> {
        let cloud = ctx.cloud();
        let tags = vec![
            cluster_tag(ctx.cluster().cluster_name()),
            role_tag(InstanceGroupRole::ControlPlane),
        ];
        let servers = cloud.list_servers(&cloud.zone(), tags).await?;
        let mut addresses: Vec<String> = servers
            .into_iter()
            .filter_map(|s| if self.is_internal() { s.private_ip } else { s.public_ip.or(s.private_ip) })
            .collect();
        addresses.sort();
        addresses.dedup();
        Ok(addresses)
    }
}

#[async_trait]
impl DeltaTask<ScwCloudHandle> for DnsRecordTask {
    const KIND: &'static str = "DNSRecord";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self, tasks: &TaskMap<ScwCloudHandle>) -> Option<Vec<TaskKey>> {
        Some(keys_of_kind(tasks, "Instance"))
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let records = ctx
            .cloud()
            .list_dns_records(&self.dns_zone, self.relative_name()?)
            .await?;
        let Some(record) = records.into_iter().find(|r| r.record_type == self.record_type) else {
            return Ok(None);
        };
        debug!(record = %self.name, data = %record.data, "record exists");
        Ok(Some(Self {
            name: self.name.clone(),
            dns_zone: self.dns_zone.clone(),
            record_type: record.record_type,
            data: self.data.clone(),
            ttl: record.ttl,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        self.relative_name().map(|_| ())
    }

    async fn render_api(&self, ctx: &ScwContext, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        let mut data = self.control_plane_addresses(ctx).await?;
        if data.is_empty() {
            data.push(self.data.clone());
        }
        info!(record = %self.name, addresses = ?data, "publishing record");
        ctx.cloud()
            .set_dns_records(&self.dns_zone, self.relative_name()?, &self.record_type, self.ttl, data)
            .await
    }

    async fn render_terraform(
        &self,
        _ctx: &ScwContext,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        target.render_resource(
            "scaleway_domain_record",
            &self.name,
            json!({
                "dns_zone": self.dns_zone,
                "name": self.relative_name()?,
                "type": self.record_type,
                "data": self.data,
                "ttl": self.ttl,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::scaleway::tasks::test_support::{api, dry_run};
    use crate::scaleway::testing::FakeScwCloud;
    use crate::scaleway::{instance_group_tag, DnsRecord, Server, ServerState};
    use keel_tasks::Task;

    fn data(cloud: &FakeScwCloud, name: &str) -> Vec<String> {
        cloud
            .dns_records("example.com")
            .into_iter()
            .filter(|r| r.name == name)
            .map(|r| r.data)
            .collect()
    }

    fn control_plane(id: &str, private_ip: &str, public_ip: &str) -> Server {
        Server {
            id: id.into(),
            name: format!("control-plane-{id}"),
            zone: "fr-par-1".into(),
            tags: vec![
                cluster_tag("demo.example.com"),
                instance_group_tag("control-plane-fr-par-1"),
                role_tag(InstanceGroupRole::ControlPlane),
            ],
            state: ServerState::Running,
            private_ip: Some(private_ip.into()),
            public_ip: Some(public_ip.into()),
            ..Default::default()
        }
    }

    #[test]
    fn names_are_relative_to_the_zone() {
        let record = DnsRecordTask::placeholder("api.internal.demo.example.com", "example.com");
        assert_eq!(record.relative_name().unwrap(), "api.internal.demo");
        assert!(DnsRecordTask::placeholder("api.other.org", "example.com").relative_name().is_err());
        assert!(DnsRecordTask::placeholder("example.com", "example.com").relative_name().is_err());
    }

    #[tokio::test]
    async fn without_servers_the_placeholder_is_published() {
        let cloud = Arc::new(FakeScwCloud::default());
        Task::run(&DnsRecordTask::placeholder("api.demo.example.com", "example.com"), &api(&cloud))
            .await
            .unwrap();
        let records = cloud.dns_records("example.com");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, PLACEHOLDER_IP);
        assert_eq!(records[0].ttl, PLACEHOLDER_TTL);
    }

    #[tokio::test]
    async fn internal_names_resolve_to_private_addresses() {
        let cloud = Arc::new(FakeScwCloud::default());
        cloud.insert_server(control_plane("a", "10.0.0.2", "51.15.0.2"));
        cloud.insert_server(control_plane("b", "10.0.0.3", "51.15.0.3"));

        let ctx = api(&cloud);
        Task::run(&DnsRecordTask::placeholder("api.internal.demo.example.com", "example.com"), &ctx)
            .await
            .unwrap();
        Task::run(&DnsRecordTask::placeholder("api.demo.example.com", "example.com"), &ctx)
            .await
            .unwrap();

        assert_eq!(data(&cloud, "api.internal.demo"), vec!["10.0.0.2", "10.0.0.3"]);
        assert_eq!(data(&cloud, "api.demo"), vec!["51.15.0.2", "51.15.0.3"]);
    }

    #[tokio::test]
    async fn existing_record_is_left_alone() {
        let cloud = Arc::new(FakeScwCloud::default());
        cloud.insert_dns_record(
            "example.com",
            DnsRecord {
                id: "rec-1".into(),
                name: "kops-controller.internal.demo".into(),
                record_type: "A".into(),
                data: "10.0.0.9".into(),
                ttl: PLACEHOLDER_TTL,
            },
        );
        let (ctx, target) = dry_run(&cloud);
        Task::run(
            &DnsRecordTask::placeholder("kops-controller.internal.demo.example.com", "example.com"),
            &ctx,
        )
        .await
        .unwrap();
        assert!(target.has_no_changes());
    }
}
