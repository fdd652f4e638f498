//! Private network interfaces of an instance group's servers

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use keel_common::{Error, Result};
use keel_tasks::{Changes, DeltaTask, Lifecycle, TaskKey, TaskMap, TaskRef, TerraformTarget};

use crate::scaleway::{cluster_tag, instance_group_tag, Server, ScwCloudHandle, ScwContext};

/// Every server of the group `name` plugged into one private network
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateNic {
    /// Instance group name
    pub name: String,
    /// Zone
    pub zone: String,
    /// Network to attach to
    pub private_network: TaskRef<String>,
    /// Servers in the group, used for Terraform rendering
    pub count: i32,
    /// Servers not attached yet
    pub unattached: Vec<String>,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl PrivateNic {
    async fn group_servers(&self, ctx: &ScwContext) -> Result<Vec<Server>> {
        let tags = vec![
            cluster_tag(ctx.cluster().cluster_name()),
            instance_group_tag(&self.name),
        ];
        ctx.cloud().list_servers(&self.zone, tags).await
    }

    fn network_id(&self) -> Result<String> {
        self.private_network
            .get()
            .ok_or_else(|| Error::precondition(format!("private network for {} has no ID", self.name)))
    }
}

#[async_trait]
impl DeltaTask<ScwCloudHandle> for PrivateNic {
    const KIND: &'static str = "PrivateNIC";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self, tasks: &TaskMap<ScwCloudHandle>) -> Option<Vec<TaskKey>> {
        let mut deps = vec![self.private_network.key().clone()];
        let instance = TaskKey::new("Instance", &self.name);
        if tasks.contains_key(&instance) {
            deps.push(instance);
        }
        Some(deps)
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let Some(pn_id) = self.private_network.get() else {
            return Ok(None);
        };
        let servers = self.group_servers(ctx).await?;
        if servers.is_empty() {
            return Ok(None);
        }
        let mut unattached: Vec<String> = servers
            .iter()
            .filter(|s| !s.private_network_ids.contains(&pn_id))
            .map(|s| s.id.clone())
            .collect();
        unattached.sort();
        Ok(Some(Self {
            name: self.name.clone(),
            zone: self.zone.clone(),
            private_network: TaskRef::resolved(self.private_network.key().clone(), pn_id),
            count: servers.len() as i32,
            unattached,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, &["zone"]),
            None if self.zone.is_empty() => Err(Error::required_field("Zone")),
            None => Ok(()),
        }
    }

    async fn render_api(&self, ctx: &ScwContext, _actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        let pn_id = self.network_id()?;
        for server in self.group_servers(ctx).await? {
            if server.private_network_ids.contains(&pn_id) {
                continue;
            }
            info!(server = %server.name, private_network = %pn_id, "attaching private NIC");
            ctx.cloud()
                .attach_private_nic(&self.zone, &server.id, &pn_id)
                .await?;
        }
        Ok(())
    }

    async fn render_terraform(
        &self,
        _ctx: &ScwContext,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        _changes: &Changes,
    ) -> Result<()> {
        for index in 0..self.count {
            let server = format!("{}-{index}", self.name);
            target.render_resource(
                "scaleway_instance_private_nic",
                &server,
                json!({
                    "zone": self.zone,
                    "server_id": TerraformTarget::reference("scaleway_instance_server", &server, "id"),
                    "private_network_id": TerraformTarget::reference(
                        "scaleway_vpc_private_network",
                        &self.private_network.key().name,
                        "id"
                    ),
                }),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::scaleway::tasks::test_support::{api, dry_run, CLUSTER};
    use crate::scaleway::testing::FakeScwCloud;
    use keel_tasks::{Output, Task};

    fn nic(pn: &Output<String>) -> PrivateNic {
        PrivateNic {
            name: "control-plane-fr-par-1".into(),
            zone: "fr-par-1".into(),
            private_network: TaskRef::new(TaskKey::new("PrivateNetwork", "demo"), pn),
            count: 2,
            unattached: Vec::new(),
            lifecycle: Lifecycle::Sync,
        }
    }

    fn server(id: &str) -> Server {
        Server {
            id: id.into(),
            name: format!("control-plane-fr-par-1-{id}"),
            zone: "fr-par-1".into(),
            tags: vec![cluster_tag(CLUSTER), instance_group_tag("control-plane-fr-par-1")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn attaches_only_missing_servers() {
        let cloud = Arc::new(FakeScwCloud::default());
        let mut attached = server("a");
        attached.private_network_ids = vec!["pn-1".into()];
        cloud.insert_server(attached);
        cloud.insert_server(server("b"));

        let pn = Output::with_value("pn-1".to_string());
        let (ctx, target) = dry_run(&cloud);
        Task::run(&nic(&pn), &ctx).await.unwrap();
        let changes = target.changes();
        assert_eq!(changes[0].fields[0].field, "unattached");

        Task::run(&nic(&pn), &api(&cloud)).await.unwrap();
        assert_eq!(cloud.calls(), vec!["attach_private_nic b pn-1"]);

        let (ctx, target) = dry_run(&cloud);
        Task::run(&nic(&pn), &ctx).await.unwrap();
        assert!(target.has_no_changes());
    }

    #[test]
    fn without_an_instance_task_only_the_network_is_a_dependency() {
        let tasks: TaskMap<ScwCloudHandle> = TaskMap::new();
        let deps = DeltaTask::<ScwCloudHandle>::dependencies(&nic(&Output::new()), &tasks).unwrap();
        assert_eq!(deps, vec![TaskKey::new("PrivateNetwork", "demo")]);
    }
}
