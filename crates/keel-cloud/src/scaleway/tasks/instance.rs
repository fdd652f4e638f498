//! Servers of one instance group
//!
//! One task covers the whole group. Servers are named `<group>-<index>` and
//! found again through their cluster and instance-group tags. Servers whose
//! type, image or cloud-init no longer match are tagged
//! [`TAG_NEEDS_UPDATE`] for the rolling update to replace; they are never
//! modified in place.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use keel_common::api::InstanceGroupRole;
use keel_common::{Error, Result};
use keel_tasks::{
    keys_of_kind, resource_sha256, Changes, DeltaTask, Deletion, Lifecycle, ResourceRef, TaskKey, TaskMap,
    TerraformTarget,
};

use crate::scaleway::cloud::{wait_for_server_state, ScwCloud, WaitOptions};
use crate::scaleway::{
    cluster_tag, instance_group_tag, role_from_tags, CreateServerRequest, Server, ServerAction, ServerState,
    ScwCloudHandle, ScwContext, TaggedResource, TAG_NEEDS_UPDATE,
};

/// User-data key holding the bootstrap script
pub const USER_DATA_KEY: &str = "cloud-init";

/// The servers of an instance group
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Instance group name
    pub name: String,
    /// Zone
    pub zone: String,
    /// Role of every server
    pub role: Option<InstanceGroupRole>,
    /// Commercial type
    pub commercial_type: String,
    /// Marketplace image label
    pub image: String,
    /// Tags
    pub tags: Vec<String>,
    /// Number of servers
    pub count: i32,
    /// Root volume size in GB
    pub volume_size: Option<i32>,
    /// Servers whose configuration is stale
    pub needs_update: Vec<String>,
    /// Bootstrap script
    #[serde(skip)]
    pub user_data: Option<ResourceRef>,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl Instance {
    fn group_tags(&self, ctx: &ScwContext) -> Vec<String> {
        vec![
            cluster_tag(ctx.cluster().cluster_name()),
            instance_group_tag(&self.name),
        ]
    }

    async fn group_servers(&self, ctx: &ScwContext) -> Result<Vec<Server>> {
        let mut servers = ctx
            .cloud()
            .list_servers(&self.zone, self.group_tags(ctx))
            .await?;
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(servers)
    }

    async fn user_data_bytes(&self) -> Result<Vec<u8>> {
        match &self.user_data {
            Some(resource) => resource.bytes().await,
            None => Err(Error::required_field("UserData")),
        }
    }

    /// Reason `server` has to be replaced, if any
    async fn staleness(
        &self,
        cloud: &dyn ScwCloud,
        server: &Server,
        image_id: &str,
        user_data_sha: Option<&str>,
    ) -> Result<Option<&'static str>> {
        if server.commercial_type != self.commercial_type {
            return Ok(Some("commercial type"));
        }
        if server.image_id != image_id {
            return Ok(Some("image"));
        }
        if let Some(expected) = user_data_sha {
            let live = cloud.get_user_data(&self.zone, &server.id, USER_DATA_KEY).await?;
            let live_sha = live.map(|data| hex::encode(Sha256::digest(&data)));
            if live_sha.as_deref() != Some(expected) {
                return Ok(Some("user data"));
            }
        }
        Ok(None)
    }
}

/// Name `<group>-<n>` with the lowest `n` not in `taken`
pub fn unique_server_name(group: &str, taken: &[String]) -> String {
    let mut index = 0usize;
    loop {
        let candidate = format!("{group}-{index}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        index += 1;
    }
}

/// Upload the bootstrap script, power the server on and wait for it to run
pub async fn bootstrap_server(
    cloud: &dyn ScwCloud,
    zone: &str,
    id: &str,
    user_data: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<Server> {
    cloud.set_user_data(zone, id, USER_DATA_KEY, user_data).await?;
    cloud.server_action(zone, id, ServerAction::PowerOn).await?;
    wait_for_server_state(cloud, zone, id, ServerState::Running, WaitOptions::default(), cancel).await
}

#[async_trait]
impl DeltaTask<ScwCloudHandle> for Instance {
    const KIND: &'static str = "Instance";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self, tasks: &TaskMap<ScwCloudHandle>) -> Option<Vec<TaskKey>> {
        let mut deps = Vec::new();
        for kind in ["LoadBalancer", "PrivateNetwork", "SSHKey"] {
            deps.extend(keys_of_kind(tasks, kind));
        }
        Some(deps)
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let servers = self.group_servers(ctx).await?;
        let Some(first) = servers.first() else {
            return Ok(None);
        };
        let cloud = ctx.cloud().as_ref();
        let image_id = cloud
            .resolve_image(&self.zone, &self.commercial_type, &self.image)
            .await?;
        let user_data_sha = match &self.user_data {
            Some(resource) => Some(resource_sha256(resource.as_ref()).await?),
            None => None,
        };

        let mut needs_update = Vec::new();
        for server in &servers {
            if server.tags.iter().any(|t| t == TAG_NEEDS_UPDATE) {
                continue;
            }
            if let Some(reason) = self
                .staleness(cloud, server, &image_id, user_data_sha.as_deref())
                .await?
            {
                debug!(server = %server.name, id = %server.id, reason, "server needs update");
                needs_update.push(server.id.clone());
            }
        }

        Ok(Some(Self {
            name: self.name.clone(),
            zone: first.zone.clone(),
            role: role_from_tags(&first.tags),
            commercial_type: first.commercial_type.clone(),
            image: cloud.image_label(&first.image_id).await?,
            tags: first.tags.iter().filter(|t| *t != TAG_NEEDS_UPDATE).cloned().collect(),
            count: servers.len() as i32,
            volume_size: self.volume_size,
            needs_update,
            user_data: self.user_data.clone(),
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        if self.count < 0 {
            return Err(Error::invalid_field("count", "instance count must not be negative"));
        }
        match actual {
            Some(_) => changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, &["name", "zone"]),
            None if self.zone.is_empty() => Err(Error::required_field("Zone")),
            None if self.commercial_type.is_empty() => Err(Error::required_field("CommercialType")),
            None if self.image.is_empty() => Err(Error::required_field("Image")),
            None => Ok(()),
        }
    }

    async fn render_api(&self, ctx: &ScwContext, actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        let cloud = ctx.cloud().as_ref();

        if let Some(actual) = actual {
            for id in &actual.needs_update {
                let Some(server) = cloud.get_server(&self.zone, id).await? else {
                    continue;
                };
                let mut tags = server.tags;
                tags.push(TAG_NEEDS_UPDATE.to_string());
                info!(server = %server.name, id = %id, "marking server for update");
                cloud.set_tags(TaggedResource::Server, &self.zone, id, tags).await?;
            }
        }

        let missing = self.count - actual.map(|a| a.count).unwrap_or(0);
        if missing <= 0 {
            return Ok(());
        }

        let user_data = self.user_data_bytes().await?;
        let image_id = cloud
            .resolve_image(&self.zone, &self.commercial_type, &self.image)
            .await?;
        let mut taken: Vec<String> = self
            .group_servers(ctx)
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();

        for _ in 0..missing {
            ctx.check_cancelled()?;
            let name = unique_server_name(&self.name, &taken);
            let server = cloud
                .create_server(CreateServerRequest {
                    zone: self.zone.clone(),
                    name: name.clone(),
                    commercial_type: self.commercial_type.clone(),
                    image_id: image_id.clone(),
                    tags: self.tags.clone(),
                    root_volume_size_gb: self.volume_size,
                })
                .await?;
            info!(server = %name, id = %server.id, group = %self.name, "created server");
            bootstrap_server(cloud, &self.zone, &server.id, user_data.clone(), ctx.cancellation()).await?;
            taken.push(name);
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
        let user_data = match &self.user_data {
            Some(_) => Some(self.user_data_bytes().await?),
            None => None,
        };
        for index in 0..self.count {
            let name = format!("{}-{index}", self.name);
            target.render_resource("scaleway_instance_ip", &name, json!({ "zone": self.zone }))?;

            let mut body = json!({
                "name": name,
                "zone": self.zone,
                "type": self.commercial_type,
                "image": self.image,
                "tags": self.tags,
                "ip_id": TerraformTarget::reference("scaleway_instance_ip", &name, "id"),
                "enable_dynamic_ip": true,
                "replace_on_type_change": false,
            });
            if let Some(data) = &user_data {
                let file = target.add_file_resource("scaleway_instance_server", &name, "user_data", data.clone());
                body["user_data"] = json!({ USER_DATA_KEY: file });
            }
            if let Some(size) = self.volume_size {
                body["root_volume"] = json!({ "size_in_gb": size });
            }
            target.render_resource("scaleway_instance_server", &name, body)?;
        }
        Ok(())
    }

    async fn find_deletions(&self, ctx: &ScwContext) -> Result<Vec<Box<dyn Deletion<ScwCloudHandle>>>> {
        let mut servers = self.group_servers(ctx).await?;
        let surplus = servers.len().saturating_sub(self.count.max(0) as usize);
        if surplus == 0 {
            return Ok(Vec::new());
        }
        // Stale servers go first, then the highest indexes.
        servers.sort_by_key(|s| (!s.tags.iter().any(|t| t == TAG_NEEDS_UPDATE), std::cmp::Reverse(s.name.clone())));
        Ok(servers
            .into_iter()
            .take(surplus)
            .map(|s| -> Box<dyn Deletion<ScwCloudHandle>> {
                Box::new(ServerDeletion {
                    zone: s.zone,
                    id: s.id,
                    name: s.name,
                })
            })
            .collect())
    }
}

/// A surplus server
pub struct ServerDeletion {
    zone: String,
    id: String,
    name: String,
}

impl fmt::Debug for ServerDeletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerDeletion({}/{})", self.zone, self.id)
    }
}

#[async_trait]
impl Deletion<ScwCloudHandle> for ServerDeletion {
    fn task_kind(&self) -> &str {
        "Instance"
    }

    fn item(&self) -> String {
        format!("server {} ({})", self.name, self.id)
    }

    async fn delete(&self, ctx: &ScwContext) -> Result<()> {
        ctx.cloud().delete_server(&self.zone, &self.id).await
    }
}
