//! Private network inside the cluster VPC

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use keel_common::{Error, Result};
use keel_tasks::{Changes, DeltaTask, Lifecycle, Output, TaskKey, TaskRef, TerraformTarget};

use super::IMMUTABLE_FIELDS;
use crate::scaleway::{CreatePrivateNetworkRequest, ScwCloudHandle, ScwContext, TaggedResource};

/// A private network
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateNetworkTask {
    /// Network name
    pub name: String,
    /// Backend ID
    pub id: Output<String>,
    /// Region
    pub region: String,
    /// Owning VPC
    pub vpc: TaskRef<String>,
    /// IPv4 subnet, backend-assigned when unset
    pub ipv4_subnet: Option<String>,
    /// Tags
    pub tags: Vec<String>,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl DeltaTask<ScwCloudHandle> for PrivateNetworkTask {
    const KIND: &'static str = "PrivateNetwork";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn references(&self) -> Vec<TaskKey> {
        vec![self.vpc.key().clone()]
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let networks = ctx.cloud().list_private_networks(&self.region, &self.name).await?;
        let Some(pn) = networks.into_iter().next() else {
            return Ok(None);
        };
        self.id.set(pn.id.clone());
        Ok(Some(Self {
            name: pn.name,
            id: Output::with_value(pn.id),
            region: pn.region,
            vpc: TaskRef::resolved(self.vpc.key().clone(), pn.vpc_id),
            ipv4_subnet: pn.subnets.into_iter().next(),
            tags: pn.tags,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => {
                changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, IMMUTABLE_FIELDS)?;
                changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, &["vpc", "ipv4Subnet"])
            }
            None if self.name.is_empty() => Err(Error::required_field("Name")),
            None if self.region.is_empty() => Err(Error::required_field("Region")),
            None => Ok(()),
        }
    }

    async fn render_api(&self, ctx: &ScwContext, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        let cloud = ctx.cloud();
        match actual {
            None => {
                let vpc_id = self
                    .vpc
                    .get()
                    .ok_or_else(|| Error::precondition(format!("VPC of private network {} has no ID", self.name)))?;
                let pn = cloud
                    .create_private_network(CreatePrivateNetworkRequest {
                        region: self.region.clone(),
                        name: self.name.clone(),
                        vpc_id,
                        subnet: self.ipv4_subnet.clone(),
                        tags: self.tags.clone(),
                    })
                    .await?;
                self.id.set(pn.id);
            }
            Some(actual) if changes.has("tags") => {
                let id = actual.id.get().unwrap_or_default();
                cloud
                    .set_tags(TaggedResource::PrivateNetwork, &self.region, &id, self.tags.clone())
                    .await?;
            }
            Some(_) => {}
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
        let mut body = json!({
            "name": self.name,
            "region": self.region,
            "vpc_id": TerraformTarget::reference("scaleway_vpc", &self.vpc.key().name, "id"),
            "tags": self.tags,
        });
        if let Some(subnet) = &self.ipv4_subnet {
            body["ipv4_subnet"] = json!({ "subnet": subnet });
        }
        target.render_resource("scaleway_vpc_private_network", &self.name, body)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::scaleway::tasks::test_support::{api, dry_run};
    use crate::scaleway::tasks::VpcTask;
    use crate::scaleway::testing::FakeScwCloud;
    use keel_tasks::Task;

    fn stack() -> (VpcTask, PrivateNetworkTask) {
        let vpc = VpcTask {
            name: "demo".into(),
            id: Output::new(),
            region: "fr-par".into(),
            tags: vec![],
            lifecycle: Lifecycle::Sync,
        };
        let pn = PrivateNetworkTask {
            name: "demo".into(),
            id: Output::new(),
            region: "fr-par".into(),
            vpc: TaskRef::new(TaskKey::new("VPC", "demo"), &vpc.id),
            ipv4_subnet: Some("192.168.1.0/24".into()),
            tags: vec![],
            lifecycle: Lifecycle::Sync,
        };
        (vpc, pn)
    }

    #[tokio::test]
    async fn created_inside_the_vpc() {
        let cloud = Arc::new(FakeScwCloud::default());
        let ctx = api(&cloud);
        let (vpc, pn) = stack();
        assert_eq!(DeltaTask::<ScwCloudHandle>::references(&pn), vec![TaskKey::new("VPC", "demo")]);

        Task::run(&vpc, &ctx).await.unwrap();
        Task::run(&pn, &ctx).await.unwrap();
        assert!(pn.id.is_set());

        let (vpc, pn) = stack();
        let (ctx, target) = dry_run(&cloud);
        Task::run(&vpc, &ctx).await.unwrap();
        Task::run(&pn, &ctx).await.unwrap();
        assert!(target.has_no_changes());
    }

    #[tokio::test]
    async fn subnet_cannot_change() {
        let cloud = Arc::new(FakeScwCloud::default());
        let ctx = api(&cloud);
        let (vpc, pn) = stack();
        Task::run(&vpc, &ctx).await.unwrap();
        Task::run(&pn, &ctx).await.unwrap();

        let (vpc, mut pn) = stack();
        pn.ipv4_subnet = Some("10.0.0.0/24".into());
        Task::run(&vpc, &ctx).await.unwrap();
        let err = Task::run(&pn, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("PrivateNetwork.ipv4Subnet"));
    }
}
