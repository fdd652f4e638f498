//! VPC holding the cluster's private networks

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use keel_common::{Error, Result};
use keel_tasks::{Changes, DeltaTask, Lifecycle, Output, TerraformTarget};

use super::IMMUTABLE_FIELDS;
use crate::scaleway::{ScwCloudHandle, ScwContext, TaggedResource};

/// A VPC
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcTask {
    /// VPC name
    pub name: String,
    /// Backend ID
    pub id: Output<String>,
    /// Region
    pub region: String,
    /// Tags
    pub tags: Vec<String>,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl DeltaTask<ScwCloudHandle> for VpcTask {
    const KIND: &'static str = "VPC";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let vpcs = ctx.cloud().list_vpcs(&self.region, &self.name).await?;
        let Some(vpc) = vpcs.into_iter().next() else {
            return Ok(None);
        };
        self.id.set(vpc.id.clone());
        Ok(Some(Self {
            name: vpc.name,
            id: Output::with_value(vpc.id),
            region: vpc.region,
            tags: vpc.tags,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, IMMUTABLE_FIELDS),
            None if self.name.is_empty() => Err(Error::required_field("Name")),
            None if self.region.is_empty() => Err(Error::required_field("Region")),
            None => Ok(()),
        }
    }

    async fn render_api(&self, ctx: &ScwContext, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        let cloud = ctx.cloud();
        match actual {
            None => {
                let vpc = cloud.create_vpc(&self.region, &self.name, self.tags.clone()).await?;
                self.id.set(vpc.id);
            }
            Some(actual) => {
                if changes.has("tags") {
                    let id = actual.id.get().unwrap_or_default();
                    debug!(vpc = %id, "updating tags");
                    cloud
                        .set_tags(TaggedResource::Vpc, &self.region, &id, self.tags.clone())
                        .await?;
                }
            }
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
        target.render_resource(
            "scaleway_vpc",
            &self.name,
            json!({ "name": self.name, "region": self.region, "tags": self.tags }),
        )
    }
}
