//! Public gateway giving private nodes egress and SSH bastion access

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use keel_common::{Error, Result};
use keel_tasks::{Changes, DeltaTask, Lifecycle, Output, TerraformTarget};

use super::IMMUTABLE_FIELDS;
use crate::scaleway::{CreateGatewayRequest, ScwCloudHandle, ScwContext, TaggedResource};

/// Default gateway offer
pub const DEFAULT_GATEWAY_TYPE: &str = "VPC-GW-S";

/// A public gateway
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTask {
    /// Gateway name
    pub name: String,
    /// Backend ID
    pub id: Output<String>,
    /// Zone
    pub zone: String,
    /// Offer type
    #[serde(rename = "type")]
    pub gateway_type: String,
    /// Expose the SSH bastion
    pub bastion_enabled: bool,
    /// Public address once created
    pub public_ip: Output<String>,
    /// Tags
    pub tags: Vec<String>,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl DeltaTask<ScwCloudHandle> for GatewayTask {
    const KIND: &'static str = "Gateway";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let gateways = ctx.cloud().list_gateways(&self.zone, &self.name).await?;
        let Some(gw) = gateways.into_iter().next() else {
            return Ok(None);
        };
        self.id.set(gw.id.clone());
        let public_ip = Output::new();
        if let Some(ip) = gw.public_ip {
            self.public_ip.set(ip.clone());
            public_ip.set(ip);
        }
        Ok(Some(Self {
            name: gw.name,
            id: Output::with_value(gw.id),
            zone: gw.zone,
            gateway_type: gw.gateway_type,
            bastion_enabled: gw.bastion_enabled,
            public_ip,
            tags: gw.tags,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => {
                changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, IMMUTABLE_FIELDS)?;
                changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, &["type", "bastionEnabled"])
            }
            None if self.name.is_empty() => Err(Error::required_field("Name")),
            None if self.zone.is_empty() => Err(Error::required_field("Zone")),
            None => Ok(()),
        }
    }

    async fn render_api(&self, ctx: &ScwContext, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        let cloud = ctx.cloud();
        match actual {
            None => {
                let gw = cloud
                    .create_gateway(CreateGatewayRequest {
                        zone: self.zone.clone(),
                        name: self.name.clone(),
                        gateway_type: self.gateway_type.clone(),
                        tags: self.tags.clone(),
                        bastion_enabled: self.bastion_enabled,
                    })
                    .await?;
                self.id.set(gw.id);
                if let Some(ip) = gw.public_ip {
                    self.public_ip.set(ip);
                }
            }
            Some(actual) if changes.has("tags") => {
                let id = actual.id.get().unwrap_or_default();
                cloud
                    .set_tags(TaggedResource::Gateway, &self.zone, &id, self.tags.clone())
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
        target.render_resource(
            "scaleway_vpc_public_gateway_ip",
            &self.name,
            json!({ "zone": self.zone, "tags": self.tags }),
        )?;
        target.render_resource(
            "scaleway_vpc_public_gateway",
            &self.name,
            json!({
                "name": self.name,
                "zone": self.zone,
                "type": self.gateway_type,
                "bastion_enabled": self.bastion_enabled,
                "ip_id": TerraformTarget::reference("scaleway_vpc_public_gateway_ip", &self.name, "id"),
                "tags": self.tags,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::scaleway::tasks::test_support::api;
    use crate::scaleway::testing::FakeScwCloud;
    use keel_tasks::Task;

    fn gateway(bastion: bool) -> GatewayTask {
        GatewayTask {
            name: "demo.example.com".into(),
            id: Output::new(),
            zone: "fr-par-1".into(),
            gateway_type: DEFAULT_GATEWAY_TYPE.into(),
            bastion_enabled: bastion,
            public_ip: Output::new(),
            tags: vec![],
            lifecycle: Lifecycle::Sync,
        }
    }

    #[tokio::test]
    async fn create_publishes_the_public_ip() {
        let cloud = Arc::new(FakeScwCloud::default());
        let task = gateway(true);
        Task::run(&task, &api(&cloud)).await.unwrap();
        assert!(task.public_ip.is_set());

        let again = gateway(true);
        Task::run(&again, &api(&cloud)).await.unwrap();
        assert_eq!(again.public_ip.get(), task.public_ip.get());
        assert_eq!(cloud.call_count("create_gateway"), 1);
    }

    #[tokio::test]
    async fn bastion_toggle_is_rejected() {
        let cloud = Arc::new(FakeScwCloud::default());
        Task::run(&gateway(true), &api(&cloud)).await.unwrap();
        let err = Task::run(&gateway(false), &api(&cloud)).await.unwrap_err();
        assert!(err.to_string().contains("Gateway.bastionEnabled"));
    }
}
