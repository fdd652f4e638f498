//! Attachment of a private network to the public gateway

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use keel_common::{Error, Result};
use keel_tasks::{Changes, DeltaTask, Lifecycle, Output, TaskKey, TaskRef, TerraformTarget};

use super::IMMUTABLE_FIELDS;
use crate::scaleway::{CreateGatewayNetworkRequest, ScwCloudHandle, ScwContext};

/// A gateway network
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayNetworkTask {
    /// Task name
    pub name: String,
    /// Backend ID
    pub id: Output<String>,
    /// Zone
    pub zone: String,
    /// Gateway
    pub gateway: TaskRef<String>,
    /// Private network
    pub private_network: TaskRef<String>,
    /// DHCP configuration served on the network
    pub dhcp: TaskRef<String>,
    /// NAT traffic leaving the network
    pub enable_masquerade: bool,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl GatewayNetworkTask {
    fn resolved(&self, reference: &TaskRef<String>) -> Result<String> {
        reference.get().ok_or_else(|| {
            Error::precondition(format!(
                "{} referenced by gateway network {} has no ID",
                reference.key(),
                self.name
            ))
        })
    }
}

#[async_trait]
impl DeltaTask<ScwCloudHandle> for GatewayNetworkTask {
    const KIND: &'static str = "GatewayNetwork";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn references(&self) -> Vec<TaskKey> {
        vec![
            self.gateway.key().clone(),
            self.private_network.key().clone(),
            self.dhcp.key().clone(),
        ]
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let (Some(gateway_id), Some(pn_id)) = (self.gateway.get(), self.private_network.get()) else {
            return Ok(None);
        };
        let networks = ctx.cloud().list_gateway_networks(&self.zone, &gateway_id).await?;
        let Some(gwn) = networks.into_iter().find(|n| n.private_network_id == pn_id) else {
            return Ok(None);
        };
        self.id.set(gwn.id.clone());
        Ok(Some(Self {
            name: self.name.clone(),
            id: Output::with_value(gwn.id),
            zone: gwn.zone,
            gateway: TaskRef::resolved(self.gateway.key().clone(), gwn.gateway_id),
            private_network: TaskRef::resolved(self.private_network.key().clone(), gwn.private_network_id),
            dhcp: match gwn.dhcp_id {
                Some(id) => TaskRef::resolved(self.dhcp.key().clone(), id),
                None => TaskRef::new(self.dhcp.key().clone(), &Output::new()),
            },
            enable_masquerade: gwn.enable_masquerade,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => {
                changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, IMMUTABLE_FIELDS)?;
                changes.reject_immutable(
                    <Self as DeltaTask<ScwCloudHandle>>::KIND,
                    &["gateway", "privateNetwork", "dhcp", "enableMasquerade"],
                )
            }
            None if self.zone.is_empty() => Err(Error::required_field("Zone")),
            None => Ok(()),
        }
    }

    async fn render_api(&self, ctx: &ScwContext, actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        if actual.is_some() {
            return Ok(());
        }
        let gwn = ctx
            .cloud()
            .create_gateway_network(CreateGatewayNetworkRequest {
                zone: self.zone.clone(),
                gateway_id: self.resolved(&self.gateway)?,
                private_network_id: self.resolved(&self.private_network)?,
                dhcp_id: Some(self.resolved(&self.dhcp)?),
                enable_masquerade: self.enable_masquerade,
            })
            .await?;
        self.id.set(gwn.id);
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
            "scaleway_vpc_gateway_network",
            &self.name,
            json!({
                "zone": self.zone,
                "gateway_id": TerraformTarget::reference("scaleway_vpc_public_gateway", &self.gateway.key().name, "id"),
                "private_network_id": TerraformTarget::reference(
                    "scaleway_vpc_private_network",
                    &self.private_network.key().name,
                    "id"
                ),
                "dhcp_id": TerraformTarget::reference("scaleway_vpc_public_gateway_dhcp", &self.dhcp.key().name, "id"),
                "enable_masquerade": self.enable_masquerade,
            }),
        )
    }
}
