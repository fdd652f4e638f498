//! Load balancer in front of the API servers

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use keel_common::{Error, Result};
use keel_tasks::{Changes, DeltaTask, Lifecycle, Output, TaskKey, TaskRef, TerraformTarget};

use super::IMMUTABLE_FIELDS;
use crate::scaleway::{CreateLoadBalancerRequest, ScwCloudHandle, ScwContext, TaggedResource};

/// Default load balancer offer
pub const DEFAULT_LB_TYPE: &str = "LB-S";

/// A load balancer
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerTask {
    /// Load balancer name
    pub name: String,
    /// Backend ID
    pub id: Output<String>,
    /// Zone
    pub zone: String,
    /// Offer type
    #[serde(rename = "type")]
    pub lb_type: String,
    /// Description
    pub description: String,
    /// Tags
    pub tags: Vec<String>,
    /// Addresses once created
    pub addresses: Output<Vec<String>>,
    /// Private network the backends are reached through
    pub private_network: Option<TaskRef<String>>,
    /// Clients use this load balancer's address as the API endpoint
    #[serde(skip)]
    pub for_api_server: bool,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

impl LoadBalancerTask {
    /// First address, once known
    pub fn address(&self) -> Option<String> {
        self.addresses.get().and_then(|a| a.into_iter().next())
    }
}

#[async_trait]
impl DeltaTask<ScwCloudHandle> for LoadBalancerTask {
    const KIND: &'static str = "LoadBalancer";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn references(&self) -> Vec<TaskKey> {
        self.private_network.iter().map(|pn| pn.key().clone()).collect()
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let lbs = ctx.cloud().list_load_balancers(&self.zone, &self.name).await?;
        let Some(lb) = lbs.into_iter().next() else {
            return Ok(None);
        };
        self.id.set(lb.id.clone());
        self.addresses.set(lb.ip_addresses.clone());
        let private_network = match (&self.private_network, lb.private_network_ids.into_iter().next()) {
            (Some(pn), Some(id)) => Some(TaskRef::resolved(pn.key().clone(), id)),
            _ => None,
        };
        Ok(Some(Self {
            name: lb.name,
            id: Output::with_value(lb.id),
            zone: lb.zone,
            lb_type: lb.lb_type,
            description: lb.description,
            tags: lb.tags,
            addresses: Output::with_value(lb.ip_addresses),
            private_network,
            for_api_server: self.for_api_server,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => {
                changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, IMMUTABLE_FIELDS)?;
                changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, &["type", "privateNetwork"])
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
                let private_network_id = match &self.private_network {
                    Some(pn) => Some(pn.get().ok_or_else(|| {
                        Error::precondition(format!("private network of load balancer {} has no ID", self.name))
                    })?),
                    None => None,
                };
                let lb = cloud
                    .create_load_balancer(CreateLoadBalancerRequest {
                        zone: self.zone.clone(),
                        name: self.name.clone(),
                        description: self.description.clone(),
                        lb_type: self.lb_type.clone(),
                        tags: self.tags.clone(),
                        private_network_id,
                    })
                    .await?;
                self.id.set(lb.id);
                self.addresses.set(lb.ip_addresses);
            }
            Some(actual) if changes.has("tags") => {
                let id = actual.id.get().unwrap_or_default();
                cloud
                    .set_tags(TaggedResource::LoadBalancer, &self.zone, &id, self.tags.clone())
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
        target.render_resource("scaleway_lb_ip", &self.name, json!({ "zone": self.zone }))?;
        let mut body = json!({
            "name": self.name,
            "zone": self.zone,
            "type": self.lb_type,
            "description": self.description,
            "tags": self.tags,
            "ip_ids": [TerraformTarget::reference("scaleway_lb_ip", &self.name, "id")],
        });
        if let Some(pn) = &self.private_network {
            body["private_network"] = json!([{
                "private_network_id": TerraformTarget::reference("scaleway_vpc_private_network", &pn.key().name, "id"),
                "dhcp_config": true,
            }]);
        }
        target.render_resource("scaleway_lb", &self.name, body)?;
        if self.for_api_server {
            target.add_output(
                "api_lb_address",
                json!(TerraformTarget::reference("scaleway_lb_ip", &self.name, "ip_address")),
            );
        }
        Ok(())
    }
}
