//! DHCP configuration served by the public gateway

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use keel_common::{Error, Result};
use keel_tasks::{Changes, DeltaTask, Lifecycle, Output, TerraformTarget};

use super::IMMUTABLE_FIELDS;
use crate::scaleway::{ScwCloudHandle, ScwContext};

/// DHCP settings for one subnet
///
/// DHCP configurations carry no name, so the live object is matched on its
/// subnet.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DhcpConfigTask {
    /// Task name
    pub name: String,
    /// Backend ID
    pub id: Output<String>,
    /// Zone
    pub zone: String,
    /// Subnet leases are handed out from
    pub subnet: String,
    /// Gateway address inside the subnet
    pub address: Option<String>,
    /// Lifecycle
    #[serde(skip)]
    pub lifecycle: Lifecycle,
}

#[async_trait]
impl DeltaTask<ScwCloudHandle> for DhcpConfigTask {
    const KIND: &'static str = "DHCPConfig";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    async fn find(&self, ctx: &ScwContext) -> Result<Option<Self>> {
        let configs = ctx.cloud().list_dhcp_configs(&self.zone).await?;
        let Some(dhcp) = configs.into_iter().find(|d| d.subnet == self.subnet) else {
            return Ok(None);
        };
        self.id.set(dhcp.id.clone());
        Ok(Some(Self {
            name: self.name.clone(),
            id: Output::with_value(dhcp.id),
            zone: dhcp.zone,
            subnet: dhcp.subnet,
            address: dhcp.address,
            lifecycle: self.lifecycle,
        }))
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &Changes) -> Result<()> {
        match actual {
            Some(_) => {
                changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, IMMUTABLE_FIELDS)?;
                changes.reject_immutable(<Self as DeltaTask<ScwCloudHandle>>::KIND, &["address"])
            }
            None if self.subnet.is_empty() => Err(Error::required_field("Subnet")),
            None if self.zone.is_empty() => Err(Error::required_field("Zone")),
            None => Ok(()),
        }
    }

    async fn render_api(&self, ctx: &ScwContext, actual: Option<&Self>, _changes: &Changes) -> Result<()> {
        if actual.is_none() {
            let dhcp = ctx
                .cloud()
                .create_dhcp_config(&self.zone, &self.subnet, self.address.clone())
                .await?;
            self.id.set(dhcp.id);
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
        let mut body = json!({ "zone": self.zone, "subnet": self.subnet });
        if let Some(address) = &self.address {
            body["address"] = json!(address);
        }
        target.render_resource("scaleway_vpc_public_gateway_dhcp", &self.name, body)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::scaleway::tasks::test_support::api;
    use crate::scaleway::testing::FakeScwCloud;
    use crate::scaleway::ScwCloud;
    use keel_tasks::Task;

    fn dhcp(subnet: &str) -> DhcpConfigTask {
        DhcpConfigTask {
            name: "demo.example.com".into(),
            id: Output::new(),
            zone: "fr-par-1".into(),
            subnet: subnet.into(),
            address: None,
            lifecycle: Lifecycle::Sync,
        }
    }

    #[tokio::test]
    async fn matched_on_subnet() {
        let cloud = Arc::new(FakeScwCloud::default());
        let existing = cloud.create_dhcp_config("fr-par-1", "192.168.1.0/24", None).await.unwrap();
        cloud.create_dhcp_config("fr-par-1", "10.0.0.0/24", None).await.unwrap();

        let task = dhcp("192.168.1.0/24");
        Task::run(&task, &api(&cloud)).await.unwrap();
        assert_eq!(task.id.get(), Some(existing.id));
        assert_eq!(cloud.call_count("create_dhcp_config"), 2);

        Task::run(&dhcp("172.16.0.0/24"), &api(&cloud)).await.unwrap();
        assert_eq!(cloud.call_count("create_dhcp_config"), 3);
    }
}
