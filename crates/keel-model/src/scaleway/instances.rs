use std::sync::Arc;

use keel_cloud::scaleway::tasks::{Instance, PrivateNic};
use keel_cloud::scaleway::{instance_group_tag, role_tag};
use keel_cloud::ScwCloudHandle;
use keel_common::api::InstanceGroup;
use keel_common::{Error, Result};
use keel_tasks::{ResourceRef, TaskMapBuilder};

use super::{cluster_tags, private_network_ref};
use crate::bootstrap_script::BootstrapScriptBuilder;
use crate::builder::ModelBuilder;
use crate::context::ModelBuilderContext;

/// One server set per instance group, booted with the group's script
///
/// Control-plane groups also get their servers attached to the private
/// network.
#[derive(Clone, Debug)]
pub struct InstanceModelBuilder {
    bootstrap: Arc<BootstrapScriptBuilder>,
}

impl InstanceModelBuilder {
    /// Builder rendering user data with `bootstrap`
    pub fn new(bootstrap: Arc<BootstrapScriptBuilder>) -> Self {
        Self { bootstrap }
    }

    fn instance(&self, ctx: &ModelBuilderContext, ig: &InstanceGroup, zone: String) -> Result<Instance> {
        let name = ig.group_name();
        let required = |value: &Option<String>, field: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::invalid_field(field, format!("instance group {name} has no {field}")))
        };

        let mut tags = cluster_tags(ctx);
        tags.push(instance_group_tag(name));
        tags.push(role_tag(ig.spec.role));
        tags.extend(ig.spec.cloud_labels.iter().map(|(k, v)| format!("{k}={v}")));

        let user_data: ResourceRef = self.bootstrap.build(ctx, ig)?;
        Ok(Instance {
            name: name.to_string(),
            zone,
            role: Some(ig.spec.role),
            commercial_type: required(&ig.spec.machine_type, "spec.machineType")?,
            image: required(&ig.spec.image, "spec.image")?,
            tags,
            count: ig.min_size(),
            volume_size: ig.spec.root_volume_size,
            needs_update: Vec::new(),
            user_data: Some(user_data),
            lifecycle: ctx.lifecycle(),
        })
    }
}

impl ModelBuilder<ScwCloudHandle> for InstanceModelBuilder {
    fn name(&self) -> &'static str {
        "scaleway-instances"
    }

    fn build(&self, ctx: &ModelBuilderContext, tasks: &mut TaskMapBuilder<ScwCloudHandle>) -> Result<()> {
        for ig in ctx.instance_groups() {
            let zone = match ig.spec.zones.first() {
                Some(zone) => zone.clone(),
                None => ctx.primary_zone()?.to_string(),
            };
            let instance = self.instance(ctx, ig, zone.clone())?;

            if ig.is_control_plane() {
                let private_network = private_network_ref(ctx, tasks)?;
                tasks.add(PrivateNic {
                    name: instance.name.clone(),
                    zone,
                    private_network,
                    count: instance.count,
                    unattached: Vec::new(),
                    lifecycle: ctx.lifecycle(),
                })?;
            }
            tasks.add(instance)?;
        }
        Ok(())
    }
}
