use keel_common::api::{CloudConfiguration, CloudProviderId, ClusterSpec, CsiDriverSpec};
use keel_common::Result;

use crate::builder::SpecOptionsBuilder;

/// Storage class and CSI driver defaults
#[derive(Debug, Default)]
pub struct CsiDriverOptionsBuilder;

impl SpecOptionsBuilder for CsiDriverOptionsBuilder {
    fn name(&self) -> &'static str {
        "csi-driver"
    }

    fn build_options(&self, spec: &mut ClusterSpec) -> Result<()> {
        let has_driver = matches!(spec.cloud_provider, Some(cloud) if cloud != CloudProviderId::Metal);
        let config = spec.cloud_config.get_or_insert_with(CloudConfiguration::default);
        config.manage_storage_classes.get_or_insert(true);
        config
            .csi_driver
            .get_or_insert_with(CsiDriverSpec::default)
            .enabled
            .get_or_insert(has_driver);
        Ok(())
    }
}
