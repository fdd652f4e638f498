//! Tag conventions shared by every Scaleway object keel creates
//!
//! Scaleway tags are plain strings; keel writes `key=value` pairs.

use keel_common::api::InstanceGroupRole;
use keel_common::{TAG_CLUSTER_NAME, TAG_INSTANCE_GROUP, TAG_ROLE_PREFIX};

/// Marks servers whose configuration is stale
pub const TAG_NEEDS_UPDATE: &str = "kops.k8s.io/needs-update";

/// `kops.k8s.io/cluster=<name>`
pub fn cluster_tag(cluster_name: &str) -> String {
    format!("{TAG_CLUSTER_NAME}={cluster_name}")
}

/// `instance-group=<name>`
pub fn instance_group_tag(group: &str) -> String {
    format!("{TAG_INSTANCE_GROUP}={group}")
}

/// `k8s.io/role/<role>=1`
pub fn role_tag(role: InstanceGroupRole) -> String {
    format!("{TAG_ROLE_PREFIX}{}=1", role.tag_label())
}

fn tag_value<'a>(tags: &'a [String], key: &str) -> Option<&'a str> {
    tags.iter()
        .find_map(|t| t.strip_prefix(key)?.strip_prefix('='))
}

/// Cluster name from tags, empty when untagged
pub fn cluster_name_from_tags(tags: &[String]) -> String {
    tag_value(tags, TAG_CLUSTER_NAME).unwrap_or_default().to_string()
}

/// Instance group name from tags, empty when untagged
pub fn instance_group_from_tags(tags: &[String]) -> String {
    tag_value(tags, TAG_INSTANCE_GROUP).unwrap_or_default().to_string()
}

/// Role from tags
pub fn role_from_tags(tags: &[String]) -> Option<InstanceGroupRole> {
    tags.iter().find_map(|t| {
        let rest = t.strip_prefix(TAG_ROLE_PREFIX)?;
        let label = rest.split('=').next()?;
        InstanceGroupRole::from_tag_label(label)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        let tags = vec![
            cluster_tag("demo.k8s.local"),
            instance_group_tag("control-plane-fr-par-1"),
            role_tag(InstanceGroupRole::ControlPlane),
        ];
        assert_eq!(cluster_name_from_tags(&tags), "demo.k8s.local");
        assert_eq!(instance_group_from_tags(&tags), "control-plane-fr-par-1");
        assert_eq!(role_from_tags(&tags), Some(InstanceGroupRole::ControlPlane));
        assert_eq!(tags[2], "k8s.io/role/control-plane=1");
    }

    #[test]
    fn untagged_objects() {
        let tags = vec!["instance-groupie=x".to_string()];
        assert_eq!(instance_group_from_tags(&tags), "");
        assert_eq!(role_from_tags(&tags), None);
    }
}
