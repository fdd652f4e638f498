//! Scaleway node identity
//!
//! Nodes present their server ID; the controller looks the server up in its
//! own zone and trusts the addresses and tags Scaleway reports for it.

pub mod metadata;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use keel_cloud::scaleway::config::region_of_zone;
use keel_cloud::scaleway::{cluster_name_from_tags, instance_group_from_tags};
use keel_cloud::ScwCloudHandle;

use crate::error::{Result, VerifyError};
use crate::verifier::{Authenticator, Verifier, VerifyResult, CHALLENGE_PORT};

pub use metadata::{HttpScwMetadata, InstanceMetadata, Location, ScwMetadata, METADATA_ENDPOINT};

/// Authorization prefix of Scaleway bootstrap tokens
pub const SCALEWAY_AUTHENTICATION_TOKEN_PREFIX: &str = "x-scaleway-instance-server-id ";

/// Verifies tokens of servers in the controller's zone
pub struct ScwVerifier {
    cloud: ScwCloudHandle,
    metadata: Arc<dyn ScwMetadata>,
    cluster_name: String,
    use_instance_id_for_node_name: bool,
}

impl ScwVerifier {
    /// Verifier admitting servers of `cluster_name`
    pub fn new(cloud: ScwCloudHandle, metadata: Arc<dyn ScwMetadata>, cluster_name: impl Into<String>) -> Self {
        Self {
            cloud,
            metadata,
            cluster_name: cluster_name.into(),
            use_instance_id_for_node_name: false,
        }
    }

    /// Name nodes after their server ID instead of their server name
    pub fn with_instance_id_for_node_name(mut self, enabled: bool) -> Self {
        self.use_instance_id_for_node_name = enabled;
        self
    }
}

#[async_trait]
impl Verifier for ScwVerifier {
    async fn verify_token(&self, token: &str, _body: &[u8]) -> Result<VerifyResult> {
        let server_id = token
            .strip_prefix(SCALEWAY_AUTHENTICATION_TOKEN_PREFIX)
            .ok_or(VerifyError::NotThisVerifier)?;
        if server_id.is_empty() {
            return Err(VerifyError::rejected("token carries no server ID"));
        }

        let local = self.metadata.instance().await?;
        let zone = local.zone();
        region_of_zone(zone)
            .map_err(|e| VerifyError::rejected(format!("unable to parse zone {zone:?} from metadata: {e}")))?;

        let server = self
            .cloud
            .get_server(zone, server_id)
            .await?
            .ok_or_else(|| VerifyError::UnknownServer(server_id.to_string()))?;

        let cluster = cluster_name_from_tags(&server.tags);
        if cluster != self.cluster_name {
            return Err(VerifyError::rejected(format!(
                "server {server_id} belongs to cluster {cluster:?}, not {:?}",
                self.cluster_name
            )));
        }
        let instance_group_name = instance_group_from_tags(&server.tags);
        if instance_group_name.is_empty() {
            return Err(VerifyError::rejected(format!("server {server_id} has no instance group tag")));
        }
        let private_ip = server
            .private_ip
            .clone()
            .ok_or_else(|| VerifyError::rejected(format!("server {server_id} has no private IP")))?;

        let mut certificate_names = vec![private_ip.clone()];
        certificate_names.extend(server.ipv6_address.clone());

        let node_name = if self.use_instance_id_for_node_name {
            server.id.clone()
        } else {
            server.name.clone()
        };
        info!(server = %server_id, node = %node_name, group = %instance_group_name, "verified bootstrap token");

        Ok(VerifyResult {
            node_name,
            instance_group_name,
            certificate_names,
            challenge_endpoint: format!("{private_ip}:{CHALLENGE_PORT}"),
        })
    }
}

/// Builds tokens from the local server ID
pub struct ScwAuthenticator {
    metadata: Arc<dyn ScwMetadata>,
}

impl ScwAuthenticator {
    /// Authenticator reading `metadata`
    pub fn new(metadata: Arc<dyn ScwMetadata>) -> Self {
        Self { metadata }
    }
}

#[async_trait]
impl Authenticator for ScwAuthenticator {
    async fn create_token(&self, _body: &[u8]) -> Result<String> {
        let instance = self.metadata.instance().await?;
        debug!(server = %instance.id, "creating bootstrap token");
        Ok(format!("{SCALEWAY_AUTHENTICATION_TOKEN_PREFIX}{}", instance.id))
    }
}

#[cfg(test)]
mod tests {
    use super::metadata::MockScwMetadata;
    use super::*;
    use keel_cloud::scaleway::testing::FakeScwCloud;
    use keel_cloud::scaleway::{cluster_tag, instance_group_tag, Server, ServerState};

    const CLUSTER: &str = "demo.example.com";

    fn metadata(zone: &'static str) -> Arc<dyn ScwMetadata> {
        let mut metadata = MockScwMetadata::new();
        metadata.expect_instance().returning(move || {
            Ok(InstanceMetadata {
                id: "srv-local".into(),
                name: "control-plane-fr-par-1-0".into(),
                location: Location { zone_id: zone.into() },
                ..Default::default()
            })
        });
        Arc::new(metadata)
    }

    fn server(id: &str, cluster: &str) -> Server {
        Server {
            id: id.into(),
            name: "nodes-fr-par-1-0".into(),
            zone: "fr-par-1".into(),
            tags: vec![cluster_tag(cluster), instance_group_tag("nodes-fr-par-1")],
            state: ServerState::Running,
            private_ip: Some("10.0.0.7".into()),
            ipv6_address: Some("2001:bc8::7".into()),
            ..Default::default()
        }
    }

    fn verifier(zone: &'static str) -> ScwVerifier {
        let cloud = Arc::new(FakeScwCloud::new("fr-par-1"));
        cloud.insert_server(server("srv-1", CLUSTER));
        cloud.insert_server(server("srv-2", "other.example.com"));
        ScwVerifier::new(cloud, metadata(zone), CLUSTER)
    }

    #[tokio::test]
    async fn known_server_is_verified() {
        let result = verifier("fr-par-1")
            .verify_token("x-scaleway-instance-server-id srv-1", b"{}")
            .await
            .unwrap();
        assert_eq!(
            result,
            VerifyResult {
                node_name: "nodes-fr-par-1-0".into(),
                instance_group_name: "nodes-fr-par-1".into(),
                certificate_names: vec!["10.0.0.7".into(), "2001:bc8::7".into()],
                challenge_endpoint: "10.0.0.7:3987".into(),
            }
        );
    }

    #[tokio::test]
    async fn node_name_can_be_the_server_id() {
        let result = verifier("fr-par-1")
            .with_instance_id_for_node_name(true)
            .verify_token("x-scaleway-instance-server-id srv-1", b"{}")
            .await
            .unwrap();
        assert_eq!(result.node_name, "srv-1");
    }

    #[tokio::test]
    async fn prefix_must_match_exactly() {
        let v = verifier("fr-par-1");
        for token in [
            "x-scaleway-instance-server-idsrv-1",
            "X-Scaleway-Instance-Server-Id srv-1",
            "x-aws-sts srv-1",
            "",
        ] {
            let err = v.verify_token(token, b"{}").await.unwrap_err();
            assert!(err.is_not_this_verifier(), "{token:?}: {err}");
        }
    }

    #[tokio::test]
    async fn unknown_servers_are_rejected() {
        let err = verifier("fr-par-1")
            .verify_token("x-scaleway-instance-server-id srv-9", b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::UnknownServer(id) if id == "srv-9"));
    }

    #[tokio::test]
    async fn servers_of_other_clusters_are_rejected() {
        let err = verifier("fr-par-1")
            .verify_token("x-scaleway-instance-server-id srv-2", b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Rejected(_)));
        assert!(err.to_string().contains("other.example.com"));
    }

    #[tokio::test]
    async fn unparseable_metadata_zone_is_rejected() {
        let err = verifier("nowhere")
            .verify_token("x-scaleway-instance-server-id srv-1", b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::Rejected(_)));
        assert!(err.to_string().contains("nowhere"));
    }

    #[tokio::test]
    async fn authenticator_prefixes_the_local_server_id() {
        let token = ScwAuthenticator::new(metadata("fr-par-1"))
            .create_token(b"{}")
            .await
            .unwrap();
        assert_eq!(token, "x-scaleway-instance-server-id srv-local");
    }
}
