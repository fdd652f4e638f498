//! Stories for Scaleway node identity: a node builds a token from its own
//! metadata and the controller checks it against the servers it can see.

use std::sync::Arc;

use async_trait::async_trait;

use keel_bootstrap::scaleway::{InstanceMetadata, Location, ScwAuthenticator, ScwMetadata, ScwVerifier};
use keel_bootstrap::{Authenticator, ChainVerifier, Verifier, VerifyError};
use keel_cloud::scaleway::testing::FakeScwCloud;
use keel_cloud::scaleway::{cluster_tag, instance_group_tag, Server, ServerState};
use keel_cloud::ScwCloudHandle;

const CLUSTER: &str = "demo.example.com";
const ZONE: &str = "fr-par-1";

// ==========================================================================
// Fixtures
// ==========================================================================

/// Metadata of a fixed server
struct StaticMetadata(InstanceMetadata);

#[async_trait]
impl ScwMetadata for StaticMetadata {
    async fn instance(&self) -> keel_common::Result<InstanceMetadata> {
        Ok(self.0.clone())
    }
}

fn metadata_of(server: &Server) -> Arc<dyn ScwMetadata> {
    Arc::new(StaticMetadata(InstanceMetadata {
        id: server.id.clone(),
        name: server.name.clone(),
        location: Location {
            zone_id: server.zone.clone(),
        },
        tags: server.tags.clone(),
        private_ip: server.private_ip.clone(),
    }))
}

fn server(id: &str, name: &str, group: &str, private_ip: Option<&str>) -> Server {
    Server {
        id: id.into(),
        name: name.into(),
        zone: ZONE.into(),
        commercial_type: "DEV1-M".into(),
        tags: vec![cluster_tag(CLUSTER), instance_group_tag(group)],
        state: ServerState::Running,
        private_ip: private_ip.map(String::from),
        ..Default::default()
    }
}

struct Fixture {
    control_plane: Server,
    cloud: ScwCloudHandle,
}

fn fixture() -> Fixture {
    let cloud = Arc::new(FakeScwCloud::new(ZONE));
    let control_plane = server("srv-cp", "control-plane-fr-par-1-0", "control-plane-fr-par-1", Some("10.0.0.2"));
    cloud.insert_server(control_plane.clone());
    cloud.insert_server(server("srv-node", "nodes-fr-par-1-0", "nodes-fr-par-1", Some("10.0.0.3")));
    cloud.insert_server(server("srv-bare", "nodes-fr-par-1-1", "nodes-fr-par-1", None));
    Fixture { control_plane, cloud }
}

impl Fixture {
    fn verifier(&self) -> ScwVerifier {
        ScwVerifier::new(self.cloud.clone(), metadata_of(&self.control_plane), CLUSTER)
    }

    async fn token_of(&self, id: &str) -> String {
        let node = Server {
            id: id.into(),
            zone: ZONE.into(),
            ..Default::default()
        };
        ScwAuthenticator::new(metadata_of(&node))
            .create_token(b"{}")
            .await
            .unwrap()
    }
}

// ==========================================================================
// Stories
// ==========================================================================

/// Story: a node's token is accepted and identifies its instance group
#[tokio::test]
async fn story_node_joins_the_cluster() {
    let fixture = fixture();
    let token = fixture.token_of("srv-node").await;

    let result = fixture.verifier().verify_token(&token, b"{}").await.unwrap();
    assert_eq!(result.node_name, "nodes-fr-par-1-0");
    assert_eq!(result.instance_group_name, "nodes-fr-par-1");
    assert_eq!(result.certificate_names, vec!["10.0.0.3".to_string()]);
    assert_eq!(result.challenge_endpoint, "10.0.0.3:3987");
}

/// Story: a server without a private address cannot be challenged
#[tokio::test]
async fn story_server_without_private_ip_is_refused() {
    let fixture = fixture();
    let token = fixture.token_of("srv-bare").await;

    let err = fixture.verifier().verify_token(&token, b"{}").await.unwrap_err();
    assert!(matches!(err, VerifyError::Rejected(_)));
    assert!(err.to_string().contains("no private IP"));
}

/// Story: a token for a server that no longer exists is refused
#[tokio::test]
async fn story_deleted_server_is_refused() {
    let fixture = fixture();
    let token = fixture.token_of("srv-gone").await;

    let err = fixture.verifier().verify_token(&token, b"{}").await.unwrap_err();
    assert_eq!(err.to_string(), "server not found: srv-gone");
}

/// Story: a chain hands tokens to the verifier they were made for
#[tokio::test]
async fn story_chain_picks_the_scaleway_verifier() {
    let fixture = fixture();
    let chain = ChainVerifier::new(vec![Box::new(fixture.verifier())]);

    let token = fixture.token_of("srv-node").await;
    let result = chain.verify_token(&token, b"{}").await.unwrap();
    assert_eq!(result.instance_group_name, "nodes-fr-par-1");

    let err = chain.verify_token("Bearer abc", b"{}").await.unwrap_err();
    assert!(err.is_not_this_verifier());
}
