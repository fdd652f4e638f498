//! Stories for the Scaleway model: a cluster document and its instance
//! groups turned into tasks and reconciled against an in-memory Scaleway.

use std::sync::Arc;

use keel_assets::AssetBuilder;
use keel_cloud::scaleway::testing::FakeScwCloud;
use keel_cloud::scaleway::tasks::USER_DATA_KEY;
use keel_cloud::scaleway::{ScwCloudHandle, ServerState, TAG_NEEDS_UPDATE};
use keel_common::api::{
    Cluster, ClusterSpec, ClusterSubnetSpec, CloudProviderId, ContainerdConfig, InstanceGroup,
    InstanceGroupRole, InstanceGroupSpec, LoadBalancerAccessSpec, NetworkingSpec, SubnetType,
};
use keel_model::scaleway::model_builders;
use keel_model::{build_tasks, BootstrapScriptBuilder, ModelBuilderContext};
use keel_tasks::{ApiTarget, Context, DryRunTarget, Target, TaskMap, TaskRunner};
use keel_vfs::backends::memfs::MemFsContext;
use keel_vfs::{VfsClients, VfsConfig, VfsContext};

const CLUSTER: &str = "demo.example.com";
const ZONE: &str = "fr-par-1";

// ==========================================================================
// Fixtures
// ==========================================================================

fn cluster_spec() -> ClusterSpec {
    ClusterSpec {
        cloud_provider: Some(CloudProviderId::Scaleway),
        kubernetes_version: Some("1.26.0".into()),
        dns_zone: Some("example.com".into()),
        networking: NetworkingSpec {
            network_cidr: Some("192.168.1.0/24".into()),
            subnets: vec![ClusterSubnetSpec {
                name: ZONE.into(),
                zone: Some(ZONE.into()),
                subnet_type: SubnetType::Private,
                ..Default::default()
            }],
            ..Default::default()
        },
        ..Default::default()
    }
}

fn group(name: &str, role: InstanceGroupRole, min_size: i32) -> InstanceGroup {
    InstanceGroup::new(
        name,
        InstanceGroupSpec {
            role,
            min_size: Some(min_size),
            max_size: Some(min_size),
            machine_type: Some("DEV1-M".into()),
            image: Some("ubuntu_jammy".into()),
            zones: vec![ZONE.into()],
            ..Default::default()
        },
    )
}

fn model(spec: ClusterSpec) -> (Arc<Cluster>, TaskMap<ScwCloudHandle>) {
    let cluster = Arc::new(Cluster::new(CLUSTER, spec));
    let ctx = ModelBuilderContext::new(
        cluster.clone(),
        vec![
            group("control-plane-fr-par-1", InstanceGroupRole::ControlPlane, 1),
            group("nodes-fr-par-1", InstanceGroupRole::Node, 2),
        ],
    );

    let vfs = VfsContext::new(VfsConfig::default(), VfsClients::default())
        .with_memfs(Arc::new(MemFsContext::default()));
    let assets = AssetBuilder::for_cluster(Arc::new(vfs), &cluster).unwrap();
    let bootstrap = Arc::new(BootstrapScriptBuilder::new(Arc::new(assets)));

    let tasks = build_tasks(&ctx, &model_builders(bootstrap)).unwrap();
    (cluster, tasks)
}

fn cloud() -> Arc<FakeScwCloud> {
    Arc::new(FakeScwCloud::new(ZONE).with_image("ubuntu_jammy", "img-jammy"))
}

fn context(cloud: &Arc<FakeScwCloud>, cluster: Arc<Cluster>, target: Arc<dyn Target>) -> Context<ScwCloudHandle> {
    let handle: ScwCloudHandle = cloud.clone();
    Context::new(handle, target, cluster)
}

async fn apply(cloud: &Arc<FakeScwCloud>, spec: ClusterSpec) {
    let (cluster, tasks) = model(spec);
    let ctx = context(cloud, cluster, Arc::new(ApiTarget::new()));
    TaskRunner::default().run(&tasks, &ctx).await.unwrap();
}

// ==========================================================================
// Stories
// ==========================================================================

/// Story: the model covers the network, servers and DNS of the cluster
#[test]
fn story_model_lists_every_object() {
    let (_, tasks) = model(cluster_spec());
    let keys: Vec<String> = tasks.keys().map(|k| k.to_string()).collect();
    assert_eq!(
        keys,
        vec![
            "DHCPConfig/demo.example.com",
            "DNSRecord/api.demo.example.com",
            "DNSRecord/api.internal.demo.example.com",
            "DNSRecord/kops-controller.internal.demo.example.com",
            "Gateway/demo.example.com",
            "GatewayNetwork/demo.example.com",
            "Instance/control-plane-fr-par-1",
            "Instance/nodes-fr-par-1",
            "PrivateNIC/control-plane-fr-par-1",
            "PrivateNetwork/demo.example.com",
            "VPC/demo.example.com",
        ]
    );
}

/// Story: a load balancer fronts the API and replaces its public record
#[test]
fn story_load_balancer_model() {
    let mut spec = cluster_spec();
    spec.api.load_balancer = Some(LoadBalancerAccessSpec::default());
    let (_, tasks) = model(spec);
    let keys: Vec<String> = tasks.keys().map(|k| k.to_string()).collect();
    assert!(keys.contains(&"LoadBalancer/api-demo-example-com".to_string()));
    assert!(!keys.contains(&"DNSRecord/api.demo.example.com".to_string()));
}

/// Story: an empty project is brought up from the model
#[tokio::test]
async fn story_cluster_comes_up() {
    let cloud = cloud();
    apply(&cloud, cluster_spec()).await;

    let servers = cloud.servers();
    assert_eq!(servers.len(), 3);
    assert!(servers.iter().all(|s| s.state == ServerState::Running));

    let control_plane = servers
        .iter()
        .find(|s| s.name == "control-plane-fr-par-1-0")
        .unwrap();
    assert_eq!(control_plane.private_network_ids.len(), 1);

    let script = cloud.user_data(&control_plane.id, USER_DATA_KEY).unwrap();
    let script = String::from_utf8(script).unwrap();
    assert!(script.starts_with("#!/bin/bash"));
    assert!(script.contains("instanceGroupName: control-plane-fr-par-1"));
    assert!(script.contains("/release/v1.26.0/bin/linux/amd64/kubelet"));

    let kops_controller: Vec<String> = cloud
        .dns_records("example.com")
        .into_iter()
        .filter(|r| r.name == "kops-controller.internal.demo")
        .map(|r| r.data)
        .collect();
    assert_eq!(kops_controller, vec![control_plane.private_ip.clone().unwrap()]);
    assert_eq!(cloud.gateway_networks().len(), 1);
}

/// Story: reconciling an unchanged cluster plans nothing
#[tokio::test]
async fn story_unchanged_cluster_is_converged() {
    let cloud = cloud();
    apply(&cloud, cluster_spec()).await;

    let (cluster, tasks) = model(cluster_spec());
    let dry_run = Arc::new(DryRunTarget::new(true));
    let ctx = context(&cloud, cluster, dry_run.clone());
    TaskRunner::default().run(&tasks, &ctx).await.unwrap();
    assert!(dry_run.has_no_changes(), "{}", dry_run.report());
}

/// Story: changing node configuration marks existing servers for replacement
#[tokio::test]
async fn story_configuration_change_marks_servers() {
    let cloud = cloud();
    apply(&cloud, cluster_spec()).await;

    let mut changed = cluster_spec();
    changed.containerd = Some(ContainerdConfig {
        version: Some("1.7.13".into()),
        ..Default::default()
    });

    let (cluster, tasks) = model(changed.clone());
    let dry_run = Arc::new(DryRunTarget::new(true));
    let ctx = context(&cloud, cluster, dry_run.clone());
    TaskRunner::default().run(&tasks, &ctx).await.unwrap();
    let planned: Vec<String> = dry_run.changes().iter().map(|c| c.key.to_string()).collect();
    assert!(planned.contains(&"Instance/control-plane-fr-par-1".to_string()));
    assert!(planned.contains(&"Instance/nodes-fr-par-1".to_string()));

    apply(&cloud, changed).await;
    let servers = cloud.servers();
    assert_eq!(servers.len(), 3);
    assert!(servers.iter().all(|s| s.tags.iter().any(|t| t == TAG_NEEDS_UPDATE)));
    assert_eq!(cloud.call_count("create_server"), 3);
}
