//! Stories for the task runner: ordering, outputs, retries, lifecycles and
//! the three render targets, driven against an in-memory cloud.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use keel_common::api::{Cluster, ClusterSpec};
use keel_tasks::{
    ApiTarget, Changes, Context, Deletion, DeltaTask, DryRunTarget, Lifecycle, Output,
    RunnerConfig, TaskKey, TaskMapBuilder, TaskRef, TaskRunner, TerraformTarget, WorkQueueConfig,
    MAX_CONCURRENCY,
};
use keel_vfs::backends::memfs::MemFsContext;
use keel_vfs::{Path, VfsPath};

// ==========================================================================
// In-memory cloud and tasks
// ==========================================================================

#[derive(Default)]
struct FakeCloud {
    objects: Mutex<BTreeMap<String, Value>>,
    calls: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, u32>>,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

type Cloud = Arc<FakeCloud>;

impl FakeCloud {
    fn get(&self, key: &str) -> Option<Value> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) {
        self.calls.lock().unwrap().push(key.to_string());
        self.objects.lock().unwrap().insert(key.to_string(), value);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[derive(Clone, Debug, Serialize)]
struct Network {
    name: String,
    cidr: Option<String>,
    #[serde(skip)]
    id: Output<String>,
}

impl Network {
    fn new(name: &str, cidr: &str) -> Self {
        Self {
            name: name.into(),
            cidr: Some(cidr.into()),
            id: Output::new(),
        }
    }

    fn key(&self) -> TaskKey {
        TaskKey::new("Network", &self.name)
    }
}

#[async_trait]
impl DeltaTask<Cloud> for Network {
    const KIND: &'static str = "Network";

    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, ctx: &Context<Cloud>) -> keel_tasks::Result<Option<Self>> {
        let Some(stored) = ctx.cloud().get(&format!("network/{}", self.name)) else {
            return Ok(None);
        };
        let id = stored["id"].as_str().unwrap_or_default().to_string();
        self.id.set(id.clone());
        Ok(Some(Self {
            name: self.name.clone(),
            cidr: stored["cidr"].as_str().map(str::to_string),
            id: Output::with_value(id),
        }))
    }

    async fn render_api(&self, ctx: &Context<Cloud>, _a: Option<&Self>, _c: &Changes) -> keel_tasks::Result<()> {
        let id = format!("net-{}", self.name);
        ctx.cloud().put(
            &format!("network/{}", self.name),
            json!({ "id": id, "cidr": self.cidr }),
        );
        self.id.set(id);
        Ok(())
    }

    async fn render_terraform(
        &self,
        _ctx: &Context<Cloud>,
        target: &TerraformTarget,
        _a: Option<&Self>,
        _c: &Changes,
    ) -> keel_tasks::Result<()> {
        target.render_resource("fake_network", &self.name, json!({ "cidr": self.cidr }))?;
        self.id.set(TerraformTarget::reference("fake_network", &self.name, "id"));
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
struct Server {
    name: String,
    network: TaskRef<String>,
    size: Option<u32>,
    #[serde(skip)]
    lifecycle: Lifecycle,
}

impl Server {
    fn on(name: &str, network: &Network, size: u32) -> Self {
        Self {
            name: name.into(),
            network: TaskRef::new(network.key(), &network.id),
            size: Some(size),
            lifecycle: Lifecycle::Sync,
        }
    }
}

#[derive(Debug)]
struct DeleteObject {
    key: String,
}

#[async_trait]
impl Deletion<Cloud> for DeleteObject {
    fn task_kind(&self) -> &str {
        "Server"
    }

    fn item(&self) -> String {
        self.key.clone()
    }

    async fn delete(&self, ctx: &Context<Cloud>) -> keel_tasks::Result<()> {
        ctx.cloud().objects.lock().unwrap().remove(&self.key);
        Ok(())
    }
}

#[async_trait]
impl DeltaTask<Cloud> for Server {
    const KIND: &'static str = "Server";

    fn name(&self) -> &str {
        &self.name
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn references(&self) -> Vec<TaskKey> {
        vec![self.network.key().clone()]
    }

    async fn find(&self, ctx: &Context<Cloud>) -> keel_tasks::Result<Option<Self>> {
        let Some(stored) = ctx.cloud().get(&format!("server/{}", self.name)) else {
            return Ok(None);
        };
        Ok(Some(Self {
            name: self.name.clone(),
            network: TaskRef::resolved(
                self.network.key().clone(),
                stored["network"].as_str().unwrap_or_default().to_string(),
            ),
            size: stored["size"].as_u64().map(|s| s as u32),
            lifecycle: self.lifecycle,
        }))
    }

    async fn render_api(&self, ctx: &Context<Cloud>, _a: Option<&Self>, _c: &Changes) -> keel_tasks::Result<()> {
        let network = self
            .network
            .get()
            .ok_or_else(|| keel_tasks::Error::try_again_later("network id not known"))?;
        ctx.cloud().put(
            &format!("server/{}", self.name),
            json!({ "network": network, "size": self.size }),
        );
        Ok(())
    }

    async fn render_terraform(
        &self,
        _ctx: &Context<Cloud>,
        target: &TerraformTarget,
        _a: Option<&Self>,
        _c: &Changes,
    ) -> keel_tasks::Result<()> {
        target.render_resource(
            "fake_server",
            &self.name,
            json!({ "network_id": self.network.get(), "size": self.size }),
        )
    }

    async fn find_deletions(&self, ctx: &Context<Cloud>) -> keel_tasks::Result<Vec<Box<dyn Deletion<Cloud>>>> {
        let prefix = format!("server/{}-old", self.name);
        Ok(ctx
            .cloud()
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .map(|k| Box::new(DeleteObject { key: k.clone() }) as Box<dyn Deletion<Cloud>>)
            .collect())
    }
}

/// Asks to be retried `failures` times before succeeding
#[derive(Clone, Debug, Serialize)]
struct Flaky {
    name: String,
    failures: u32,
}

#[async_trait]
impl DeltaTask<Cloud> for Flaky {
    const KIND: &'static str = "Flaky";

    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, ctx: &Context<Cloud>) -> keel_tasks::Result<Option<Self>> {
        Ok(ctx
            .cloud()
            .get(&format!("flaky/{}", self.name))
            .map(|_| self.clone()))
    }

    async fn render_api(&self, ctx: &Context<Cloud>, _a: Option<&Self>, _c: &Changes) -> keel_tasks::Result<()> {
        let attempt = {
            let mut attempts = ctx.cloud().attempts.lock().unwrap();
            let n = attempts.entry(self.name.clone()).or_insert(0);
            *n += 1;
            *n
        };
        if attempt <= self.failures {
            return Err(keel_tasks::Error::try_again_later("not ready"));
        }
        ctx.cloud().put(&format!("flaky/{}", self.name), json!({}));
        Ok(())
    }
}

/// Holds a slot for a while so overlapping runs can be counted
#[derive(Clone, Debug, Serialize)]
struct Slow {
    name: String,
}

#[async_trait]
impl DeltaTask<Cloud> for Slow {
    const KIND: &'static str = "Slow";

    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, _ctx: &Context<Cloud>) -> keel_tasks::Result<Option<Self>> {
        Ok(None)
    }

    async fn render_api(&self, ctx: &Context<Cloud>, _a: Option<&Self>, _c: &Changes) -> keel_tasks::Result<()> {
        let cloud = ctx.cloud();
        let now = cloud.running.fetch_add(1, Ordering::SeqCst) + 1;
        cloud.peak_running.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        cloud.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn slow_tasks(count: usize) -> TaskMapBuilder<Cloud> {
    let mut builder = TaskMapBuilder::new();
    for i in 0..count {
        builder.add(Slow { name: format!("slow-{i:02}") }).unwrap();
    }
    builder
}

fn cluster() -> Arc<Cluster> {
    Arc::new(Cluster::new("demo.k8s.local", ClusterSpec::default()))
}

fn api_context(cloud: &Cloud) -> Context<Cloud> {
    Context::new(cloud.clone(), Arc::new(ApiTarget::new()), cluster())
}

fn network_and_servers() -> TaskMapBuilder<Cloud> {
    let network = Network::new("main", "10.0.0.0/16");
    let mut builder = TaskMapBuilder::new();
    builder.add(Server::on("nodes", &network, 2)).unwrap();
    builder.add(Server::on("control-plane", &network, 1)).unwrap();
    builder.add(network).unwrap();
    builder
}

// ==========================================================================
// Ordering and outputs
// ==========================================================================

/// Story: dependencies run first and their outputs reach dependents
#[tokio::test]
async fn story_dependencies_run_first_and_outputs_flow() {
    let cloud = Cloud::default();
    let tasks = network_and_servers().build();

    TaskRunner::default()
        .run(&tasks, &api_context(&cloud))
        .await
        .unwrap();

    assert_eq!(
        cloud.calls(),
        vec!["network/main", "server/control-plane", "server/nodes"]
    );
    assert_eq!(cloud.get("server/nodes").unwrap()["network"], json!("net-main"));
}

/// Story: a second run over an unchanged cloud plans nothing
#[tokio::test]
async fn story_converged_cloud_plans_no_changes() {
    let cloud = Cloud::default();
    TaskRunner::default()
        .run(&network_and_servers().build(), &api_context(&cloud))
        .await
        .unwrap();

    let dry_run = Arc::new(DryRunTarget::new(true));
    let ctx = Context::new(cloud.clone(), dry_run.clone(), cluster());
    TaskRunner::default()
        .run(&network_and_servers().build(), &ctx)
        .await
        .unwrap();
    assert!(dry_run.has_no_changes(), "{}", dry_run.report());
}

/// Story: a dry run against an empty cloud lists every create in key order
#[tokio::test]
async fn story_dry_run_lists_creates_without_touching_the_cloud() {
    let cloud = Cloud::default();
    let dry_run = Arc::new(DryRunTarget::new(true));
    let ctx = Context::new(cloud.clone(), dry_run.clone(), cluster());
    TaskRunner::default()
        .run(&network_and_servers().build(), &ctx)
        .await
        .unwrap();

    let keys: Vec<String> = dry_run.changes().iter().map(|c| c.key.to_string()).collect();
    assert_eq!(
        keys,
        vec!["Network/main", "Server/control-plane", "Server/nodes"]
    );
    assert!(cloud.calls().is_empty());
}

/// Story: concurrent layers produce the same result as sequential ones
#[tokio::test]
async fn story_concurrent_layers_keep_dependency_order() {
    let cloud = Cloud::default();
    let runner = TaskRunner::new(RunnerConfig {
        max_concurrency: 4,
        ..Default::default()
    });
    runner
        .run(&network_and_servers().build(), &api_context(&cloud))
        .await
        .unwrap();
    assert_eq!(cloud.calls()[0], "network/main");
    assert_eq!(cloud.calls().len(), 3);
}

/// Story: a wide layer never runs more than the concurrency cap at once
#[tokio::test(start_paused = true)]
async fn story_concurrency_is_capped_within_a_layer() {
    let cloud = Cloud::default();
    let runner = TaskRunner::new(RunnerConfig {
        max_concurrency: 64,
        ..Default::default()
    });
    assert_eq!(runner.concurrency(), MAX_CONCURRENCY);

    runner.run(&slow_tasks(32).build(), &api_context(&cloud)).await.unwrap();
    let peak = cloud.peak_running.load(Ordering::SeqCst);
    assert!(peak <= MAX_CONCURRENCY, "peak {peak} exceeds {MAX_CONCURRENCY}");
    assert!(peak > 1, "wide layer ran sequentially");
}

/// Story: the default runner runs one task at a time
#[tokio::test(start_paused = true)]
async fn story_default_runner_is_sequential() {
    let cloud = Cloud::default();
    let runner = TaskRunner::default();
    assert_eq!(runner.concurrency(), 1);

    runner.run(&slow_tasks(6).build(), &api_context(&cloud)).await.unwrap();
    assert_eq!(cloud.peak_running.load(Ordering::SeqCst), 1);

    let zero = TaskRunner::new(RunnerConfig {
        max_concurrency: 0,
        ..Default::default()
    });
    assert_eq!(zero.concurrency(), 1);
}

// ==========================================================================
// Failures and retries
// ==========================================================================

/// Story: a task that asks to be retried eventually completes
#[tokio::test(start_paused = true)]
async fn story_try_again_later_is_requeued() {
    let cloud = Cloud::default();
    let mut builder = TaskMapBuilder::new();
    builder
        .add(Flaky {
            name: "lb".into(),
            failures: 3,
        })
        .unwrap();

    TaskRunner::default()
        .run(&builder.build(), &api_context(&cloud))
        .await
        .unwrap();
    assert_eq!(cloud.attempts.lock().unwrap()["lb"], 4);
}

/// Story: a task that never settles fails the run once retries run out
#[tokio::test(start_paused = true)]
async fn story_retries_are_bounded() {
    let cloud = Cloud::default();
    let mut builder = TaskMapBuilder::new();
    builder
        .add(Flaky {
            name: "stuck".into(),
            failures: u32::MAX,
        })
        .unwrap();
    let runner = TaskRunner::new(RunnerConfig {
        queue: WorkQueueConfig {
            max_retries: 2,
            ..Default::default()
        },
        ..Default::default()
    });

    let err = runner
        .run(&builder.build(), &api_context(&cloud))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Flaky/stuck"), "{err}");
    assert_eq!(cloud.attempts.lock().unwrap()["stuck"], 3);
}

/// Story: conflicting tasks under one key are rejected, identical ones collapse
#[test]
fn story_duplicate_tasks() {
    let network = Network::new("main", "10.0.0.0/16");
    let mut builder: TaskMapBuilder<Cloud> = TaskMapBuilder::new();
    builder.add(network.clone()).unwrap();
    builder.add(Network::new("main", "10.0.0.0/16")).unwrap();
    assert_eq!(builder.len(), 1);

    let err = builder.add(Network::new("main", "10.1.0.0/16")).unwrap_err();
    assert!(err.to_string().contains("Network/main"));
}

/// Story: a reference to a task that was never added fails before anything runs
#[tokio::test]
async fn story_unknown_reference_fails_fast() {
    let cloud = Cloud::default();
    let orphan_network = Network::new("missing", "10.0.0.0/16");
    let mut builder = TaskMapBuilder::new();
    builder.add(Server::on("nodes", &orphan_network, 1)).unwrap();

    let err = TaskRunner::default()
        .run(&builder.build(), &api_context(&cloud))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown task Network/missing"), "{err}");
    assert!(cloud.calls().is_empty());
}

/// Story: cancelling the run stops dispatch
#[tokio::test]
async fn story_cancelled_run_stops() {
    let cloud = Cloud::default();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = api_context(&cloud).with_cancellation(cancel);
    let err = TaskRunner::default()
        .run(&network_and_servers().build(), &ctx)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cancelled"), "{err}");
    assert!(cloud.calls().is_empty());
}

/// Story: a slow task is bounded by the per-task timeout
#[tokio::test(start_paused = true)]
async fn story_task_timeout() {
    #[derive(Clone, Debug, Serialize)]
    struct Slow {
        name: String,
    }

    #[async_trait]
    impl DeltaTask<Cloud> for Slow {
        const KIND: &'static str = "Slow";
        fn name(&self) -> &str {
            &self.name
        }
        async fn find(&self, _ctx: &Context<Cloud>) -> keel_tasks::Result<Option<Self>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
        async fn render_api(&self, _ctx: &Context<Cloud>, _a: Option<&Self>, _c: &Changes) -> keel_tasks::Result<()> {
            Ok(())
        }
    }

    let cloud = Cloud::default();
    let mut builder = TaskMapBuilder::new();
    builder.add(Slow { name: "s".into() }).unwrap();
    let runner = TaskRunner::new(RunnerConfig {
        task_timeout: Some(Duration::from_secs(60)),
        ..Default::default()
    });
    let err = runner
        .run(&builder.build(), &api_context(&cloud))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timed out waiting for task Slow/s"), "{err}");
}

// ==========================================================================
// Lifecycles and deletions
// ==========================================================================

/// Story: lifecycle overrides by kind change what the runner does
#[tokio::test]
async fn story_lifecycle_overrides() {
    let cloud = Cloud::default();

    let ctx = api_context(&cloud).with_lifecycle_overrides(BTreeMap::from([(
        "Server".to_string(),
        Lifecycle::Ignore,
    )]));
    TaskRunner::default()
        .run(&network_and_servers().build(), &ctx)
        .await
        .unwrap();
    assert_eq!(cloud.calls(), vec!["network/main"]);

    let ctx = api_context(&cloud).with_lifecycle_overrides(BTreeMap::from([(
        "Server".to_string(),
        Lifecycle::ExistsAndValidates,
    )]));
    let err = TaskRunner::default()
        .run(&network_and_servers().build(), &ctx)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("was not found"), "{err}");
}

/// Story: an existing object that differs is left alone under ExistsAndWarnIfChanges
#[tokio::test]
async fn story_warn_if_changes_leaves_object_alone() {
    let cloud = Cloud::default();
    TaskRunner::default()
        .run(&network_and_servers().build(), &api_context(&cloud))
        .await
        .unwrap();

    let network = Network::new("main", "10.0.0.0/16");
    let mut resized = Server::on("nodes", &network, 5);
    resized.lifecycle = Lifecycle::ExistsAndWarnIfChanges;
    let mut builder = TaskMapBuilder::new();
    builder.add(network).unwrap();
    builder.add(resized).unwrap();

    TaskRunner::default()
        .run(&builder.build(), &api_context(&cloud))
        .await
        .unwrap();
    assert_eq!(cloud.get("server/nodes").unwrap()["size"], json!(2));
}

/// Story: surplus objects are deleted by the API target and reported by dry run
#[tokio::test]
async fn story_deletions() {
    let cloud = Cloud::default();
    cloud.put("server/nodes-old-1", json!({}));

    let dry_run = Arc::new(DryRunTarget::new(true));
    let ctx = Context::new(cloud.clone(), dry_run.clone(), cluster());
    TaskRunner::default()
        .run(&network_and_servers().build(), &ctx)
        .await
        .unwrap();
    assert_eq!(dry_run.deletions().len(), 1);
    assert!(dry_run.report().contains("server/nodes-old-1"));
    assert!(cloud.get("server/nodes-old-1").is_some());

    TaskRunner::default()
        .run(&network_and_servers().build(), &api_context(&cloud))
        .await
        .unwrap();
    assert!(cloud.get("server/nodes-old-1").is_none());
}

// ==========================================================================
// Terraform
// ==========================================================================

/// Story: the terraform target renders references between resources
#[tokio::test]
async fn story_terraform_output_references_dependencies() {
    let cloud = Cloud::default();
    let fs = Arc::new(MemFsContext::default());
    let out: VfsPath = Arc::new(fs.path("out/terraform"));
    let target = Arc::new(TerraformTarget::new(out));
    let ctx = Context::new(cloud.clone(), target, cluster());

    TaskRunner::default()
        .run(&network_and_servers().build(), &ctx)
        .await
        .unwrap();

    let doc: Value = serde_json::from_slice(
        &fs.path("out/terraform/kubernetes.tf.json").read_file().await.unwrap(),
    )
    .unwrap();
    assert_eq!(
        doc["resource"]["fake_server"]["nodes"]["network_id"],
        json!("${fake_network.main.id}")
    );
    assert!(cloud.calls().is_empty());
}
