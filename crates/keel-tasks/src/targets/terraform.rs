//! Renders tasks as a Terraform JSON configuration
//!
//! ```text
//! <out>/kubernetes.tf.json
//! <out>/data/<type>_<name>_<field>
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::info;

use keel_common::{Error, Result};
use keel_vfs::VfsPath;

use super::{Target, TargetKind};

/// Name of the generated configuration file
pub const TERRAFORM_FILE: &str = "kubernetes.tf.json";

/// Terraform resource names allow letters, digits, `_` and `-`, and must
/// not start with a digit
pub fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[derive(Default)]
struct TerraformState {
    resources: BTreeMap<String, BTreeMap<String, Value>>,
    outputs: BTreeMap<String, Value>,
    files: BTreeMap<String, Vec<u8>>,
}

/// Target that accumulates Terraform resources and writes them at finish
///
/// Terraform owns deletion, so deletions are never processed.
pub struct TerraformTarget {
    out_dir: VfsPath,
    state: Mutex<TerraformState>,
}

impl TerraformTarget {
    /// Target writing into `out_dir`
    pub fn new(out_dir: VfsPath) -> Self {
        Self {
            out_dir,
            state: Mutex::default(),
        }
    }

    /// Add a resource block
    pub fn render_resource(&self, resource_type: &str, name: &str, body: Value) -> Result<()> {
        let name = sanitize_name(name);
        let mut state = self.state.lock();
        let resources = state.resources.entry(resource_type.to_string()).or_default();
        if resources.contains_key(&name) {
            return Err(Error::invalid_input(format!(
                "duplicate terraform resource {resource_type}.{name}"
            )));
        }
        resources.insert(name, body);
        Ok(())
    }

    /// Add an output value
    pub fn add_output(&self, name: &str, value: Value) {
        self.state.lock().outputs.insert(name.to_string(), value);
    }

    /// Store a large blob as a file and return the expression that reads it
    pub fn add_file_resource(&self, resource_type: &str, name: &str, field: &str, data: Vec<u8>) -> String {
        let file = format!("{resource_type}_{}_{field}", sanitize_name(name));
        let expr = format!("${{file(\"${{path.module}}/data/{file}\")}}");
        self.state.lock().files.insert(file, data);
        expr
    }

    /// Interpolation expression for an attribute of another resource
    pub fn reference(resource_type: &str, name: &str, attribute: &str) -> String {
        format!("${{{resource_type}.{}.{attribute}}}", sanitize_name(name))
    }

    /// The configuration document as it stands
    pub fn document(&self) -> Value {
        let state = self.state.lock();
        let mut doc = Map::new();
        if !state.resources.is_empty() {
            doc.insert("resource".to_string(), json!(state.resources));
        }
        if !state.outputs.is_empty() {
            let outputs: BTreeMap<&String, Value> = state
                .outputs
                .iter()
                .map(|(k, v)| (k, json!({ "value": v })))
                .collect();
            doc.insert("output".to_string(), json!(outputs));
        }
        Value::Object(doc)
    }
}

#[async_trait]
impl Target for TerraformTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::Terraform
    }

    fn process_deletions(&self) -> bool {
        false
    }

    async fn finish(&self) -> Result<()> {
        let mut rendered = serde_json::to_vec_pretty(&self.document())?;
        rendered.push(b'\n');
        let files: Vec<(String, Vec<u8>)> = self
            .state
            .lock()
            .files
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (name, data) in &files {
            self.out_dir.join(&["data", name]).write_file(data, None).await?;
        }
        self.out_dir
            .join(&[TERRAFORM_FILE])
            .write_file(&rendered, None)
            .await?;
        info!(out = %self.out_dir.path(), files = files.len(), "wrote terraform configuration");
        Ok(())
    }

    fn as_terraform(&self) -> Option<&TerraformTarget> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_vfs::backends::memfs::MemFsContext;
    use std::sync::Arc;

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("nodes.demo.k8s.local"), "nodes-demo-k8s-local");
        assert_eq!(sanitize_name("1-control-plane"), "_1-control-plane");
    }

    #[test]
    fn duplicate_resources_are_rejected() {
        let ctx = Arc::new(MemFsContext::default());
        let target = TerraformTarget::new(Arc::new(ctx.path("out")));
        target.render_resource("scaleway_lb", "api", json!({})).unwrap();
        assert!(target.render_resource("scaleway_lb", "api", json!({})).is_err());
    }

    #[tokio::test]
    async fn finish_writes_config_and_data_files() {
        let ctx = Arc::new(MemFsContext::default());
        let target = TerraformTarget::new(Arc::new(ctx.path("out")));
        let user_data = target.add_file_resource("scaleway_instance_server", "nodes", "user_data", b"#!/bin/bash".to_vec());
        target
            .render_resource("scaleway_instance_server", "nodes", json!({ "user_data": { "cloud-init": user_data } }))
            .unwrap();
        target.add_output("cluster_name", json!("demo.k8s.local"));
        target.finish().await.unwrap();

        let doc: Value = serde_json::from_slice(
            &keel_vfs::Path::read_file(&ctx.path("out/kubernetes.tf.json")).await.unwrap(),
        )
        .unwrap();
        assert_eq!(
            doc["resource"]["scaleway_instance_server"]["nodes"]["user_data"]["cloud-init"],
            json!("${file(\"${path.module}/data/scaleway_instance_server_nodes_user_data\")}")
        );
        assert_eq!(doc["output"]["cluster_name"]["value"], json!("demo.k8s.local"));
        let data = keel_vfs::Path::read_file(&ctx.path("out/data/scaleway_instance_server_nodes_user_data"))
            .await
            .unwrap();
        assert_eq!(data, b"#!/bin/bash");
    }
}
