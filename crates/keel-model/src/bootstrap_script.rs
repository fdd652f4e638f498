//! Per-group bootstrap script handed to servers as user data
//!
//! The script downloads nodeup, writes the node configuration and runs
//! nodeup against it. Asset locations are resolved when the script is
//! rendered, so mirrors configured on the cluster apply.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use keel_assets::AssetBuilder;
use keel_common::api::{InstanceGroup, InstanceGroupRole};
use keel_common::hashing::Hash;
use keel_common::version::KubernetesVersion;
use keel_common::{Error, Result};
use keel_tasks::Resource;

use crate::context::ModelBuilderContext;

/// Port kops-controller serves node bootstrap on
pub const KOPS_CONTROLLER_PORT: u16 = 3988;

const DEFAULT_CONTAINER_RUNTIME: &str = "containerd";

/// Configuration nodeup reads on first boot
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeupConfig {
    /// Cluster the node joins
    pub cluster_name: String,
    /// Group the node belongs to
    pub instance_group_name: String,
    /// Role of the node
    pub instance_group_role: InstanceGroupRole,
    /// Kubelet version
    pub kubernetes_version: String,
    /// State store location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_base: Option<String>,
    /// API endpoint
    pub api_server: String,
    /// kops-controller endpoint
    pub kops_controller_server: String,
    /// Container runtime
    pub container_runtime: String,
    /// containerd version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containerd_version: Option<String>,
    /// Labels applied to the node
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_labels: BTreeMap<String, String>,
    /// `<sha256>@<url>` entries nodeup downloads
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<String>,
}

/// Renders [`BootstrapScript`]s for instance groups
#[derive(Clone, Debug)]
pub struct BootstrapScriptBuilder {
    assets: Arc<AssetBuilder>,
    nodeup: Option<(Url, Hash)>,
}

impl BootstrapScriptBuilder {
    /// Builder resolving downloads through `assets`
    pub fn new(assets: Arc<AssetBuilder>) -> Self {
        Self { assets, nodeup: None }
    }

    /// nodeup binary to download; without one the image must ship nodeup
    pub fn with_nodeup(mut self, url: Url, hash: Hash) -> Self {
        self.nodeup = Some((url, hash));
        self
    }

    /// Script for `ig`
    pub fn build(&self, ctx: &ModelBuilderContext, ig: &InstanceGroup) -> Result<Arc<BootstrapScript>> {
        let spec = &ctx.cluster().spec;
        let version = match (&spec.node_kubernetes_version, ig.has_api_server()) {
            (Some(node_version), false) => KubernetesVersion::parse(node_version)?,
            _ => ctx.cluster().kubernetes_version()?,
        };
        let kubelet = Url::parse(&format!(
            "https://dl.k8s.io/release/v{version}/bin/linux/amd64/kubelet"
        ))
        .map_err(|e| Error::invalid_input(format!("invalid kubelet url for {version}: {e}")))?;

        let config = NodeupConfig {
            cluster_name: ctx.cluster_name().to_string(),
            instance_group_name: ig.group_name().to_string(),
            instance_group_role: ig.spec.role,
            kubernetes_version: version.to_string(),
            config_base: spec.config_store.base.clone(),
            api_server: format!("https://{}", ctx.api_internal_name()),
            kops_controller_server: format!(
                "https://{}:{KOPS_CONTROLLER_PORT}",
                ctx.kops_controller_internal_name()
            ),
            container_runtime: spec
                .container_runtime
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTAINER_RUNTIME.to_string()),
            containerd_version: spec.containerd.as_ref().and_then(|c| c.version.clone()),
            node_labels: ig.spec.node_labels.clone(),
            assets: Vec::new(),
        };

        Ok(Arc::new(BootstrapScript {
            config,
            assets: self.assets.clone(),
            kubelet,
            nodeup: self.nodeup.clone(),
        }))
    }
}

/// User data for the servers of one group
pub struct BootstrapScript {
    config: NodeupConfig,
    assets: Arc<AssetBuilder>,
    kubelet: Url,
    nodeup: Option<(Url, Hash)>,
}

impl fmt::Debug for BootstrapScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BootstrapScript({})", self.config.instance_group_name)
    }
}

impl BootstrapScript {
    /// Node configuration before asset resolution
    pub fn config(&self) -> &NodeupConfig {
        &self.config
    }

    /// The full script
    pub async fn render(&self) -> Result<String> {
        let (kubelet_url, kubelet_hash) = self.assets.remap_file(&self.kubelet).await?;
        let mut config = self.config.clone();
        config.assets.push(format!("{}@{kubelet_url}", kubelet_hash.hex()));

        let (nodeup_url, nodeup_hash) = match &self.nodeup {
            Some((url, hash)) => (
                self.assets.remap_file_with_hash(url, hash.clone())?.to_string(),
                hash.hex(),
            ),
            None => (String::new(), String::new()),
        };

        let kube_env = serde_yaml::to_string(&config)
            .map_err(|e| Error::serialization_for("nodeup config", e.to_string()))?;

        let mut script = String::from(SCRIPT_HEADER);
        script.push_str(&format!("NODEUP_URL_AMD64={nodeup_url}\n"));
        script.push_str(&format!("NODEUP_HASH_AMD64={nodeup_hash}\n\n"));
        script.push_str(SCRIPT_FUNCTIONS);
        script.push_str("echo \"== nodeup node config starting ==\"\nensure-install-dir\n\n");
        script.push_str("cat > conf/kube_env.yaml << '__EOF_KUBE_ENV'\n");
        script.push_str(&kube_env);
        script.push_str("__EOF_KUBE_ENV\n\n");
        script.push_str("download-release\necho \"== nodeup node config done ==\"\n");
        Ok(script)
    }
}

#[async_trait]
impl Resource for BootstrapScript {
    async fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self.render().await?.into_bytes())
    }
}

const SCRIPT_HEADER: &str = "#!/bin/bash
set -o errexit
set -o nounset
set -o pipefail

";

const SCRIPT_FUNCTIONS: &str = r#"function ensure-install-dir() {
  INSTALL_DIR="/opt/kops"
  mkdir -p ${INSTALL_DIR}/bin
  mkdir -p ${INSTALL_DIR}/conf
  cd ${INSTALL_DIR}
}

function download-or-bust() {
  local -r file="$1"
  local -r hash="$2"
  local -r url="$3"

  for attempt in $(seq 1 5); do
    if curl -f --compressed -Lo "${file}" --connect-timeout 20 --retry 6 --retry-delay 10 "${url}"; then
      if echo "${hash}  ${file}" | sha256sum --check --status; then
        return 0
      fi
      echo "== hash mismatch for ${url} =="
      rm -f "${file}"
    fi
    sleep 10
  done
  echo "== failed to download ${url} =="
  exit 1
}

function download-release() {
  if [[ -n "${NODEUP_URL_AMD64}" ]]; then
    download-or-bust "${INSTALL_DIR}/bin/nodeup" "${NODEUP_HASH_AMD64}" "${NODEUP_URL_AMD64}"
    chmod +x "${INSTALL_DIR}/bin/nodeup"
  fi

  echo "Running nodeup"
  "${INSTALL_DIR}/bin/nodeup" --conf="${INSTALL_DIR}/conf/kube_env.yaml" --v=8
}

"#;
