use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Node as K8sNode;
use kube::{api::Api, runtime::watcher, Client, ResourceExt};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::model::{Node, NodeEventKind, Taint};

const FLANNEL_PUBLIC_IP_ANNOTATION: &str = "flannel.alpha.coreos.com/public-ip";

/// A single node lifecycle event delivered by a watch stream.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub node: Node,
}

/// Narrow capability interface onto "the place nodes live". The
/// reconciler only ever talks to this trait, never to `kube` directly;
/// the concrete transport is an implementation detail.
#[async_trait]
pub trait NodeSource: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// A stream of node events, pre-filtered to only the transitions
    /// relevant to DNS convergence. The stream is expected
    /// to reconnect internally on transient errors; it never terminates
    /// on its own.
    fn watch_nodes(&self) -> Pin<Box<dyn Stream<Item = NodeEvent> + Send>>;

    /// A lightweight liveness probe against the underlying API, distinct
    /// from `list_nodes`'s retry discipline.
    async fn health_check(&self) -> Result<bool>;
}

pub struct KubeNodeSource {
    client: Client,
    deletion_taints: Vec<String>,
    max_retries: usize,
    retry_delay: std::time::Duration,
}

impl KubeNodeSource {
    pub fn new(
        client: Client,
        deletion_taints: Vec<String>,
        max_retries: usize,
        retry_delay: std::time::Duration,
    ) -> Self {
        Self {
            client,
            deletion_taints,
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    fn api(&self) -> Api<K8sNode> {
        Api::all(self.client.clone())
    }
}

/// Translate a raw `k8s_openapi` node into the reconciler's reduced model.
pub fn extract_node(node: &K8sNode) -> Node {
    let name = node.name_any();
    let annotations: BTreeMap<String, String> = node
        .metadata
        .annotations
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();
    let labels: BTreeMap<String, String> = node
        .metadata
        .labels
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();

    let external_ip = node
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addrs| addrs.iter().find(|a| a.type_ == "ExternalIP"))
        .map(|a| a.address.clone())
        .or_else(|| annotations.get(FLANNEL_PUBLIC_IP_ANNOTATION).cloned())
        .filter(|ip| !ip.is_empty());

    let taints = node
        .spec
        .as_ref()
        .and_then(|s| s.taints.clone())
        .unwrap_or_default()
        .into_iter()
        .map(|t| Taint {
            key: t.key,
            value: t.value.unwrap_or_default(),
            effect: t.effect,
        })
        .collect();

    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    let creation_timestamp = node
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0);

    Node {
        name,
        external_ip,
        taints,
        labels,
        annotations,
        ready,
        creation_timestamp,
    }
}

/// Whether a watch transition should be propagated to the reconciler's
/// event-driven path.
fn should_propagate(
    kind: NodeEventKind,
    old: Option<&Node>,
    new: &Node,
    deletion_taints: &[String],
) -> bool {
    match kind {
        NodeEventKind::Added => new.is_departing(deletion_taints),
        NodeEventKind::Modified => {
            let was_departing = old.map(|o| o.is_departing(deletion_taints)).unwrap_or(false);
            !was_departing && new.is_departing(deletion_taints)
        }
        NodeEventKind::Deleted => old.map(|o| o.is_departing(deletion_taints)).unwrap_or(false),
    }
}

#[async_trait]
impl NodeSource for KubeNodeSource {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api = self.api();
        let strategy = FixedInterval::new(self.retry_delay).take(self.max_retries - 1);
        Retry::spawn(strategy, || async {
            let nodes = api.list(&Default::default()).await.map_err(Error::Kube)?;
            Ok(nodes.items.iter().map(extract_node).collect())
        })
        .await
    }

    fn watch_nodes(&self) -> Pin<Box<dyn Stream<Item = NodeEvent> + Send>> {
        Box::pin(watch_events(self.api(), self.deletion_taints.clone()))
    }

    async fn health_check(&self) -> Result<bool> {
        self.api()
            .list(&kube::api::ListParams::default().limit(1))
            .await
            .map(|_| true)
            .map_err(Error::Kube)
    }
}

/// Drives the raw `watcher::Event` stream, reconnecting with a 5-second
/// back-off on transient errors indefinitely, and emits
/// only the transitions `should_propagate` allows through.
fn watch_events(
    api: Api<K8sNode>,
    deletion_taints: Vec<String>,
) -> impl Stream<Item = NodeEvent> + Send {
    async_stream::stream! {
        let mut cache: std::collections::HashMap<String, Node> = std::collections::HashMap::new();
        let mut backoff = tokio::time::Duration::from_secs(5);
        loop {
            let mut stream = Box::pin(watcher(api.clone(), watcher::Config::default()));
            loop {
                match stream.next().await {
                    Some(Ok(watcher::Event::Apply(obj))) | Some(Ok(watcher::Event::InitApply(obj))) => {
                        // `InitApply` delivers the object set that already existed when this
                        // watch connected; seed `cache` from it the same way a steady-state
                        // `Apply` would, so a node present at connect time is `Modified` (not
                        // misclassified `Added`) the first time it actually changes.
                        let node = extract_node(&obj);
                        let old = cache.get(&node.name).cloned();
                        let kind = if old.is_some() { NodeEventKind::Modified } else { NodeEventKind::Added };
                        let propagate = should_propagate(kind, old.as_ref(), &node, &deletion_taints);
                        cache.insert(node.name.clone(), node.clone());
                        if propagate {
                            yield NodeEvent { kind, node };
                        }
                    }
                    Some(Ok(watcher::Event::Delete(obj))) => {
                        let node = extract_node(&obj);
                        let old = cache.remove(&node.name);
                        if should_propagate(NodeEventKind::Deleted, old.as_ref(), &node, &deletion_taints) {
                            yield NodeEvent { kind: NodeEventKind::Deleted, node };
                        }
                    }
                    Some(Ok(watcher::Event::Init)) | Some(Ok(watcher::Event::InitDone)) => {}
                    Some(Err(e)) => {
                        warn!("node watch error: {:?}, backing off {:?}", e, backoff);
                        crate::metrics::WATCH_RECONNECTS_TOTAL.inc();
                        tokio::time::sleep(backoff).await;
                        break;
                    }
                    None => {
                        error!("node watch stream ended unexpectedly, reconnecting");
                        crate::metrics::WATCH_RECONNECTS_TOTAL.inc();
                        tokio::time::sleep(backoff).await;
                        break;
                    }
                }
            }
            debug!("reconnecting node watch stream");
        }
    }
}
