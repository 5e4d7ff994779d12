use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A taint key/value/effect triple, as carried on `spec.taints`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: String,
}

/// A cluster node, reduced to the fields the reconciler cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub external_ip: Option<String>,
    pub taints: Vec<Taint>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub ready: bool,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl Node {
    /// The intersection of this node's taint keys with `deletion_taints`,
    /// materialized only when every configured key is present; a partial
    /// match does not count.
    pub fn deletion_taints<'a>(&self, deletion_taints: &'a [String]) -> Vec<&'a str> {
        let present: std::collections::HashSet<&str> =
            self.taints.iter().map(|t| t.key.as_str()).collect();
        if deletion_taints.iter().all(|k| present.contains(k.as_str())) {
            deletion_taints.iter().map(|s| s.as_str()).collect()
        } else {
            Vec::new()
        }
    }

    /// A node is `Departing` iff it carries every configured deletion
    /// taint key.
    pub fn is_departing(&self, deletion_taints: &[String]) -> bool {
        !self.deletion_taints(deletion_taints).is_empty()
    }

    /// A node is `Advertisable` iff it has a non-empty external IP and is
    /// not `Departing`. Readiness is recorded but never excludes a node.
    pub fn is_advertisable(&self, deletion_taints: &[String]) -> bool {
        self.has_external_ip() && !self.is_departing(deletion_taints)
    }

    /// Whether `external_ip` is present and non-empty. A node whose
    /// flannel annotation is set but blank must not count as having an IP.
    pub fn has_external_ip(&self) -> bool {
        self.external_ip.as_deref().is_some_and(|ip| !ip.is_empty())
    }
}

/// The observable node state. Any transition outside those in
/// `reconciler.rs`'s state table is a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Unknown,
    Advertisable,
    Departing,
    Gone,
}

/// Kinds of node-lifecycle events a watch stream can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEventKind {
    Added,
    Modified,
    Deleted,
}

/// A DNS intent sourced from a Kubernetes service's annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub service_namespace: String,
    pub service_name: String,
    pub hostname: String,
    pub ttl: u32,
    pub proxied: bool,
    pub enabled: bool,
}

impl Intent {
    pub const DEFAULT_TTL: u32 = 300;
}

/// A provider-side A record. Records are never mutated in place; a TTL
/// or proxy change is a delete followed by a create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub hostname: String,
    pub ip: String,
    pub ttl: u32,
    pub proxied: bool,
    pub zone_id: String,
    pub zone_name: String,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
}

/// Kinds recorded in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    NodeAdded,
    NodeBecameDeparting,
    NodeRemoved,
    NodeEventFailed,
}

/// A single entry in the bounded management event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub node_name: Option<String>,
    pub node_ip: Option<String>,
    pub intents_snapshot: Vec<Intent>,
    pub affected_records: Vec<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// The per-sweep summary of a `fullReconcile` pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub timestamp: DateTime<Utc>,
    pub nodes_checked: usize,
    pub nodes_departing: usize,
    pub intents_checked: usize,
    pub records_found: usize,
    pub records_created: usize,
    pub records_deleted: usize,
    /// Records left untouched because their IP was still valid.
    pub records_kept: usize,
    pub errors: Vec<String>,
    pub duration_seconds: f64,
}

/// Tri-state health, derived fresh from the two substrate health checks
/// on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub timestamp: DateTime<Utc>,
    pub node_source_healthy: bool,
    pub dns_provider_healthy: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

/// A live snapshot of one hostname's DNS records, as currently held by the
/// provider; unlike `HealthStatus`
/// this one does make provider calls, since its whole purpose is to report
/// provider truth rather than reconciler-computed intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostnameState {
    pub hostname: String,
    pub records: Vec<Record>,
}

/// A fixed-capacity ring buffer. Enforces its cap on append, not via a
/// periodic cleaner; pushing past capacity evicts the oldest
/// entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    cap: usize,
    items: VecDeque<T>,
}

impl<T> RingBuffer<T> {
    pub fn new(cap: usize) -> Self {
        assert!(cap > 0, "ring buffer capacity must be positive");
        Self {
            cap,
            items: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.cap {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The most recent `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<T>
    where
        T: Clone,
    {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }
}
