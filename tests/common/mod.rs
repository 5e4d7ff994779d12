//! Deterministic fakes for the three capability traits (`NodeSource`,
//! `DnsProvider`, `IntentSource`). This crate has no live cluster or
//! CloudFlare account to exercise in CI, so the scenario tests in
//! `scenario_tests.rs` drive these in-memory fakes instead.

use std::collections::BTreeMap as Map;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use futures::Stream;
use node_dns_controller::dns_provider::{DnsProvider, HostnameSyncResult, ProviderHealth};
use node_dns_controller::error::{Error, Result};
use node_dns_controller::intent_source::IntentSource;
use node_dns_controller::model::{Intent, Node, Record, Taint};
use node_dns_controller::node_source::{NodeEvent, NodeSource};

pub fn deletion_taints() -> Vec<String> {
    vec![
        "DeletionCandidateOfClusterAutoscaler".to_string(),
        "ToBeDeletedByClusterAutoscaler".to_string(),
    ]
}

pub fn taint(key: &str) -> Taint {
    Taint {
        key: key.to_string(),
        value: String::new(),
        effect: "NoSchedule".to_string(),
    }
}

pub fn node(name: &str, ip: Option<&str>, taints: Vec<Taint>) -> Node {
    Node {
        name: name.to_string(),
        external_ip: ip.map(str::to_string),
        taints,
        labels: Map::new(),
        annotations: Map::new(),
        ready: true,
        creation_timestamp: None,
    }
}

pub fn intent(hostname: &str, ttl: u32, proxied: bool) -> Intent {
    Intent {
        service_namespace: "default".to_string(),
        service_name: "web".to_string(),
        hostname: hostname.to_string(),
        ttl,
        proxied,
        enabled: true,
    }
}

/// A `NodeSource` backed by a plain in-memory `Vec<Node>`, mutable between
/// reconcile calls so a test can simulate a node's lifecycle over time.
pub struct FakeNodeSource {
    pub nodes: Mutex<Vec<Node>>,
    pub fail_list: bool,
}

impl FakeNodeSource {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes: Mutex::new(nodes), fail_list: false }
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        *self.nodes.lock().unwrap() = nodes;
    }
}

#[async_trait]
impl NodeSource for FakeNodeSource {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        if self.fail_list {
            return Err(Error::Config("simulated list failure".into()));
        }
        Ok(self.nodes.lock().unwrap().clone())
    }

    fn watch_nodes(&self) -> Pin<Box<dyn Stream<Item = NodeEvent> + Send>> {
        Box::pin(futures::stream::empty())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.fail_list)
    }
}

/// A `DnsProvider` backed by a plain in-memory `hostname -> Vec<Record>`
/// map. `fail_hostnames` lets a test force every delete against a given
/// hostname to fail, to exercise the "partial failure is non-fatal"
/// behavior.
pub struct FakeDnsProvider {
    pub records: Mutex<Map<String, Vec<Record>>>,
    pub fail_deletes_for: Mutex<Vec<String>>,
}

impl FakeDnsProvider {
    pub fn new() -> Self {
        Self { records: Mutex::new(Map::new()), fail_deletes_for: Mutex::new(Vec::new()) }
    }

    pub fn fail_deletes_for(&self, hostname: &str) {
        self.fail_deletes_for.lock().unwrap().push(hostname.to_string());
    }

    fn deletes_fail(&self, hostname: &str) -> bool {
        self.fail_deletes_for.lock().unwrap().iter().any(|h| h == hostname)
    }

    pub fn record_count(&self, hostname: &str) -> usize {
        self.records.lock().unwrap().get(hostname).map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl DnsProvider for FakeDnsProvider {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn resolve_zone(&self, _hostname: &str) -> Result<String> {
        Ok("Z1".to_string())
    }

    async fn list_records(&self, hostname: &str) -> Result<Vec<Record>> {
        Ok(self.records.lock().unwrap().get(hostname).cloned().unwrap_or_default())
    }

    async fn create_record(&self, hostname: &str, ip: &str, ttl: u32, proxied: bool) -> Result<Record> {
        let record = Record {
            id: uuid::Uuid::new_v4().to_string(),
            hostname: hostname.to_string(),
            ip: ip.to_string(),
            ttl,
            proxied,
            zone_id: "Z1".to_string(),
            zone_name: "example.com".to_string(),
            created_on: Utc::now(),
            modified_on: Utc::now(),
        };
        self.records.lock().unwrap().entry(hostname.to_string()).or_default().push(record.clone());
        Ok(record)
    }

    async fn delete_record(&self, record_id: &str, _zone_id: &str) -> Result<()> {
        for records in self.records.lock().unwrap().values_mut() {
            records.retain(|r| r.id != record_id);
        }
        Ok(())
    }

    async fn delete_records_by_ip(&self, hostname: &str, ip: &str) -> Result<Vec<String>> {
        if self.deletes_fail(hostname) {
            return Err(Error::CloudflareApi { status: 403, message: "forbidden".into() });
        }
        let mut guard = self.records.lock().unwrap();
        let entry = guard.entry(hostname.to_string()).or_default();
        let (removed, kept): (Vec<_>, Vec<_>) = entry.drain(..).partition(|r| r.ip == ip);
        *entry = kept;
        Ok(removed.into_iter().map(|r| r.id).collect())
    }

    async fn sync_hostname(&self, hostname: &str, valid_ips: &[String]) -> Result<HostnameSyncResult> {
        let mut guard = self.records.lock().unwrap();
        let entry = guard.entry(hostname.to_string()).or_default();
        let mut result = HostnameSyncResult::default();

        if self.deletes_fail(hostname) {
            result.kept = entry.iter().filter(|r| valid_ips.contains(&r.ip)).count();
            result.errors = entry
                .iter()
                .filter(|r| !valid_ips.contains(&r.ip))
                .map(|r| format!("{hostname}: failed to delete {}: forbidden", r.id))
                .collect();
            return Ok(result);
        }

        let (kept, removed): (Vec<_>, Vec<_>) = entry.drain(..).partition(|r| valid_ips.contains(&r.ip));
        result.kept = kept.len();
        result.deleted = removed.iter().map(|r| r.id.clone()).collect();
        *entry = kept;
        Ok(result)
    }

    async fn health_check(&self) -> Result<ProviderHealth> {
        Ok(ProviderHealth { healthy: true, zone_count: 1, error: None })
    }
}

pub struct FakeIntentSource {
    pub intents: Mutex<Vec<Intent>>,
}

impl FakeIntentSource {
    pub fn new(intents: Vec<Intent>) -> Self {
        Self { intents: Mutex::new(intents) }
    }
}

#[async_trait]
impl IntentSource for FakeIntentSource {
    async fn list_intents(&self) -> Result<Vec<Intent>> {
        Ok(self.intents.lock().unwrap().clone())
    }
}
