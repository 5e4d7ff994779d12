use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dns_provider::DnsProvider;
use crate::intent_source::IntentSource;
use crate::metrics;
use crate::model::{EventKind, HealthState, HealthStatus, Intent, ManagementEvent, Node, NodeEventKind, RingBuffer, SyncReport};
use crate::node_source::{NodeEvent, NodeSource};

const EVENT_LOG_CAP: usize = 1000;
const REPORT_LOG_CAP: usize = 100;

/// The reconciliation engine: merges node state and DNS intent into a
/// desired record set, diffs it against provider truth, and converges.
/// Owns the event log, report log, and the reconcile mutex that lets the
/// watch stream and the periodic sweep share state without racing.
pub struct Reconciler {
    node_source: Arc<dyn NodeSource>,
    dns_provider: Arc<dyn DnsProvider>,
    intent_source: Arc<dyn IntentSource>,
    deletion_taints: Vec<String>,

    events: StdMutex<RingBuffer<ManagementEvent>>,
    reports: StdMutex<RingBuffer<SyncReport>>,
    last_sync: StdMutex<Option<chrono::DateTime<Utc>>>,

    reconcile_lock: AsyncMutex<()>,
    pending: AtomicBool,
}

impl Reconciler {
    pub fn new(
        node_source: Arc<dyn NodeSource>,
        dns_provider: Arc<dyn DnsProvider>,
        intent_source: Arc<dyn IntentSource>,
        deletion_taints: Vec<String>,
    ) -> Self {
        Self {
            node_source,
            dns_provider,
            intent_source,
            deletion_taints,
            events: StdMutex::new(RingBuffer::new(EVENT_LOG_CAP)),
            reports: StdMutex::new(RingBuffer::new(REPORT_LOG_CAP)),
            last_sync: StdMutex::new(None),
            reconcile_lock: AsyncMutex::new(()),
            pending: AtomicBool::new(false),
        }
    }

    // ---- event-driven path -------------------------------------------------

    /// Handle a single node lifecycle transition from the watch stream.
    /// Runs concurrently with `full_reconcile`; it only ever calls the DNS
    /// provider and appends to the event log, both independently
    /// synchronized, so it never blocks the reconcile mutex.
    pub async fn on_node_event(&self, event: NodeEvent) {
        let NodeEvent { kind, node } = event;

        if node.external_ip.is_none() {
            warn!(node = node.name.as_str(), "node event received without an external IP");
            self.record_event(
                EventKind::NodeEventFailed,
                Some(node.name.clone()),
                None,
                Vec::new(),
                Vec::new(),
                false,
                Some("node has no external IP".to_string()),
                BTreeMap::new(),
            );
            return;
        }

        match kind {
            NodeEventKind::Added => self.handle_added(node).await,
            NodeEventKind::Modified => {
                self.handle_withdrawal(node, EventKind::NodeBecameDeparting).await
            }
            NodeEventKind::Deleted => self.handle_withdrawal(node, EventKind::NodeRemoved).await,
        }
    }

    async fn handle_added(&self, node: Node) {
        let departing = node.is_departing(&self.deletion_taints);
        let intents = self.intent_source.list_intents().await.unwrap_or_default();

        if departing {
            info!(node = node.name.as_str(), "node added with full deletion taint set, skipping record creation");
        } else {
            info!(node = node.name.as_str(), "node added, periodic sweep will create its records");
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("departing".to_string(), departing.to_string());

        self.record_event(
            EventKind::NodeAdded,
            Some(node.name),
            node.external_ip,
            intents,
            Vec::new(),
            true,
            None,
            metadata,
        );
        metrics::NODE_TRANSITIONS_TOTAL
            .with_label_values(&[if departing { "departing" } else { "advertisable" }])
            .inc();
    }

    async fn handle_withdrawal(&self, node: Node, kind: EventKind) {
        let ip = match &node.external_ip {
            Some(ip) => ip.clone(),
            None => return,
        };
        let intents = self.intent_source.list_intents().await.unwrap_or_default();

        let mut affected = Vec::new();
        let mut had_error = false;
        for intent in &intents {
            match self.dns_provider.delete_records_by_ip(&intent.hostname, &ip).await {
                Ok(deleted) => affected.extend(deleted),
                Err(e) => {
                    had_error = true;
                    warn!(
                        hostname = intent.hostname.as_str(),
                        ip = ip.as_str(),
                        error = %e,
                        "failed to withdraw DNS records for node"
                    );
                }
            }
        }

        info!(
            node = node.name.as_str(),
            ip = ip.as_str(),
            records_deleted = affected.len(),
            "withdrew DNS records for node"
        );

        self.record_event(
            kind,
            Some(node.name),
            Some(ip),
            intents,
            affected,
            !had_error,
            None,
            BTreeMap::new(),
        );
        metrics::NODE_TRANSITIONS_TOTAL.with_label_values(&["gone"]).inc();
    }

    #[allow(clippy::too_many_arguments)]
    fn record_event(
        &self,
        kind: EventKind,
        node_name: Option<String>,
        node_ip: Option<String>,
        intents_snapshot: Vec<Intent>,
        affected_records: Vec<String>,
        success: bool,
        error_message: Option<String>,
        metadata: BTreeMap<String, String>,
    ) {
        let event = ManagementEvent {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            node_name,
            node_ip,
            intents_snapshot,
            affected_records,
            success,
            error_message,
            metadata,
        };
        self.events.lock().unwrap().push(event);
    }

    // ---- periodic convergence ----------------------------------------------

    /// Run a full reconcile pass, or coalesce with one already in flight.
    /// At most one sweep is ever actually executing; a caller
    /// that arrives mid-sweep sets the pending flag and waits for the
    /// in-flight (plus any resulting follow-up) pass to finish, returning
    /// its report rather than racing a second one in.
    pub async fn full_reconcile(&self) -> SyncReport {
        match self.reconcile_lock.try_lock() {
            Ok(_guard) => loop {
                let report = self.run_reconcile_pass().await;
                if !self.pending.swap(false, Ordering::SeqCst) {
                    return report;
                }
                info!("reconcile request arrived mid-sweep, running another pass before releasing");
            },
            Err(_) => {
                self.pending.store(true, Ordering::SeqCst);
                let _guard = self.reconcile_lock.lock().await;
                self.recent_reports(1)
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| empty_report(Utc::now()))
            }
        }
    }

    async fn run_reconcile_pass(&self) -> SyncReport {
        let start = Instant::now();
        let timestamp = Utc::now();
        info!("starting full DNS synchronization");

        let intents = match self.intent_source.list_intents().await {
            Ok(i) => i,
            Err(e) => return self.abort_sweep(timestamp, start, format!("failed to list intents: {e}")),
        };

        let nodes = match self.node_source.list_nodes().await {
            Ok(n) => n,
            Err(e) => return self.abort_sweep(timestamp, start, format!("failed to list nodes: {e}")),
        };

        let advertisable: Vec<&Node> = nodes
            .iter()
            .filter(|n| n.is_advertisable(&self.deletion_taints))
            .collect();
        let departing_count = nodes
            .iter()
            .filter(|n| n.is_departing(&self.deletion_taints))
            .count();
        let no_ip_count = nodes.iter().filter(|n| n.external_ip.is_none()).count();

        let valid_ips: Vec<String> = advertisable
            .iter()
            .filter_map(|n| n.external_ip.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        info!(
            total_nodes = nodes.len(),
            advertisable = advertisable.len(),
            departing = departing_count,
            no_external_ip = no_ip_count,
            intents = intents.len(),
            "cluster state analysis for sync"
        );

        let mut errors = Vec::new();
        errors.extend(conflicting_intent_warnings(&intents));

        let mut records_created = 0usize;
        let mut records_deleted = 0usize;
        let mut records_kept = 0usize;
        let mut records_found = 0usize;

        for intent in &intents {
            match self.dns_provider.sync_hostname(&intent.hostname, &valid_ips).await {
                Ok(result) => {
                    records_deleted += result.deleted.len();
                    records_kept += result.kept;
                    errors.extend(result.errors);
                }
                Err(e) => {
                    errors.push(format!("{}: sync failed: {e}", intent.hostname));
                    continue;
                }
            }

            let current = match self.dns_provider.list_records(&intent.hostname).await {
                Ok(r) => r,
                Err(e) => {
                    errors.push(format!("{}: list failed: {e}", intent.hostname));
                    continue;
                }
            };
            records_found += current.len();
            let current_ips: BTreeSet<&str> = current.iter().map(|r| r.ip.as_str()).collect();

            for ip in valid_ips.iter().filter(|ip| !current_ips.contains(ip.as_str())) {
                match self
                    .dns_provider
                    .create_record(&intent.hostname, ip, intent.ttl, intent.proxied)
                    .await
                {
                    Ok(_) => records_created += 1,
                    Err(e) => errors.push(format!("{}: create {ip} failed: {e}", intent.hostname)),
                }
            }
        }

        let duration_seconds = start.elapsed().as_secs_f64();
        let report = SyncReport {
            timestamp,
            nodes_checked: nodes.len(),
            nodes_departing: departing_count,
            intents_checked: intents.len(),
            records_found,
            records_created,
            records_deleted,
            records_kept,
            errors,
            duration_seconds,
        };

        metrics::RECORDS_CREATED_TOTAL.inc_by(records_created as u64);
        metrics::RECORDS_DELETED_TOTAL.inc_by(records_deleted as u64);
        if !report.errors.is_empty() {
            metrics::SWEEP_ERRORS_TOTAL.inc_by(report.errors.len() as u64);
            warn!(errors = ?report.errors, "DNS synchronization completed with errors");
        }
        info!(
            duration_seconds,
            records_created, records_deleted, records_kept, "completed full DNS synchronization"
        );

        self.reports.lock().unwrap().push(report.clone());
        *self.last_sync.lock().unwrap() = Some(timestamp);
        report
    }

    fn abort_sweep(&self, timestamp: chrono::DateTime<Utc>, start: Instant, error: String) -> SyncReport {
        tracing::error!(error = error.as_str(), "full synchronization aborted");
        metrics::SWEEP_ERRORS_TOTAL.inc();
        let report = SyncReport {
            timestamp,
            nodes_checked: 0,
            nodes_departing: 0,
            intents_checked: 0,
            records_found: 0,
            records_created: 0,
            records_deleted: 0,
            records_kept: 0,
            errors: vec![error],
            duration_seconds: start.elapsed().as_secs_f64(),
        };
        self.reports.lock().unwrap().push(report.clone());
        report
    }

    // ---- observability reads ------------------------------------------------

    pub fn recent_events(&self, n: usize) -> Vec<ManagementEvent> {
        self.events.lock().unwrap().tail(n)
    }

    pub fn recent_reports(&self, n: usize) -> Vec<SyncReport> {
        self.reports.lock().unwrap().tail(n)
    }

    pub fn last_sync(&self) -> Option<chrono::DateTime<Utc>> {
        *self.last_sync.lock().unwrap()
    }

    /// Live per-hostname record listing straight from the provider, for
    /// every currently configured Intent. Unlike the logs above this makes
    /// real provider calls on every invocation; it reports provider
    /// truth, not reconciler history.
    pub async fn current_dns_state(&self) -> Vec<crate::model::HostnameState> {
        let intents = self.intent_source.list_intents().await.unwrap_or_default();
        let mut state = Vec::with_capacity(intents.len());
        for intent in intents {
            let records = self
                .dns_provider
                .list_records(&intent.hostname)
                .await
                .unwrap_or_default();
            state.push(crate::model::HostnameState {
                hostname: intent.hostname,
                records,
            });
        }
        state
    }

    /// Fresh aggregate health, computed from the two substrate checks
    /// every time, never cached.
    pub async fn health_snapshot(&self) -> HealthStatus {
        let node_health = self.node_source.health_check().await;
        let dns_health = self.dns_provider.health_check().await;

        let node_ok = node_health.as_ref().map(|h| *h).unwrap_or(false);
        let dns_ok = dns_health.as_ref().map(|h| h.healthy).unwrap_or(false);

        let status = if node_ok && dns_ok {
            HealthState::Healthy
        } else if node_health.is_ok() && dns_health.is_ok() {
            HealthState::Degraded
        } else {
            HealthState::Unhealthy
        };

        let mut errors = Vec::new();
        if let Err(e) = &node_health {
            errors.push(format!("node source: {e}"));
        } else if !node_ok {
            errors.push("node source: unhealthy".to_string());
        }
        if let Err(e) = &dns_health {
            errors.push(format!("dns provider: {e}"));
        } else if let Ok(h) = &dns_health {
            if let Some(msg) = &h.error {
                errors.push(format!("dns provider: {msg}"));
            }
        }

        HealthStatus {
            status,
            timestamp: Utc::now(),
            node_source_healthy: node_ok,
            dns_provider_healthy: dns_ok,
            last_sync: self.last_sync(),
            errors,
        }
    }
}

fn empty_report(timestamp: chrono::DateTime<Utc>) -> SyncReport {
    SyncReport {
        timestamp,
        nodes_checked: 0,
        nodes_departing: 0,
        intents_checked: 0,
        records_found: 0,
        records_created: 0,
        records_deleted: 0,
        records_kept: 0,
        errors: Vec::new(),
        duration_seconds: 0.0,
    }
}

/// Flags hostnames where more than one enabled Intent disagrees on
/// `ttl`/`proxied`; an explicit, non-fatal diagnostic for the "last
/// writer wins" corner case.
fn conflicting_intent_warnings(intents: &[Intent]) -> Vec<String> {
    let mut by_hostname: HashMap<&str, Vec<&Intent>> = HashMap::new();
    for intent in intents {
        by_hostname.entry(intent.hostname.as_str()).or_default().push(intent);
    }

    let mut warnings = Vec::new();
    for (hostname, group) in by_hostname {
        if group.len() < 2 {
            continue;
        }
        let ttls: HashSet<u32> = group.iter().map(|i| i.ttl).collect();
        let proxied: HashSet<bool> = group.iter().map(|i| i.proxied).collect();
        if ttls.len() > 1 || proxied.len() > 1 {
            let msg = format!(
                "{hostname}: {} enabled intents disagree on ttl/proxied; first-registered wins this sweep",
                group.len()
            );
            warn!("{msg}");
            warnings.push(msg);
        }
    }
    warnings
}
