use std::sync::Arc;

use crate::model::{HealthStatus, HostnameState, ManagementEvent, SyncReport};
use crate::reconciler::Reconciler;

/// Read-only surface over a running `Reconciler`, used by the health
/// server and anything else that only ever wants to observe, never drive,
/// convergence.
#[derive(Clone)]
pub struct Observability {
    reconciler: Arc<Reconciler>,
}

impl Observability {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    pub async fn health(&self) -> HealthStatus {
        self.reconciler.health_snapshot().await
    }

    pub fn recent_events(&self, n: usize) -> Vec<ManagementEvent> {
        self.reconciler.recent_events(n)
    }

    pub fn recent_reports(&self, n: usize) -> Vec<SyncReport> {
        self.reconciler.recent_reports(n)
    }

    pub async fn current_dns_state(&self) -> Vec<HostnameState> {
        self.reconciler.current_dns_state().await
    }
}
