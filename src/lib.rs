//! Core reconciliation engine for keeping CloudFlare A-records in sync with
//! the healthy worker nodes of a Kubernetes cluster.
//!
//! The binary in `src/main.rs` wires the concrete `kube`/CloudFlare
//! implementations in this crate together; everything here is reachable
//! through narrow capability traits (`NodeSource`, `DnsProvider`,
//! `IntentSource`) so the reconciliation logic can be tested against fakes.

pub mod config;
pub mod dns_provider;
pub mod error;
pub mod health_server;
pub mod intent_source;
pub mod metrics;
pub mod model;
pub mod node_source;
pub mod observability;
pub mod reconciler;
pub mod scheduler;

pub use config::Config;
pub use error::{Error, Result};
pub use reconciler::Reconciler;
