use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::{api::Api, Client, ResourceExt};
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::Intent;

const ANNOTATION_ENABLED: &str = "epictetus.io/dns-enabled";
const ANNOTATION_HOSTNAME: &str = "epictetus.io/hostname";
const ANNOTATION_TTL: &str = "epictetus.io/ttl";
const ANNOTATION_PROXIED: &str = "epictetus.io/proxied";

/// Narrow capability interface producing the current set of DNS intents
/// from annotated Kubernetes services.
#[async_trait]
pub trait IntentSource: Send + Sync {
    async fn list_intents(&self) -> Result<Vec<Intent>>;
}

pub struct KubeIntentSource {
    client: Client,
}

impl KubeIntentSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Build an `Intent` from a service's annotations, or `None` if the
/// service doesn't opt in. Malformed `ttl`/`proxied` values cause the
/// intent for *this* service to be dropped; other services still
/// proceed.
pub fn intent_from_annotations(
    service_namespace: &str,
    service_name: &str,
    annotations: &std::collections::BTreeMap<String, String>,
) -> Option<Intent> {
    if annotations.get(ANNOTATION_ENABLED).map(String::as_str) != Some("true") {
        return None;
    }

    let hostname = annotations.get(ANNOTATION_HOSTNAME)?.trim();
    if hostname.is_empty() {
        warn!(
            service = format!("{service_namespace}/{service_name}"),
            "dns-enabled service has a blank hostname annotation, skipping"
        );
        return None;
    }

    let ttl = match annotations.get(ANNOTATION_TTL) {
        Some(raw) => match raw.parse::<u32>() {
            Ok(v) => v,
            Err(_) => {
                warn!(
                    service = format!("{service_namespace}/{service_name}"),
                    ttl = raw.as_str(),
                    "malformed ttl annotation, skipping intent this sweep"
                );
                return None;
            }
        },
        None => Intent::DEFAULT_TTL,
    };

    let proxied = annotations
        .get(ANNOTATION_PROXIED)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    Some(Intent {
        service_namespace: service_namespace.to_string(),
        service_name: service_name.to_string(),
        hostname: hostname.to_string(),
        ttl,
        proxied,
        enabled: true,
    })
}

#[async_trait]
impl IntentSource for KubeIntentSource {
    async fn list_intents(&self) -> Result<Vec<Intent>> {
        let api: Api<Service> = Api::all(self.client.clone());
        let services = api.list(&Default::default()).await.map_err(Error::Kube)?;

        let mut intents = Vec::new();
        for service in services.items {
            let Some(annotations) = service.metadata.annotations.clone() else {
                continue;
            };
            let annotations: std::collections::BTreeMap<String, String> =
                annotations.into_iter().collect();
            let namespace = service.namespace().unwrap_or_default();
            let name = service.name_any();
            if let Some(intent) = intent_from_annotations(&namespace, &name, &annotations) {
                intents.push(intent);
            }
        }
        Ok(intents)
    }
}
