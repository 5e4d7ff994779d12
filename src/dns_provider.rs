use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::Record;

const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Outcome of syncing a single hostname against a set of valid IPs.
#[derive(Debug, Clone, Default)]
pub struct HostnameSyncResult {
    pub deleted: Vec<String>,
    pub kept: usize,
    pub errors: Vec<String>,
}

/// Outcome of a `healthCheck` call.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub healthy: bool,
    pub zone_count: usize,
    pub error: Option<String>,
}

/// Narrow capability interface onto the DNS provider. All operations are
/// scoped implicitly to whichever zone owns the hostname in question; the
/// caller never handles zone ids directly except through `resolve_zone`.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn init(&self) -> Result<()>;
    async fn resolve_zone(&self, hostname: &str) -> Result<String>;
    async fn list_records(&self, hostname: &str) -> Result<Vec<Record>>;
    async fn create_record(&self, hostname: &str, ip: &str, ttl: u32, proxied: bool) -> Result<Record>;
    async fn delete_record(&self, record_id: &str, zone_id: &str) -> Result<()>;
    async fn delete_records_by_ip(&self, hostname: &str, ip: &str) -> Result<Vec<String>>;
    async fn sync_hostname(&self, hostname: &str, valid_ips: &[String]) -> Result<HostnameSyncResult>;
    async fn health_check(&self) -> Result<ProviderHealth>;
}

#[derive(Debug, Deserialize)]
struct CfEnvelope<T> {
    success: bool,
    result: Option<T>,
    errors: Vec<CfApiError>,
}

#[derive(Debug, Deserialize)]
struct CfApiError {
    code: u32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CfZone {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CfRecord {
    id: String,
    name: String,
    content: String,
    ttl: u32,
    proxied: bool,
    zone_id: String,
    zone_name: String,
    created_on: DateTime<Utc>,
    modified_on: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct CreateRecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

fn cf_record_to_model(r: CfRecord) -> Record {
    Record {
        id: r.id,
        hostname: r.name,
        ip: r.content,
        ttl: r.ttl,
        proxied: r.proxied,
        zone_id: r.zone_id,
        zone_name: r.zone_name,
        created_on: r.created_on,
        modified_on: r.modified_on,
    }
}

/// CloudFlare-backed provider. Holds a zone cache (`zoneName -> zoneId`)
/// and a hostname->zone cache, refreshed together so they can never drift.
pub struct CloudflareDnsProvider {
    http: reqwest::Client,
    api_token: String,
    api_base: String,
    zones: RwLock<HashMap<String, String>>,
    hostname_zone: RwLock<HashMap<String, String>>,
    max_retries: usize,
    retry_delay: Duration,
}

impl CloudflareDnsProvider {
    pub fn new(api_token: String, max_retries: usize, retry_delay: Duration) -> Self {
        Self::with_base_url(api_token, CLOUDFLARE_API_BASE.to_string(), max_retries, retry_delay)
    }

    /// Same as `new`, but pointed at an arbitrary API base. The seam
    /// integration tests use to run this client against a `wiremock`
    /// server instead of the real CloudFlare API.
    pub fn with_base_url(api_token: String, api_base: String, max_retries: usize, retry_delay: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_token,
            api_base,
            zones: RwLock::new(HashMap::new()),
            hostname_zone: RwLock::new(HashMap::new()),
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(format!("{}{path}", self.api_base))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        self.unwrap_envelope(resp).await
    }

    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self
            .http
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await?;
        self.unwrap_envelope(resp).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{}{path}", self.api_base))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(Error::CloudflareApi {
            status: status.as_u16(),
            message: text,
        })
    }

    async fn unwrap_envelope<T: for<'de> Deserialize<'de>>(&self, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let envelope: CfEnvelope<T> = resp.json().await?;
        if !envelope.success {
            let message = envelope
                .errors
                .into_iter()
                .map(|e| format!("{}: {}", e.code, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::CloudflareApi {
                status: status.as_u16(),
                message,
            });
        }
        envelope
            .result
            .ok_or_else(|| Error::CloudflareApi {
                status: status.as_u16(),
                message: "empty result".to_string(),
            })
    }

    async fn refresh_zone_cache(&self) -> Result<usize> {
        let zones: Vec<CfZone> = self.get_json("/zones?per_page=50").await?;
        if zones.is_empty() {
            return Err(Error::Config("no zones visible to this API token".to_string()));
        }
        let mut cache = self.zones.write().unwrap();
        cache.clear();
        for zone in &zones {
            cache.insert(zone.name.clone(), zone.id.clone());
        }
        // the hostname->zone cache is derived from the zone cache; clearing
        // one without the other would let them drift.
        self.hostname_zone.write().unwrap().clear();
        Ok(zones.len())
    }

    /// Retries transient failures up to `max_retries` times with a fixed
    /// delay between attempts. Permanent (4xx) errors are not retried.
    async fn retry<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let strategy = FixedInterval::new(self.retry_delay).take(self.max_retries - 1);
        RetryIf::spawn(strategy, op, |e: &Error| e.is_transient()).await
    }
}

#[async_trait]
impl DnsProvider for CloudflareDnsProvider {
    async fn init(&self) -> Result<()> {
        self.retry(|| async { self.refresh_zone_cache().await }).await?;
        Ok(())
    }

    async fn resolve_zone(&self, hostname: &str) -> Result<String> {
        if let Some(id) = self.hostname_zone.read().unwrap().get(hostname) {
            return Ok(id.clone());
        }

        let labels: Vec<&str> = hostname.split('.').collect();
        let zones = self.zones.read().unwrap();
        for i in 0..labels.len() {
            let candidate = labels[i..].join(".");
            if let Some(zone_id) = zones.get(&candidate) {
                let zone_id = zone_id.clone();
                drop(zones);
                self.hostname_zone
                    .write()
                    .unwrap()
                    .insert(hostname.to_string(), zone_id.clone());
                return Ok(zone_id);
            }
        }
        Err(Error::ZoneNotFound(hostname.to_string()))
    }

    async fn list_records(&self, hostname: &str) -> Result<Vec<Record>> {
        let zone_id = self.resolve_zone(hostname).await?;
        self.retry(|| async {
            let records: Vec<CfRecord> = self
                .get_json(&format!(
                    "/zones/{zone_id}/dns_records?type=A&name={hostname}"
                ))
                .await?;
            Ok(records.into_iter().map(cf_record_to_model).collect())
        })
        .await
    }

    async fn create_record(&self, hostname: &str, ip: &str, ttl: u32, proxied: bool) -> Result<Record> {
        let zone_id = self.resolve_zone(hostname).await?;
        let record = self
            .retry(|| async {
                let body = CreateRecordBody {
                    record_type: "A",
                    name: hostname,
                    content: ip,
                    ttl,
                    proxied,
                };
                let created: CfRecord = self
                    .post_json(&format!("/zones/{zone_id}/dns_records"), &body)
                    .await?;
                Ok(cf_record_to_model(created))
            })
            .await?;
        info!(hostname, ip, record_id = %record.id, "created DNS record");
        Ok(record)
    }

    async fn delete_record(&self, record_id: &str, zone_id: &str) -> Result<()> {
        self.retry(|| async { self.delete(&format!("/zones/{zone_id}/dns_records/{record_id}")).await })
            .await
    }

    async fn delete_records_by_ip(&self, hostname: &str, ip: &str) -> Result<Vec<String>> {
        let records = self.list_records(hostname).await?;
        let mut deleted = Vec::new();
        for record in records.into_iter().filter(|r| r.ip == ip) {
            match self.delete_record(&record.id, &record.zone_id).await {
                Ok(()) => deleted.push(record.id),
                Err(e) => warn!(hostname, ip, record_id = %record.id, error = %e, "failed to delete DNS record"),
            }
        }
        Ok(deleted)
    }

    async fn sync_hostname(&self, hostname: &str, valid_ips: &[String]) -> Result<HostnameSyncResult> {
        let current = self.list_records(hostname).await?;
        let mut result = HostnameSyncResult::default();
        for record in current {
            if valid_ips.iter().any(|ip| ip == &record.ip) {
                result.kept += 1;
            } else {
                match self.delete_record(&record.id, &record.zone_id).await {
                    Ok(()) => result.deleted.push(record.id),
                    Err(e) => result
                        .errors
                        .push(format!("{hostname}: failed to delete {}: {e}", record.id)),
                }
            }
        }
        Ok(result)
    }

    async fn health_check(&self) -> Result<ProviderHealth> {
        match self.refresh_zone_cache().await {
            Ok(count) => Ok(ProviderHealth {
                healthy: true,
                zone_count: count,
                error: None,
            }),
            Err(e) => Ok(ProviderHealth {
                healthy: false,
                zone_count: 0,
                error: Some(e.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provider_with_zones(zones: &[(&str, &str)]) -> CloudflareDnsProvider {
        let provider = CloudflareDnsProvider::new("test-token".to_string(), 3, Duration::from_millis(1));
        let mut cache = HashMap::new();
        for (name, id) in zones {
            cache.insert(name.to_string(), id.to_string());
        }
        *provider.zones.write().unwrap() = cache;
        provider
    }

    #[tokio::test]
    async fn resolves_longest_matching_suffix() {
        let provider = provider_with_zones(&[("acme.io", "Z2"), ("example.com", "Z1")]);
        let zone = provider.resolve_zone("api.svc.example.com").await.unwrap();
        assert_eq!(zone, "Z1");
    }

    #[tokio::test]
    async fn zone_resolution_caches_per_hostname() {
        let provider = provider_with_zones(&[("example.com", "Z1")]);
        provider.resolve_zone("api.example.com").await.unwrap();
        assert_eq!(
            provider.hostname_zone.read().unwrap().get("api.example.com"),
            Some(&"Z1".to_string())
        );
    }

    #[tokio::test]
    async fn unresolvable_hostname_errors() {
        let provider = provider_with_zones(&[("example.com", "Z1")]);
        let err = provider.resolve_zone("api.other.net").await.unwrap_err();
        assert!(matches!(err, Error::ZoneNotFound(_)));
    }
}
