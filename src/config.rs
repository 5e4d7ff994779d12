use std::time::Duration;

use crate::error::Error;

/// The two taint keys that, together, mark a node as departing the
/// cluster. A node must carry every key in this set to be considered
/// `Departing`; any proper subset leaves it `Advertisable`.
pub const DEFAULT_DELETION_TAINTS: &[&str] = &[
    "DeletionCandidateOfClusterAutoscaler",
    "ToBeDeletedByClusterAutoscaler",
];

/// Process-wide configuration, assembled from environment variables at
/// startup and validated before any client is constructed.
#[derive(Debug, Clone)]
pub struct Config {
    pub cloudflare_api_token: String,
    pub dns_sync_interval: Duration,
    pub health_check_interval: Duration,
    pub k8s_config_path: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub enable_health_server: bool,
    pub health_port: u16,
    pub deletion_taints: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Console,
    Json,
}

impl Config {
    /// Load configuration from the process environment and validate it.
    /// Returns a `Config::Config` error (fatal, exit code 1) on any missing
    /// required setting or out-of-range interval.
    pub fn from_env() -> Result<Self, Error> {
        let cloudflare_api_token = std::env::var("CLOUDFLARE_API_TOKEN")
            .map_err(|_| Error::Config("CLOUDFLARE_API_TOKEN is required".into()))?;

        let dns_sync_interval = parse_interval_secs("DNS_SYNC_INTERVAL", 60, 10)?;
        let health_check_interval = parse_interval_secs("HEALTH_CHECK_INTERVAL", 30, 5)?;

        let k8s_config_path = std::env::var("K8S_CONFIG_PATH")
            .ok()
            .filter(|s| !s.is_empty());

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());
        let log_format = match std::env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "console".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Console,
        };

        let max_retries = std::env::var("MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let retry_delay = Duration::from_secs(
            std::env::var("RETRY_DELAY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        );

        let enable_health_server = std::env::var("ENABLE_HEALTH_SERVER")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        let health_port = std::env::var("HEALTH_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        Ok(Self {
            cloudflare_api_token,
            dns_sync_interval,
            health_check_interval,
            k8s_config_path,
            log_level,
            log_format,
            max_retries,
            retry_delay,
            enable_health_server,
            health_port,
            deletion_taints: DEFAULT_DELETION_TAINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
    }
}

fn parse_interval_secs(var: &str, default: u64, min: u64) -> Result<Duration, Error> {
    let secs = std::env::var(var)
        .ok()
        .map(|v| {
            v.parse::<u64>()
                .map_err(|_| Error::Config(format!("{var} must be an integer")))
        })
        .transpose()?
        .unwrap_or(default);

    if secs < min {
        return Err(Error::Config(format!("{var} must be at least {min} seconds")));
    }
    Ok(Duration::from_secs(secs))
}
