use thiserror::Error;

/// Crate-wide error taxonomy. Mirrors the failure classes a reconcile pass
/// needs to tell apart: config errors are fatal at startup, transport errors
/// are either retried transparently or surfaced per-Intent, and a few are
/// purely local bookkeeping problems.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("cloudflare API error ({status}): {message}")]
    CloudflareApi { status: u16, message: String },

    #[error("cloudflare transport error: {0}")]
    CloudflareTransport(#[from] reqwest::Error),

    #[error("zone not found for hostname '{0}'")]
    ZoneNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("node '{0}' has no name")]
    MissingNodeName(String),
}

impl Error {
    /// A CloudFlare/transport failure is transient iff it is a server error
    /// or a connection-level problem; anything else (4xx) is permanent and
    /// is not worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::CloudflareApi { status, .. } => *status >= 500,
            Error::CloudflareTransport(e) => e.is_timeout() || e.is_connect(),
            Error::Kube(kube::Error::Api(resp)) => resp.code >= 500,
            Error::Kube(_) => true,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
