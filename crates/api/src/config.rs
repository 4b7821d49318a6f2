//! Runtime configuration, validated once at startup.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use paygate_auth::{
    AuthorizationEngine, CredentialError, ExpandPolicy, RouteTable, RouteTableError, SigningKey,
};

pub const DEFAULT_UPSTREAM: &str = "https://api.stripe.com";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:9090";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("upstream key must be set (--upstream-key or PAYGATE_UPSTREAM_KEY)")]
    MissingUpstreamKey,

    #[error("invalid upstream uri '{uri}': {reason}")]
    InvalidUpstream { uri: String, reason: String },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Routes(#[from] RouteTableError),
}

/// Everything the gateway needs to serve requests.
#[derive(Clone)]
pub struct GatewayConfig {
    pub upstream: Url,
    pub listen: SocketAddr,
    upstream_key: String,
    signing_key: Option<String>,
    pub expand_policy: ExpandPolicy,
}

impl GatewayConfig {
    pub fn new(upstream: &str, listen: SocketAddr, upstream_key: impl Into<String>) -> Result<Self, ConfigError> {
        let upstream_key = upstream_key.into();
        if upstream_key.trim().is_empty() {
            return Err(ConfigError::MissingUpstreamKey);
        }

        Ok(Self {
            upstream: parse_upstream(upstream)?,
            listen,
            upstream_key,
            signing_key: None,
            expand_policy: ExpandPolicy::default(),
        })
    }

    /// Use a dedicated HMAC key instead of the upstream key.
    pub fn with_signing_key(mut self, signing_key: Option<String>) -> Self {
        self.signing_key = signing_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_expand_policy(mut self, expand_policy: ExpandPolicy) -> Self {
        self.expand_policy = expand_policy;
        self
    }

    pub fn signing_key(&self) -> Result<SigningKey, ConfigError> {
        let key = self.signing_key.as_deref().unwrap_or(&self.upstream_key);
        Ok(SigningKey::new(key)?)
    }

    /// Build the shared decision engine for this configuration.
    pub fn engine(&self) -> Result<Arc<AuthorizationEngine>, ConfigError> {
        let engine = AuthorizationEngine::new(
            self.signing_key()?,
            &self.upstream_key,
            RouteTable::stripe_default()?,
        )?
        .with_expand_policy(self.expand_policy);
        Ok(Arc::new(engine))
    }
}

impl core::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("upstream", &self.upstream.as_str())
            .field("listen", &self.listen)
            .field("separate_signing_key", &self.signing_key.is_some())
            .field("expand_policy", &self.expand_policy)
            .finish_non_exhaustive()
    }
}

fn parse_upstream(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUpstream {
        uri: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https".to_string()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("unable to parse hostname".to_string()));
    }
    Ok(url)
}
