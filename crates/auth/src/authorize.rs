//! Per-request authorization decisions.
//!
//! [`AuthorizationEngine`] is built once at startup and shared read-only
//! across requests:
//!
//! 1. extract the caller's credential (Bearer token, else Basic username),
//! 2. classify the request into `(resource, access)`, refusing paths that
//!    would be normalized to something else upstream,
//! 3. verify the credential,
//! 4. check the grant,
//! 5. optionally require wildcard access for expanded responses,
//! 6. swap the caller's credential for the upstream secret.
//!
//! Every denial is terminal for its request. Nothing here does I/O.

use base64::{Engine, engine::general_purpose::STANDARD};
use http::{HeaderValue, Method, Request, header::AUTHORIZATION};
use serde::Serialize;
use thiserror::Error;

use crate::credential::{CredentialError, SigningKey};
use crate::permissions::{AccessLevel, ResourceKind};
use crate::routes::{RouteTable, classify_access, is_canonical_path};

/// Whether asking the upstream to expand related objects needs wildcard access.
///
/// An expanded response can embed objects of a different resource family
/// than the one the path matched.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ExpandPolicy {
    #[default]
    RequireWildcard,
    Permit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// Missing, malformed or forged credential.
    InvalidCredential,
    /// Valid credential that does not cover the request.
    InsufficientPermission,
    /// The request could not be classified (e.g. an unmapped method).
    ConfigurationError,
}

impl DenialKind {
    /// Error category rendered at the HTTP boundary.
    pub fn category(self) -> &'static str {
        match self {
            DenialKind::InvalidCredential => "authentication",
            DenialKind::InsufficientPermission => "permission",
            DenialKind::ConfigurationError => "invalid_request",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct Denial {
    pub kind: DenialKind,
    pub message: String,
}

impl Denial {
    pub fn invalid_credential(msg: impl Into<String>) -> Self {
        Self { kind: DenialKind::InvalidCredential, message: msg.into() }
    }

    pub fn insufficient(msg: impl Into<String>) -> Self {
        Self { kind: DenialKind::InsufficientPermission, message: msg.into() }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self { kind: DenialKind::ConfigurationError, message: msg.into() }
    }
}

/// An allowed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub resource: ResourceKind,
    pub access: AccessLevel,
    /// `Authorization` value to send upstream in place of the caller's.
    pub upstream_authorization: HeaderValue,
}

/// The parts of a request a decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct RequestFacts<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub authorization: Option<&'a HeaderValue>,
}

impl<'a> RequestFacts<'a> {
    pub fn from_request<B>(req: &'a Request<B>) -> Self {
        Self {
            method: req.method(),
            path: req.uri().path(),
            query: req.uri().query(),
            authorization: req.headers().get(AUTHORIZATION),
        }
    }
}

pub struct AuthorizationEngine {
    signing_key: SigningKey,
    upstream_authorization: HeaderValue,
    routes: RouteTable,
    expand_policy: ExpandPolicy,
}

impl AuthorizationEngine {
    pub fn new(
        signing_key: SigningKey,
        upstream_secret: &str,
        routes: RouteTable,
    ) -> Result<Self, CredentialError> {
        if upstream_secret.is_empty() {
            return Err(CredentialError::EmptyKey);
        }

        // Basic auth with the secret as username and an empty password.
        let encoded = STANDARD.encode(format!("{upstream_secret}:"));
        let mut upstream_authorization = HeaderValue::from_str(&format!("Basic {encoded}"))
            .map_err(|_| CredentialError::Malformed("upstream secret is not a valid header value"))?;
        upstream_authorization.set_sensitive(true);

        Ok(Self {
            signing_key,
            upstream_authorization,
            routes,
            expand_policy: ExpandPolicy::default(),
        })
    }

    pub fn with_expand_policy(mut self, expand_policy: ExpandPolicy) -> Self {
        self.expand_policy = expand_policy;
        self
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Decide whether the request described by `facts` may be forwarded.
    pub fn decide(&self, facts: &RequestFacts<'_>) -> Result<Grant, Denial> {
        let credential = extract_credential(facts.authorization)?;

        // Classification must agree with the path the upstream resolves.
        if !is_canonical_path(facts.path) {
            return Err(Denial::configuration(
                "Request path must not contain empty, '.' or '..' segments",
            ));
        }

        let access = classify_access(facts.method);
        let resource = self.routes.classify_resource(facts.path);
        if access == AccessLevel::None {
            return Err(Denial::configuration(format!(
                "Method {} is not mapped to an access level",
                facts.method
            )));
        }

        let permissions = self
            .signing_key
            .verify(&credential)
            .map_err(|e| {
                tracing::debug!(error = %e, "credential verification failed");
                Denial::invalid_credential(e.to_string())
            })?;

        if !permissions.can(access, &[resource]) {
            return Err(Denial::insufficient(
                "Request requires permission that was not granted",
            ));
        }

        if self.expand_policy == ExpandPolicy::RequireWildcard
            && requests_expansion(facts.query)
            && !permissions.can(access, &[ResourceKind::All])
        {
            return Err(Denial::insufficient(
                "Requests that expand return values must have permissions to all resources",
            ));
        }

        Ok(Grant {
            resource,
            access,
            upstream_authorization: self.upstream_authorization.clone(),
        })
    }

    /// Decide on `req` and, if allowed, replace its `Authorization` header
    /// with the upstream secret. A denied request is left untouched.
    pub fn authorize_request<B>(&self, req: &mut Request<B>) -> Result<Grant, Denial> {
        let grant = self.decide(&RequestFacts::from_request(req))?;

        let headers = req.headers_mut();
        headers.remove(AUTHORIZATION);
        headers.insert(AUTHORIZATION, grant.upstream_authorization.clone());

        Ok(grant)
    }
}

impl core::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("signing_key", &self.signing_key)
            .field("routes", &self.routes.routes().len())
            .field("expand_policy", &self.expand_policy)
            .finish_non_exhaustive()
    }
}

fn strip_scheme<'h>(header: &'h str, scheme: &str) -> Option<&'h str> {
    let prefix = header.get(..scheme.len())?;
    if !prefix.eq_ignore_ascii_case(scheme) {
        return None;
    }
    header[scheme.len()..].strip_prefix(' ')
}

/// Bearer token, or the username of HTTP Basic auth.
fn extract_credential(header: Option<&HeaderValue>) -> Result<String, Denial> {
    let header = header.ok_or_else(|| {
        Denial::invalid_credential("Request requires Authorization header")
    })?;
    let invalid = || Denial::invalid_credential("Request requires valid Basic or Bearer auth header");

    let header = header.to_str().map_err(|_| invalid())?.trim();

    if let Some(token) = strip_scheme(header, "Bearer") {
        let token = token.trim();
        return if token.is_empty() { Err(invalid()) } else { Ok(token.to_string()) };
    }

    let encoded = strip_scheme(header, "Basic").ok_or_else(invalid)?;
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| invalid())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;
    let (username, _password) = decoded.split_once(':').ok_or_else(invalid)?;

    Ok(username.to_string())
}

/// True if any `expand` / `expand[...]` query parameter carries a value.
fn requests_expansion(query: Option<&str>) -> bool {
    let Some(query) = query else {
        return false;
    };
    url::form_urlencoded::parse(query.as_bytes())
        .any(|(key, value)| (key == "expand" || key.starts_with("expand[")) && !value.is_empty())
}
