//! Forwarding to the upstream API.
//!
//! Only requests that passed authorization reach this module; by then the
//! caller's credential has already been replaced with the upstream secret.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::Response,
};
use url::Url;

use crate::app::errors::json_error;
use crate::context::GrantContext;

/// Largest request body buffered for forwarding.
pub const MAX_REQUEST_BODY: usize = 32 * 1024 * 1024;

const HOP_BY_HOP: [header::HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HeaderName::from_static("keep-alive"),
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Single-host reverse proxy to the upstream API.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    upstream: Url,
}

impl Forwarder {
    pub fn new(upstream: Url) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, upstream })
    }

    /// Upstream URL for `uri`: scheme and host from the upstream, path and
    /// query from the request (appended to any upstream base path).
    pub fn upstream_url(&self, uri: &Uri) -> Url {
        let mut url = self.upstream.clone();
        let base = self.upstream.path().trim_end_matches('/');
        url.set_path(&format!("{base}{}", uri.path()));
        url.set_query(uri.query());
        url
    }

    pub async fn forward(&self, req: Request) -> Response {
        let (parts, body) = req.into_parts();

        let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "request body rejected");
                return json_error(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "invalid_request_error",
                    "Request body could not be read",
                );
            }
        };

        let url = self.upstream_url(&parts.uri);
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await;

        match upstream {
            Ok(res) => {
                let status = res.status();
                let mut headers = res.headers().clone();
                strip_hop_by_hop(&mut headers);

                let mut response = Response::new(Body::from_stream(res.bytes_stream()));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            Err(e) => {
                tracing::error!(error = %e, "upstream request failed");
                json_error(
                    StatusCode::BAD_GATEWAY,
                    "api_error",
                    "The upstream API could not be reached",
                )
            }
        }
    }
}

/// Fallback handler: everything the gateway does not answer itself.
pub async fn forward_handler(State(forwarder): State<Forwarder>, req: Request) -> Response {
    if let Some(grant) = req.extensions().get::<GrantContext>() {
        tracing::debug!(resource = %grant.resource(), access = %grant.access(), "forwarding upstream");
    }
    forwarder.forward(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarder(base: &str) -> Forwarder {
        Forwarder::new(Url::parse(base).unwrap()).unwrap()
    }

    #[test]
    fn rewrites_scheme_and_host_but_keeps_path_and_query() {
        let f = forwarder("https://api.stripe.com");
        let uri: Uri = "/v1/charges/ch_1?expand%5B%5D=customer".parse().unwrap();

        let url = f.upstream_url(&uri);
        assert_eq!(url.as_str(), "https://api.stripe.com/v1/charges/ch_1?expand%5B%5D=customer");
    }

    #[test]
    fn canonical_paths_are_forwarded_as_classified() {
        let f = forwarder("https://api.stripe.com");
        for path in ["/v1/customers", "/v1/customers/", "/v1/customers/cus_1/sources", "/v1/files/a.b..c"] {
            assert!(paygate_auth::routes::is_canonical_path(path));
            let uri: Uri = path.parse().unwrap();
            assert_eq!(f.upstream_url(&uri).path(), path);
        }
    }

    #[test]
    fn upstream_base_path_is_prefixed() {
        let f = forwarder("http://127.0.0.1:8080/mock/");
        let uri: Uri = "/v1/customers".parse().unwrap();

        assert_eq!(f.upstream_url(&uri).as_str(), "http://127.0.0.1:8080/mock/v1/customers");
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }
}
