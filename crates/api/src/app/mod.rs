//! HTTP application wiring (Axum router + forwarding).
//!
//! - `routes/`: endpoints the gateway answers itself
//! - `dto.rs`: JSON views of decoded credentials
//! - `errors.rs`: error envelopes in the upstream API's format

use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;

use paygate_auth::AuthorizationEngine;

use crate::forward::{self, Forwarder};
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Anything that is not a local route is authorized and then forwarded.
pub fn build_app(engine: Arc<AuthorizationEngine>, forwarder: Forwarder) -> Router {
    let auth_state = middleware::AuthState { engine };

    let forwarded = Router::new()
        .fallback(forward::forward_handler)
        .with_state(forwarder)
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::authz_middleware,
        )));

    routes::router().fallback_service(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header::AUTHORIZATION};
    use tower::ServiceExt;
    use url::Url;

    use paygate_auth::{AccessLevel, PermissionSet, ResourceKind, RouteTable, SigningKey};

    const KEY: &str = "sk_test_inprocess";

    fn app() -> Router {
        let engine = AuthorizationEngine::new(
            SigningKey::new(KEY).unwrap(),
            KEY,
            RouteTable::stripe_default().unwrap(),
        )
        .unwrap();
        // Nothing listens here; allowed requests end in a 502.
        let forwarder = Forwarder::new(Url::parse("http://127.0.0.1:9").unwrap()).unwrap();
        build_app(Arc::new(engine), forwarder)
    }

    #[tokio::test]
    async fn health_is_answered_locally_without_credentials() {
        let res = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unauthenticated_requests_are_denied_before_forwarding() {
        let res = app()
            .oneshot(Request::get("/v1/customers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn authorized_requests_reach_the_forwarder() {
        let credential = SigningKey::new(KEY)
            .unwrap()
            .sign(&PermissionSet::new().with_access(AccessLevel::Read, &[ResourceKind::Customers]));

        let res = app()
            .oneshot(
                Request::get("/v1/customers")
                    .header(AUTHORIZATION, format!("Bearer {credential}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }
}
