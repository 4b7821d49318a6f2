use std::sync::Arc;

use axum::{extract::State, middleware::Next, response::Response};

use paygate_auth::AuthorizationEngine;

use crate::app::errors::denial_to_response;
use crate::context::GrantContext;

#[derive(Clone)]
pub struct AuthState {
    pub engine: Arc<AuthorizationEngine>,
}

/// Authorize the request and swap in the upstream credential, or answer
/// with a 403 and never call `next`.
pub async fn authz_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    match state.engine.authorize_request(&mut req) {
        Ok(grant) => {
            tracing::info!(
                method = %req.method(),
                path = req.uri().path(),
                resource = %grant.resource,
                access = %grant.access,
                "request authorized"
            );
            req.extensions_mut().insert(GrantContext::from(&grant));
            next.run(req).await
        }
        Err(denial) => {
            tracing::warn!(
                method = %req.method(),
                path = req.uri().path(),
                kind = ?denial.kind,
                reason = %denial.message,
                "request denied"
            );
            denial_to_response(&denial)
        }
    }
}
