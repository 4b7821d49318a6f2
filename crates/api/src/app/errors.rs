use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use paygate_auth::Denial;

/// Render a denial in the upstream API's own error envelope, so client SDKs
/// parse it like any other API error.
pub fn denial_to_response(denial: &Denial) -> axum::response::Response {
    let error_type = format!("{}_error", denial.kind.category());
    json_error(StatusCode::FORBIDDEN, &error_type, denial.message.clone())
}

pub fn json_error(
    status: StatusCode,
    error_type: &str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": {
                "type": error_type,
                "message": message.into(),
                "status": status.as_u16(),
            }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(res: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn denials_use_the_upstream_envelope() {
        let res = denial_to_response(&Denial::invalid_credential("bad signature"));
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let body = body_json(res).await;
        assert_eq!(body["error"]["type"], "authentication_error");
        assert_eq!(body["error"]["message"], "bad signature");
        assert_eq!(body["error"]["status"], 403);
    }

    #[tokio::test]
    async fn each_denial_kind_has_its_own_type() {
        let body = body_json(denial_to_response(&Denial::insufficient("nope"))).await;
        assert_eq!(body["error"]["type"], "permission_error");

        let body = body_json(denial_to_response(&Denial::configuration("TRACE"))).await;
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }
}
