//! HTTP session endpoint.
//!
//! | Method    | Request                          | Response                      |
//! |-----------|----------------------------------|-------------------------------|
//! | `POST`    | `{"username": …, "password": …}` | `{"sessionToken": …}`         |
//! | `DELETE`  | `Authorization: Bearer <token>`  | `200`, also for unknown tokens|
//! | `OPTIONS` | preflight                        | allowed methods and headers   |
//!
//! Every response carries `Vary: Origin` and echoes an allowed `Origin` back
//! in `Access-Control-Allow-Origin`.

use crate::auth::Credentials;
use crate::error::ServerError;
use crate::server::AppState;
use crate::ws::origin_host;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    AUTHORIZATION, ORIGIN, VARY,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionCreated {
    session_token: String,
}

fn error_response(e: &ServerError) -> Response {
    match e {
        ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized").into_response(),
        ServerError::MalformedInput(message) => {
            (StatusCode::BAD_REQUEST, message.clone()).into_response()
        }
        _ => {
            error!(error = %e, "session request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
        }
    }
}

/// Returns the token of an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

/// `POST /session`
pub(crate) async fn create(State(app): State<AppState>, body: Bytes) -> Response {
    let credentials: Credentials = match serde_json::from_slice(&body) {
        Ok(credentials) => credentials,
        Err(e) => {
            debug!(error = %e, "unreadable session request");
            return (
                StatusCode::BAD_REQUEST,
                "couldn't parse the body as a JSON object",
            )
                .into_response();
        }
    };

    let authenticator = Arc::clone(&app.context.authenticator);
    let created =
        tokio::task::spawn_blocking(move || authenticator.create_session(&credentials)).await;
    match created {
        Ok(Ok(token)) => Json(SessionCreated {
            session_token: token.to_string(),
        })
        .into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&ServerError::Internal(format!("session task failed: {}", e))),
    }
}

/// `DELETE /session`
pub(crate) async fn delete(State(app): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers).map(str::to_owned) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let authenticator = Arc::clone(&app.context.authenticator);
    match tokio::task::spawn_blocking(move || authenticator.delete_session(&token)).await {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(e) => error_response(&ServerError::Internal(format!("session task failed: {}", e))),
    }
}

/// `OPTIONS /session`
pub(crate) async fn preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
            (ACCESS_CONTROL_ALLOW_METHODS, "POST, DELETE, OPTIONS"),
        ],
    )
}

/// Adds CORS headers to every session response.
pub(crate) async fn cors(State(app): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request.headers().get(ORIGIN).cloned();
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if let Some(origin) = origin {
        let allowed = origin
            .to_str()
            .is_ok_and(|value| app.context.config.origin_allowed(origin_host(value)));
        if allowed {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
    }
    headers.insert(VARY, HeaderValue::from_static("Origin"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(authorization).unwrap());
        headers
    }

    #[test]
    fn bearer_tokens() {
        assert_eq!(bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer abc def")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn error_statuses() {
        assert_eq!(
            error_response(&ServerError::Unauthorized("x".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            error_response(&ServerError::MalformedInput("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&ServerError::Internal("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn created_body_uses_camel_case() {
        let body = serde_json::to_string(&SessionCreated {
            session_token: "t".into(),
        })
        .unwrap();
        assert_eq!(body, r#"{"sessionToken":"t"}"#);
    }
}
