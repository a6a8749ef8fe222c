//! HTTP API
//!
//! Every endpoint answers 200 with an `ApiResponse` envelope; failures are
//! reported through `success: false` and an `error_kind`. The session is
//! identified by the `nasfan_session` cookie, issued on first contact.

use std::convert::Infallible;
use std::net::Ipv4Addr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use nasfan_protocol::{ApiResponse, ConnectRequest, ErrorKind, SetFanSpeedRequest};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::ssh::{ShellTransport, SshTarget};
use crate::state::SessionRegistry;

pub const SESSION_COOKIE: &str = "nasfan_session";

const DEFAULT_SSH_PORT: u16 = 22;

pub fn router<T: ShellTransport>(registry: Arc<SessionRegistry<T>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/fan_options", get(fan_options::<T>))
        .route("/connect", post(connect::<T>))
        .route("/disconnect", post(disconnect::<T>))
        .route("/set_fan_speed", post(set_fan_speed::<T>))
        .route("/get_fan_status", get(get_fan_status::<T>))
        .route("/get_logs", get(get_logs::<T>))
        .route("/clear_logs", post(clear_logs::<T>))
        .route("/connection_status", get(connection_status::<T>))
        .route("/logout", post(logout::<T>))
        .with_state(registry)
}

/// Session id from the cookie, or a fresh one to be set on the response.
pub struct SessionId {
    pub id: String,
    fresh: bool,
}

impl<S: Send + Sync> FromRequestParts<S> for SessionId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let existing = parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .and_then(|(_, value)| Uuid::parse_str(value.trim()).ok());

        Ok(match existing {
            Some(id) => SessionId {
                id: id.to_string(),
                fresh: false,
            },
            None => SessionId {
                id: nasfan_protocol::new_session_id(),
                fresh: true,
            },
        })
    }
}

fn respond(session: &SessionId, body: ApiResponse) -> Response {
    let mut response = Json(body).into_response();
    if session.fresh {
        set_cookie(
            &mut response,
            &format!("{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax", session.id),
        );
    }
    response
}

fn set_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
}

fn failure(error: &SessionError) -> ApiResponse {
    ApiResponse::err(error.kind(), error.to_string())
}

fn invalid(message: &str) -> ApiResponse {
    ApiResponse::err(ErrorKind::InvalidInput, message)
}

async fn health() -> impl IntoResponse {
    "OK"
}

async fn fan_options<T: ShellTransport>(
    State(registry): State<Arc<SessionRegistry<T>>>,
) -> Json<ApiResponse> {
    Json(ApiResponse::ok("Fan options").with_fan_options(registry.catalog().fan_options()))
}

async fn connect<T: ShellTransport>(
    State(registry): State<Arc<SessionRegistry<T>>>,
    session: SessionId,
    body: Result<Json<ConnectRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = body else {
        return respond(&session, invalid("Invalid request body"));
    };
    let target = match validate_connect(request) {
        Ok(target) => target,
        Err(message) => return respond(&session, invalid(message)),
    };

    let host = target.host.clone();
    let handle = registry.get_or_create(&session.id);
    let body = match handle.connect(target).await {
        Ok(outcome) => ApiResponse::ok(format!("Successfully connected to {host}"))
            .with_connection_info(outcome.info)
            .with_qm2_detected(outcome.qm2_detected),
        Err(e) => failure(&e),
    };
    respond(&session, body)
}

/// Check a connect request and turn it into a target. The error is the
/// user-facing message.
fn validate_connect(request: ConnectRequest) -> Result<SshTarget, &'static str> {
    let port = match &request.port {
        None => i64::from(DEFAULT_SSH_PORT),
        Some(field) => field.parse().ok_or("Invalid port number")?,
    };

    let host = request.host.trim();
    let username = request.username.trim();
    if host.is_empty() || username.is_empty() || request.password.is_empty() {
        return Err("All fields are required");
    }

    let hostname_like = host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if host.parse::<Ipv4Addr>().is_err() && !hostname_like {
        return Err("Invalid IP address or hostname format");
    }

    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p >= 1)
        .ok_or("Port must be between 1 and 65535")?;

    Ok(SshTarget::new(host, port, username, request.password))
}

async fn disconnect<T: ShellTransport>(
    State(registry): State<Arc<SessionRegistry<T>>>,
    session: SessionId,
) -> Response {
    let body = match registry.get_or_create(&session.id).disconnect().await {
        Ok(()) => ApiResponse::ok("Disconnected successfully"),
        Err(e) => failure(&e),
    };
    respond(&session, body)
}

async fn set_fan_speed<T: ShellTransport>(
    State(registry): State<Arc<SessionRegistry<T>>>,
    session: SessionId,
    body: Result<Json<SetFanSpeedRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = body else {
        return respond(&session, invalid("Invalid request body"));
    };
    let Some(level) = request.speed.filter(|s| !s.is_empty()) else {
        return respond(&session, invalid("Fan speed value is required"));
    };

    let body = match registry.get_or_create(&session.id).set_speed(level).await {
        Ok(change) => ApiResponse::ok(change.message()),
        Err(e) => failure(&e),
    };
    respond(&session, body)
}

async fn get_fan_status<T: ShellTransport>(
    State(registry): State<Arc<SessionRegistry<T>>>,
    session: SessionId,
) -> Response {
    let body = match registry.get_or_create(&session.id).get_status().await {
        Ok(status) => ApiResponse::ok("Fan status retrieved").with_status(status.to_string()),
        Err(e @ SessionError::NotConnected) => failure(&e),
        Err(e) => failure(&e).with_status("Unknown"),
    };
    respond(&session, body)
}

async fn get_logs<T: ShellTransport>(
    State(registry): State<Arc<SessionRegistry<T>>>,
    session: SessionId,
) -> Response {
    let snapshot = registry.get_or_create(&session.id).snapshot();
    respond(
        &session,
        ApiResponse::ok("Logs retrieved").with_logs(snapshot.log_entries()),
    )
}

async fn clear_logs<T: ShellTransport>(
    State(registry): State<Arc<SessionRegistry<T>>>,
    session: SessionId,
) -> Response {
    let body = match registry.get_or_create(&session.id).clear_logs().await {
        Ok(()) => ApiResponse::ok("Logs cleared successfully"),
        Err(e) => failure(&e),
    };
    respond(&session, body)
}

async fn connection_status<T: ShellTransport>(
    State(registry): State<Arc<SessionRegistry<T>>>,
    session: SessionId,
) -> Response {
    let snapshot = registry.get_or_create(&session.id).snapshot();
    let mut body =
        ApiResponse::ok("Connection status").with_is_connected(snapshot.is_connected());
    if let Some(info) = snapshot.connection.clone() {
        body = body.with_connection_info(info);
    }
    respond(&session, body)
}

async fn logout<T: ShellTransport>(
    State(registry): State<Arc<SessionRegistry<T>>>,
    session: SessionId,
) -> Response {
    if session.fresh {
        return Json(ApiResponse::ok("Logged out")).into_response();
    }
    if registry.evict(&session.id).await {
        info!(
            component = "http",
            event = "http.session.logout",
            session_id = %session.id,
            "Session logged out"
        );
    } else {
        warn!(
            component = "http",
            event = "http.session.logout_unknown",
            session_id = %session.id,
            "Logout for a session that no longer exists"
        );
    }
    let mut response = Json(ApiResponse::ok("Logged out")).into_response();
    set_cookie(
        &mut response,
        &format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    );
    response
}
