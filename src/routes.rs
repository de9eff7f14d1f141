use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method, header::CONTENT_TYPE},
    middleware::{self, Next},
    response::Response,
    routing::{MethodRouter, get},
};
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use crate::{error::ProxyError, state::ProxyState};

pub const AUTH_HEADER: &str = "X-Custom-Auth-Key";

/// Every path is served the same way; the object key is fixed.
///
/// The CORS layer sits outermost: it answers every `OPTIONS` itself, before the
/// auth check, and stamps the allow headers on all other responses.
pub fn proxy_router(state: Arc<ProxyState>) -> Router {
    let methods: MethodRouter<Arc<ProxyState>> = get(list_handler)
        .put(create_handler)
        .delete(delete_handler)
        .fallback(method_not_allowed);

    Router::new()
        .route("/", methods.clone())
        .route("/{*key}", methods)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth_key))
        .layer(cors_layer(&state.config.allow_origin))
        .with_state(state)
}

pub fn cors_layer(allow_origin: &str) -> CorsLayer {
    let origin = match allow_origin.trim() {
        "*" => AllowOrigin::any(),
        origin => match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(e) => {
                warn!("Invalid CORS origin {origin}: {e}, allowing any");
                AllowOrigin::any()
            }
        },
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-custom-auth-key")])
}

async fn require_auth_key(
    State(state): State<Arc<ProxyState>>,
    request: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    let provided = request
        .headers()
        .get(AUTH_HEADER)
        .and_then(|value| value.to_str().ok());

    let authorized = match provided {
        Some(key) => key == state.config.auth_key,
        None => {
            debug!("Rejected {} {} without auth key", request.method(), request.uri());
            return Err(ProxyError::Forbidden);
        }
    };

    if !authorized {
        warn!("Rejected {} {} with invalid auth key", request.method(), request.uri());
        return Err(ProxyError::Forbidden);
    }

    Ok(next.run(request).await)
}

fn success() -> Json<Value> {
    Json(json!({ "success": true }))
}

async fn method_not_allowed() -> ProxyError {
    ProxyError::MethodNotAllowed
}

async fn list_handler(
    State(state): State<Arc<ProxyState>>,
) -> Result<Json<Vec<Value>>, ProxyError> {
    Ok(Json(state.board.list().await?))
}

async fn create_handler(
    State(state): State<Arc<ProxyState>>,
    body: Bytes,
) -> Result<Json<Value>, ProxyError> {
    let Ok(Value::Object(entry)) = serde_json::from_slice::<Value>(&body) else {
        return Err(ProxyError::MalformedPayload);
    };

    let timestamp = state.board.create(entry).await?;
    info!("Stored comment {timestamp}");

    Ok(success())
}

async fn delete_handler(
    State(state): State<Arc<ProxyState>>,
    body: Bytes,
) -> Result<Json<Value>, ProxyError> {
    let timestamp = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(mut fields)) => fields.remove("timestamp"),
        _ => None,
    };
    let Some(timestamp) = timestamp.filter(|t| !t.is_null()) else {
        return Err(ProxyError::MalformedPayload);
    };

    let removed = state.board.delete(&timestamp).await?;
    info!("Deleted {removed} comment(s) stamped {timestamp}");

    Ok(success())
}
