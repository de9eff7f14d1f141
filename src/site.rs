//! # Site Handlers
//!
//! Server side of the comments page. The renderer calls these and re-renders from the
//! JSON they return.
//!
//! ## Endpoints
//! - `GET /comments`: the current list, `{"comments": [...]}`; empty on any fetch failure
//! - `POST /comments`: form submit, `action` is `create` (default) or `delete`
//! - `POST /verify`: Turnstile gate; a passing token also returns the list
//!
//! ## Submit Outcomes
//! - `200 {"success": true}`: clear the form and refresh the list
//! - `422 {"success": false, "errors": {field: message}}`: one message per bad field,
//!   nothing was sent to the proxy
//! - `502 {"success": false, "errors": {"comment": ...}}`: the proxy call failed
use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::{
    comments::{Comment, MAX_FIELD_CHARS, format_timestamp},
    error::{FieldErrors, SiteError},
    state::SiteState,
};

pub fn site_router(state: Arc<SiteState>) -> Router {
    Router::new()
        .route("/comments", get(load_handler).post(submit_handler))
        .route("/verify", post(verify_handler))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubmitForm {
    pub action: Option<String>,
    pub name: String,
    pub comment: String,
    pub timestamp: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VerifyForm {
    #[serde(rename = "cf-turnstile-response")]
    pub token: String,
}

fn check_field(errors: &mut FieldErrors, field: &'static str, label: &str, value: &str) {
    if value.trim().is_empty() {
        errors.insert(field, format!("{label} is required"));
    } else if value.chars().count() > MAX_FIELD_CHARS {
        errors.insert(
            field,
            format!("{label} must be at most {MAX_FIELD_CHARS} characters"),
        );
    }
}

pub fn validate_comment(name: &str, comment: &str) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();
    check_field(&mut errors, "name", "Name", name);
    check_field(&mut errors, "comment", "Comment", comment);

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// `CF-Connecting-IP` when behind Cloudflare, else the first `X-Forwarded-For` hop.
pub fn client_address(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    header("cf-connecting-ip")
        .or_else(|| header("x-forwarded-for").and_then(|hops| hops.split(',').next()))
        .map(|address| address.trim().to_string())
        .filter(|address| !address.is_empty())
}

async fn load_handler(State(state): State<Arc<SiteState>>) -> Json<Value> {
    let comments = state.comments.load().await;

    Json(json!({ "comments": comments }))
}

async fn submit_handler(
    State(state): State<Arc<SiteState>>,
    Form(form): Form<SubmitForm>,
) -> Result<Json<Value>, SiteError> {
    let action = form.action.clone().unwrap_or_default();

    match action.trim() {
        "" | "create" => create(&state, form).await?,
        "delete" => delete(&state, form).await?,
        other => return Err(SiteError::UnsupportedAction(other.to_string())),
    }

    Ok(Json(json!({ "success": true })))
}

async fn create(state: &SiteState, form: SubmitForm) -> Result<(), SiteError> {
    validate_comment(&form.name, &form.comment).map_err(SiteError::Validation)?;

    // stored as submitted; blank-only fields were rejected above
    let entry = Comment {
        name: form.name,
        comment: form.comment,
        timestamp: format_timestamp(Utc::now()),
    };

    state
        .comments
        .create(&entry)
        .await
        .map_err(|source| SiteError::Upstream {
            field: "comment",
            message: "Failed to save comment",
            source,
        })?;
    info!("Submitted comment from {}", entry.name);

    Ok(())
}

async fn delete(state: &SiteState, form: SubmitForm) -> Result<(), SiteError> {
    let timestamp = form.timestamp.trim();
    if timestamp.is_empty() {
        let mut errors = FieldErrors::new();
        errors.insert("timestamp", "Timestamp is required".to_string());
        return Err(SiteError::Validation(errors));
    }

    state
        .comments
        .delete(timestamp)
        .await
        .map_err(|source| SiteError::Upstream {
            field: "comment",
            message: "Failed to delete comment",
            source,
        })?;
    info!("Deleted comment {timestamp}");

    Ok(())
}

async fn verify_handler(
    State(state): State<Arc<SiteState>>,
    headers: HeaderMap,
    Form(form): Form<VerifyForm>,
) -> Result<Json<Value>, SiteError> {
    let token = form.token.trim();
    if token.is_empty() {
        return Err(SiteError::Verification(
            "Missing verification token".to_string(),
        ));
    }

    let remote_ip = client_address(&headers);
    let verification = state.verifier.verify(token, remote_ip.as_deref()).await?;

    if !verification.success {
        warn!("Challenge rejected: {:?}", verification.error_codes);
        return Err(SiteError::Verification(verification.failure_message()));
    }

    let comments = state.comments.load().await;

    Ok(Json(json!({ "success": true, "comments": comments })))
}
