//! # Challenge Verification
//!
//! One-shot exchange of a browser challenge token with Cloudflare Turnstile's
//! `siteverify` endpoint. Only `success: true` opens the gate; there is no retry.
//!
//! ## Request
//! Form-encoded POST:
//! - `secret`: the site's Turnstile secret key
//! - `response`: the token the widget put in `cf-turnstile-response`
//! - `remoteip`: the visitor's address, when known
//!
//! ## Response
//! `{"success": bool, "error-codes": [...], "hostname": ..., "challenge_ts": ...}`
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Verification {
    pub success: bool,

    #[serde(default, rename = "error-codes")]
    pub error_codes: Vec<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub hostname: Option<String>,
}

impl Verification {
    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| self.error_codes.first().cloned())
            .unwrap_or_else(|| "Verification failed".to_string())
    }
}

#[async_trait]
pub trait ChallengeVerifier: Send + Sync {
    async fn verify(
        &self,
        token: &str,
        remote_ip: Option<&str>,
    ) -> Result<Verification, VerifyError>;
}

#[derive(Serialize)]
struct SiteverifyForm<'a> {
    secret: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remoteip: Option<&'a str>,
}

pub struct TurnstileVerifier {
    http: Client,
    verify_url: String,
    secret: String,
}

impl TurnstileVerifier {
    pub fn new(verify_url: String, secret: String, timeout: Duration) -> Result<Self, VerifyError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            verify_url,
            secret,
        })
    }
}

#[async_trait]
impl ChallengeVerifier for TurnstileVerifier {
    async fn verify(
        &self,
        token: &str,
        remote_ip: Option<&str>,
    ) -> Result<Verification, VerifyError> {
        let form = SiteverifyForm {
            secret: &self.secret,
            response: token,
            remoteip: remote_ip,
        };

        let verification: Verification = self
            .http
            .post(&self.verify_url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(
            "Turnstile answered success={} host={:?}",
            verification.success, verification.hostname
        );

        Ok(verification)
    }
}
