//! # Proxy Client
//!
//! The site's side of the comment store proxy. Every call sends the shared secret in
//! `X-Custom-Auth-Key`; every call is bounded by the configured request timeout.
//!
//! Reads go through exactly one path for the whole deployment: the authenticated proxy,
//! or, when a public read URL is configured, a plain unauthenticated GET of the object.
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    comments::{Comment, typed_comments},
    config::SiteConfig,
    routes::AUTH_HEADER,
};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Proxy answered {0}")]
    Status(StatusCode),
}

pub struct CommentsClient {
    http: Client,
    proxy_url: String,
    auth_key: String,
    public_read_url: Option<String>,
}

impl CommentsClient {
    pub fn new(config: &SiteConfig) -> Result<Self, ClientError> {
        Ok(Self {
            http: Client::builder().timeout(config.request_timeout).build()?,
            proxy_url: config.proxy_url.clone(),
            auth_key: config.auth_key.clone(),
            public_read_url: config.public_read_url.clone(),
        })
    }

    /// Never fails; a failed fetch is logged and shows as an empty board.
    pub async fn load(&self) -> Vec<Comment> {
        match self.fetch_list().await {
            Ok(list) => {
                let comments = typed_comments(list);
                if comments.is_empty() {
                    debug!("No comments stored");
                }
                comments
            }
            Err(e) => {
                warn!("Failed to load comments, serving empty list: {e}");
                Vec::new()
            }
        }
    }

    async fn fetch_list(&self) -> Result<Vec<Value>, ClientError> {
        let request = match &self.public_read_url {
            Some(url) => self.http.get(url),
            None => self
                .http
                .get(&self.proxy_url)
                .header(AUTH_HEADER, &self.auth_key),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status()));
        }

        Ok(response.json().await?)
    }

    pub async fn create(&self, comment: &Comment) -> Result<(), ClientError> {
        let response = self
            .http
            .put(&self.proxy_url)
            .header(AUTH_HEADER, &self.auth_key)
            .json(comment)
            .send()
            .await?;

        ensure_success(response.status())
    }

    pub async fn delete(&self, timestamp: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(&self.proxy_url)
            .header(AUTH_HEADER, &self.auth_key)
            .json(&json!({ "timestamp": timestamp }))
            .send()
            .await?;

        ensure_success(response.status())
    }
}

fn ensure_success(status: StatusCode) -> Result<(), ClientError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(ClientError::Status(status))
    }
}
