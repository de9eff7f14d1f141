use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    board::CommentBoard,
    client::CommentsClient,
    config::{ProxyConfig, SiteConfig},
    store::{ObjectStore, open_store},
    verify::{ChallengeVerifier, TurnstileVerifier},
};

pub struct ProxyState {
    pub config: ProxyConfig,
    pub board: CommentBoard,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> Result<Arc<Self>> {
        let store = open_store(config.store_backend, &config.data_dir).with_context(|| {
            format!("Failed to open object store at {}", config.data_dir.display())
        })?;

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: ProxyConfig, store: Arc<dyn ObjectStore>) -> Arc<Self> {
        let board = CommentBoard::new(store, config.store_timeout, config.write_attempts);

        Arc::new(Self { config, board })
    }
}

pub struct SiteState {
    pub config: SiteConfig,
    pub comments: CommentsClient,
    pub verifier: Arc<dyn ChallengeVerifier>,
}

impl SiteState {
    pub fn new(config: SiteConfig) -> Result<Arc<Self>> {
        let verifier = TurnstileVerifier::new(
            config.verify_url.clone(),
            config.turnstile_secret.clone(),
            config.request_timeout,
        )
        .context("Failed to build verification client")?;

        Self::with_verifier(config, Arc::new(verifier))
    }

    pub fn with_verifier(
        config: SiteConfig,
        verifier: Arc<dyn ChallengeVerifier>,
    ) -> Result<Arc<Self>> {
        let comments = CommentsClient::new(&config).context("Failed to build proxy client")?;

        Ok(Arc::new(Self {
            config,
            comments,
            verifier,
        }))
    }
}
