// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{RhsClient, RhsNode};
use crate::errors::PublishError;

#[derive(Debug, Clone)]
pub struct HttpRhsClient {
    base_url: String,
    client: Client,
}

impl HttpRhsClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Permanent(e.to_string()))?;
        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RhsClient for HttpRhsClient {
    async fn save_nodes(&self, nodes: &[RhsNode]) -> Result<(), PublishError> {
        let url = format!("{}/node", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(nodes)
            .send()
            .await
            .map_err(|e| PublishError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            debug!(count = nodes.len(), "rhs batch accepted");
            return Ok(());
        }
        let msg = format!("RHS upsert failed: {}", status);
        if status.is_client_error() {
            Err(PublishError::Permanent(msg))
        } else {
            Err(PublishError::Transient(msg))
        }
    }
}
