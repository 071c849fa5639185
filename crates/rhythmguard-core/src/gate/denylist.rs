//! Denylist API gate -- toggles one denylist entry of a DNS filtering profile.
//!
//! `PATCH {base}/profiles/{profile}/denylist/{domain}` with `{"active": bool}`.
//! Responses that mean "already in that state" count as success.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use url::Url;

use super::AccessGate;
use crate::error::GateError;
use crate::storage::GateConfig;

const API_KEY_HEADER: &str = "X-Api-Key";

pub struct DenylistGate {
    client: Client,
    api_key: String,
    entry_url: Url,
    list_url: Url,
    domain: String,
}

impl DenylistGate {
    pub fn new(config: &GateConfig, api_key: impl Into<String>) -> Result<Self, GateError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| GateError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if config.profile_id.trim().is_empty() {
            return Err(GateError::InvalidUrl("gate.profile_id is empty".into()));
        }
        if config.domain.trim().is_empty() {
            return Err(GateError::InvalidUrl("gate.domain is empty".into()));
        }

        let list_url = with_segments(&base, &["profiles", &config.profile_id, "denylist"])?;
        let entry_url = with_segments(&list_url, &[&config.domain])?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            entry_url,
            list_url,
            domain: config.domain.clone(),
        })
    }

    async fn set_active(&self, active: bool) -> Result<(), GateError> {
        let resp = self
            .client
            .patch(self.entry_url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&json!({ "active": active }))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            tracing::debug!(domain = %self.domain, active, %status, "denylist entry updated");
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            if !active {
                // No entry means nothing is blocked.
                tracing::debug!(domain = %self.domain, "denylist entry absent, already unblocked");
                return Ok(());
            }
            return self.create_entry().await;
        }

        let body = resp.text().await.unwrap_or_default();
        Err(GateError::Http {
            status: status.as_u16(),
            body,
        })
    }

    async fn create_entry(&self) -> Result<(), GateError> {
        let resp = self
            .client
            .post(self.list_url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&json!({ "id": self.domain, "active": true }))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            tracing::info!(domain = %self.domain, "denylist entry created");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(GateError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl AccessGate for DenylistGate {
    fn name(&self) -> &str {
        "denylist"
    }

    async fn unblock(&self) -> Result<(), GateError> {
        self.set_active(false).await
    }

    async fn block(&self) -> Result<(), GateError> {
        self.set_active(true).await
    }
}

fn with_segments(base: &Url, segments: &[&str]) -> Result<Url, GateError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| GateError::InvalidUrl(format!("{base} cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
