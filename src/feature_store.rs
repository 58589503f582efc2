//! Feature store collaborator
//!
//! [`FeatureProvider`] is the seam the orchestrator calls. [`TinybirdClient`]
//! implements it against a Tinybird-style pipe endpoint and also exposes the
//! event ingestion endpoint used to record served predictions.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::ClientError;
use crate::input_validator::Subject;
use crate::orchestrator::{PredictionEvent, PredictionSink};

/// Feature name -> scalar or string value, owned by one request
pub type FeatureSet = serde_json::Map<String, serde_json::Value>;

#[async_trait]
pub trait FeatureProvider: Send + Sync {
    async fn get_features(&self, subject: &Subject) -> Result<FeatureSet, ClientError>;
}

pub struct TinybirdClient {
    http: Client,
    host: String,
    token: String,
    pipe: String,
}

#[derive(Deserialize)]
struct PipeResponse {
    #[serde(default)]
    data: Vec<FeatureSet>,
}

impl TinybirdClient {
    pub fn new(
        http: Client,
        host: impl Into<String>,
        token: impl Into<String>,
        pipe: impl Into<String>,
    ) -> Self {
        Self {
            http,
            host: host.into().trim_end_matches('/').to_string(),
            token: token.into(),
            pipe: pipe.into(),
        }
    }

    /// Append a JSON payload to a datasource
    pub async fn ingest<T: Serialize + ?Sized>(
        &self,
        datasource: &str,
        payload: &T,
    ) -> Result<(), ClientError> {
        let url = format!("{}/v0/events", self.host);
        let response = self
            .http
            .post(&url)
            .query(&[("name", datasource)])
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FeatureProvider for TinybirdClient {
    async fn get_features(&self, subject: &Subject) -> Result<FeatureSet, ClientError> {
        let url = format!("{}/v0/pipes/{}.json", self.host, self.pipe);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("user_id", subject.identity.as_str()),
                ("game_id", subject.context.as_str()),
            ])
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body: PipeResponse = response
            .json()
            .await
            .map_err(|source| ClientError::Decode { url, source })?;

        // No row for this user yet: serve with an empty feature set.
        Ok(body.data.into_iter().next().unwrap_or_default())
    }
}

/// Records served predictions into a Tinybird datasource
pub struct TinybirdEventSink {
    client: Arc<TinybirdClient>,
    datasource: String,
}

impl TinybirdEventSink {
    pub fn new(client: Arc<TinybirdClient>, datasource: impl Into<String>) -> Self {
        Self {
            client,
            datasource: datasource.into(),
        }
    }
}

#[async_trait]
impl PredictionSink for TinybirdEventSink {
    async fn record(&self, event: &PredictionEvent) -> Result<(), ClientError> {
        self.client.ingest(&self.datasource, event).await
    }
}
