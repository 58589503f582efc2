//! Model-serving collaborator

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::errors::ClientError;
use crate::feature_store::FeatureSet;

/// Opaque result of one inference call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommendation_id: String,
}

#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        variant: &str,
        features: &FeatureSet,
    ) -> Result<Recommendation, ClientError>;
}

/// Calls `POST {base_url}/{variant}/recommend` with the features as JSON
pub struct HttpModelClient {
    http: Client,
    base_url: String,
}

impl HttpModelClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Endpoint for a variant, with the variant name percent-encoded as a
    /// single path segment.
    pub fn endpoint(&self, variant: &str) -> Result<Url, ClientError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ClientError::rejected(format!("invalid model base url {}: {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                ClientError::rejected(format!("model base url {} cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .push(variant)
            .push("recommend");
        Ok(url)
    }
}

#[async_trait]
impl ModelInvoker for HttpModelClient {
    async fn invoke(
        &self,
        variant: &str,
        features: &FeatureSet,
    ) -> Result<Recommendation, ClientError> {
        let url = self.endpoint(variant)?;
        let response = self
            .http
            .post(url.clone())
            .json(features)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<Recommendation>()
            .await
            .map_err(|source| ClientError::Decode {
                url: url.to_string(),
                source,
            })
    }
}
