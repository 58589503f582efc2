use chrono::{DateTime, Utc};
use reqwest::Client;
use std::sync::Arc;

use crate::{
    config_loader::{GatewayConfig, PolicySourceKind},
    errors::{GatewayError, GatewayResult},
    feature_store::{TinybirdClient, TinybirdEventSink},
    model_client::HttpModelClient,
    orchestrator::Orchestrator,
    policy_source::{FileSource, ObjectStoreSource, PolicySource},
    policy_store::PolicyStore,
};

pub struct AppState {
    pub env: String,
    pub started_at: DateTime<Utc>,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(env: impl Into<String>, orchestrator: Orchestrator) -> Self {
        Self {
            env: env.into(),
            started_at: Utc::now(),
            orchestrator,
        }
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        self.orchestrator.policy()
    }

    /// Wire the production collaborators. Fails if the initial policy fetch
    /// fails; the refresh loop is started separately by the caller.
    pub async fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let http = build_http_client(config)?;
        let policy = Arc::new(bootstrap_policy_store(config).await?);

        let tinybird = Arc::new(TinybirdClient::new(
            http.clone(),
            config.feature_store.url.clone(),
            config.feature_store.token.clone(),
            config.feature_store.pipe.clone(),
        ));
        let models = Arc::new(HttpModelClient::new(http, config.model_base_url.clone()));

        let mut orchestrator = Orchestrator::new(
            tinybird.clone(),
            models,
            policy,
            config.policy.fallback_variant.clone(),
            config.timeouts.budget(),
        );
        if let Some(datasource) = &config.feature_store.events_datasource {
            tracing::info!(datasource = %datasource, "recording served predictions");
            orchestrator = orchestrator.with_sink(Arc::new(TinybirdEventSink::new(
                tinybird,
                datasource.clone(),
            )));
        }

        Ok(Self::new(config.env.clone(), orchestrator))
    }
}

pub fn build_http_client(config: &GatewayConfig) -> GatewayResult<Client> {
    Client::builder()
        .timeout(config.timeouts.http_client())
        .build()
        .map_err(|e| GatewayError::config(format!("failed to build HTTP client: {e}")))
}

pub fn policy_source(config: &GatewayConfig) -> GatewayResult<Arc<dyn PolicySource>> {
    let policy = &config.policy;
    match policy.source {
        PolicySourceKind::Object => Ok(Arc::new(ObjectStoreSource::s3(
            policy,
            config.timeouts.http_client(),
        )?)),
        PolicySourceKind::File => {
            let path = policy
                .path
                .clone()
                .ok_or_else(|| GatewayError::config("policy.path must be set for the file source"))?;
            Ok(Arc::new(FileSource::new(path)))
        }
    }
}

pub async fn bootstrap_policy_store(config: &GatewayConfig) -> GatewayResult<PolicyStore> {
    PolicyStore::bootstrap(policy_source(config)?).await
}
