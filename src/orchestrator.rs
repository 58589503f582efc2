//! Request orchestration: features -> variant selection -> inference.
//!
//! Every request walks the same linear path
//! `Start -> FeaturesFetched -> VariantSelected -> InferenceCompleted -> Responded`
//! and drops to `Errored` on the first upstream failure. There are no retries
//! here; a failed call fails the request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{ClientError, GatewayError, GatewayResult, Stage};
use crate::feature_store::FeatureProvider;
use crate::input_validator::Subject;
use crate::model_client::{ModelInvoker, Recommendation};
use crate::policy_store::PolicyStore;
use crate::variant_selector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Start,
    FeaturesFetched,
    VariantSelected,
    InferenceCompleted,
    Responded,
    Errored,
}

/// Time allowed for a whole request and for each upstream call within it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBudget {
    pub request: Duration,
    pub features: Duration,
    pub inference: Duration,
}

impl Default for TimeoutBudget {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(20),
            features: Duration::from_secs(10),
            inference: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prediction {
    #[serde(flatten)]
    pub recommendation: Recommendation,
    pub variant: String,
    pub policy_version: u64,
}

/// Record of one served prediction
#[derive(Debug, Clone, Serialize)]
pub struct PredictionEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub game_id: String,
    pub user_id: String,
    pub variant: String,
    pub recommendation_id: String,
    pub policy_version: u64,
    pub latency_ms: u64,
}

/// Destination for served predictions. Failures are logged, never returned
/// to the caller.
#[async_trait]
pub trait PredictionSink: Send + Sync {
    async fn record(&self, event: &PredictionEvent) -> Result<(), ClientError>;
}

pub struct Orchestrator {
    features: Arc<dyn FeatureProvider>,
    models: Arc<dyn ModelInvoker>,
    policy: Arc<PolicyStore>,
    fallback_variant: String,
    budget: TimeoutBudget,
    sink: Option<Arc<dyn PredictionSink>>,
}

impl Orchestrator {
    pub fn new(
        features: Arc<dyn FeatureProvider>,
        models: Arc<dyn ModelInvoker>,
        policy: Arc<PolicyStore>,
        fallback_variant: impl Into<String>,
        budget: TimeoutBudget,
    ) -> Self {
        Self {
            features,
            models,
            policy,
            fallback_variant: fallback_variant.into(),
            budget,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PredictionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    /// Validate raw identifiers, then predict
    pub async fn predict_for(&self, game_id: &str, user_id: &str) -> GatewayResult<Prediction> {
        let subject = Subject::new(game_id, user_id)?;
        self.predict(&subject).await
    }

    pub async fn predict(&self, subject: &Subject) -> GatewayResult<Prediction> {
        let started = Instant::now();
        let deadline = started + self.budget.request;
        let mut state = RequestState::Start;

        let features = match self
            .bounded(
                Stage::Features,
                self.budget.features,
                deadline,
                self.features.get_features(subject),
            )
            .await
        {
            Ok(features) => features,
            Err(err) => return Err(fail(state, subject, err)),
        };
        advance(&mut state, RequestState::FeaturesFetched, subject);

        let snapshot = self.policy.snapshot();
        let variant =
            variant_selector::choose(&snapshot.policy, &self.fallback_variant, &mut rand::rng())
                .to_string();
        advance(&mut state, RequestState::VariantSelected, subject);
        info!(
            user_id = %subject.identity,
            model = %variant,
            policy_version = snapshot.version,
            "model selected"
        );

        let recommendation = match self
            .bounded(
                Stage::Inference,
                self.budget.inference,
                deadline,
                self.models.invoke(&variant, &features),
            )
            .await
        {
            Ok(recommendation) => recommendation,
            Err(err) => return Err(fail(state, subject, err)),
        };
        advance(&mut state, RequestState::InferenceCompleted, subject);

        let prediction = Prediction {
            recommendation,
            variant,
            policy_version: snapshot.version,
        };
        self.emit(subject, &prediction, started.elapsed());
        advance(&mut state, RequestState::Responded, subject);

        Ok(prediction)
    }

    /// Run one upstream call under `min(stage_timeout, time left before deadline)`.
    async fn bounded<T, F>(
        &self,
        stage: Stage,
        stage_timeout: Duration,
        deadline: Instant,
        call: F,
    ) -> GatewayResult<T>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let limit = stage_timeout.min(deadline.saturating_duration_since(Instant::now()));
        let timed_out = || {
            GatewayError::upstream(
                stage,
                ClientError::TimedOut {
                    after_ms: limit.as_millis() as u64,
                },
            )
        };

        if limit.is_zero() {
            return Err(timed_out());
        }

        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(GatewayError::upstream(stage, source)),
            Err(_) => Err(timed_out()),
        }
    }

    fn emit(&self, subject: &Subject, prediction: &Prediction, latency: Duration) {
        let Some(sink) = self.sink.clone() else {
            return;
        };

        let event = PredictionEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            game_id: subject.context.clone(),
            user_id: subject.identity.clone(),
            variant: prediction.variant.clone(),
            recommendation_id: prediction.recommendation.recommendation_id.clone(),
            policy_version: prediction.policy_version,
            latency_ms: latency.as_millis() as u64,
        };

        tokio::spawn(async move {
            if let Err(err) = sink.record(&event).await {
                warn!(error = %err, event_id = %event.event_id, "failed to record prediction event");
            }
        });
    }
}

fn advance(state: &mut RequestState, next: RequestState, subject: &Subject) {
    debug!(user_id = %subject.identity, from = ?*state, to = ?next, "request state");
    *state = next;
}

fn fail(state: RequestState, subject: &Subject, err: GatewayError) -> GatewayError {
    error!(
        error = %err,
        user_id = %subject.identity,
        game_id = %subject.context,
        failed_after = ?state,
        to = ?RequestState::Errored,
        "prediction failed"
    );
    err
}
