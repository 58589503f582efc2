// src/tests/test_utils.rs
// In-memory collaborators shared by the unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::errors::{ClientError, PolicyError};
use crate::feature_store::{FeatureProvider, FeatureSet};
use crate::input_validator::Subject;
use crate::model_client::{ModelInvoker, Recommendation};
use crate::orchestrator::{PredictionEvent, PredictionSink};
use crate::policy_source::PolicySource;
use crate::policy_store::PolicyStore;

/// Policy source serving a swappable document
pub struct ScriptedSource {
    document: Mutex<String>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(document: &str) -> Self {
        Self {
            document: Mutex::new(document.to_string()),
            failing: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        let source = Self::new("{}");
        source.set_failing(true);
        source
    }

    pub fn set_document(&self, document: &str) {
        *self.document.lock().unwrap() = document.to_string();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicySource for ScriptedSource {
    fn address(&self) -> String {
        "mem://scripted".to_string()
    }

    async fn fetch(&self) -> Result<Vec<u8>, PolicyError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PolicyError::NotFound {
                address: self.address(),
            });
        }
        Ok(self.document.lock().unwrap().clone().into_bytes())
    }
}

pub async fn store_with(document: &str) -> Arc<PolicyStore> {
    let source = Arc::new(ScriptedSource::new(document));
    Arc::new(PolicyStore::bootstrap(source).await.unwrap())
}

#[derive(Clone, Copy)]
pub enum Behavior {
    Succeed,
    FailWith(u16),
    Hang,
}

pub struct ScriptedFeatures {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl ScriptedFeatures {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureProvider for ScriptedFeatures {
    async fn get_features(&self, subject: &Subject) -> Result<FeatureSet, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => {
                let mut features = FeatureSet::new();
                features.insert("user_id".into(), subject.identity.clone().into());
                features.insert("sessions_7d".into(), 12.into());
                Ok(features)
            }
            Behavior::FailWith(status) => Err(ClientError::Status {
                url: "mem://features".into(),
                status,
            }),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

pub struct ScriptedModel {
    behavior: Behavior,
    calls: AtomicUsize,
    variants: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            variants: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn variants(&self) -> Vec<String> {
        self.variants.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedModel {
    async fn invoke(
        &self,
        variant: &str,
        features: &FeatureSet,
    ) -> Result<Recommendation, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.variants.lock().unwrap().push(variant.to_string());
        match self.behavior {
            Behavior::Succeed => Ok(Recommendation {
                recommendation_id: format!(
                    "{variant}:{}",
                    features.get("user_id").and_then(|v| v.as_str()).unwrap_or("-")
                ),
            }),
            Behavior::FailWith(status) => Err(ClientError::Status {
                url: format!("mem://models/{variant}"),
                status,
            }),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PredictionEvent>>,
    pub recorded: Notify,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<PredictionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl PredictionSink for RecordingSink {
    async fn record(&self, event: &PredictionEvent) -> Result<(), ClientError> {
        self.events.lock().unwrap().push(event.clone());
        self.recorded.notify_one();
        Ok(())
    }
}
