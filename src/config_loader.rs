use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{GatewayError, GatewayResult};
use crate::orchestrator::TimeoutBudget;

pub const DEFAULT_CONFIG_FILE: &str = "gateway.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
    pub log_level: String,
    pub model_base_url: String,
    #[serde(default)]
    pub feature_store: FeatureStoreConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeatureStoreConfig {
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub pipe: String,
    /// Datasource that receives served predictions; unset disables recording
    #[serde(default)]
    pub events_datasource: Option<String>,
}

impl Default for FeatureStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7181".into(),
            token: String::new(),
            pipe: "user_features".into(),
            events_datasource: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySourceKind {
    Object,
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    pub source: PolicySourceKind,
    pub endpoint: String,
    #[serde(default)]
    pub bucket: String,
    pub key: String,
    pub region: String,
    /// Static credentials; unset falls back to the AWS environment and
    /// instance credentials
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    pub refresh_interval_secs: u64,
    pub fallback_variant: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            source: PolicySourceKind::Object,
            endpoint: "http://localhost:9000".into(),
            bucket: String::new(),
            key: "ab_config.json".into(),
            region: "us-east-1".into(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            path: None,
            refresh_interval_secs: 10,
            fallback_variant: "training".into(),
        }
    }
}

impl PolicyConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    pub request_ms: u64,
    pub features_ms: u64,
    pub inference_ms: u64,
    pub http_client_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 20_000,
            features_ms: 10_000,
            inference_ms: 10_000,
            http_client_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn budget(&self) -> TimeoutBudget {
        TimeoutBudget {
            request: Duration::from_millis(self.request_ms),
            features: Duration::from_millis(self.features_ms),
            inference: Duration::from_millis(self.inference_ms),
        }
    }

    pub fn http_client(&self) -> Duration {
        Duration::from_millis(self.http_client_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            env: "development".into(),
            log_level: "info".into(),
            model_base_url: "http://localhost:8000".into(),
            feature_store: FeatureStoreConfig::default(),
            policy: PolicyConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.port == 0 {
            return Err(GatewayError::config("port must be non-zero"));
        }
        if self.policy.refresh_interval_secs == 0 {
            return Err(GatewayError::config(
                "policy.refresh_interval_secs must be non-zero",
            ));
        }
        if self.policy.fallback_variant.trim().is_empty() {
            return Err(GatewayError::config("policy.fallback_variant must be set"));
        }
        match self.policy.source {
            PolicySourceKind::Object if self.policy.bucket.trim().is_empty() => {
                return Err(GatewayError::config(
                    "policy.bucket must be set for the object source",
                ));
            }
            PolicySourceKind::Object
                if self.policy.access_key_id.is_some() != self.policy.secret_access_key.is_some() =>
            {
                return Err(GatewayError::config(
                    "policy.access_key_id and policy.secret_access_key must be set together",
                ));
            }
            PolicySourceKind::File if self.policy.path.is_none() => {
                return Err(GatewayError::config(
                    "policy.path must be set for the file source",
                ));
            }
            _ => {}
        }
        let t = &self.timeouts;
        if [t.request_ms, t.features_ms, t.inference_ms, t.http_client_ms].contains(&0) {
            return Err(GatewayError::config("timeouts must be non-zero"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Layer defaults, an optional TOML file and `GATEWAY_*` environment
/// variables (nested keys use `__`, e.g. `GATEWAY_POLICY__BUCKET`).
pub fn figment(config_path: Option<&Path>) -> Figment {
    let path = config_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("GATEWAY_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    Figment::from(Serialized::defaults(GatewayConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("GATEWAY_").ignore(&["config"]).split("__"))
}

pub fn load_config(config_path: Option<&Path>) -> GatewayResult<GatewayConfig> {
    let config: GatewayConfig = figment(config_path).extract()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_need_only_a_bucket() {
        Jail::expect_with(|jail| {
            jail.set_env("GATEWAY_POLICY__BUCKET", "ab-configs");

            let config = load_config(None).expect("config should load");
            assert_eq!(config.port, 8080);
            assert_eq!(config.policy.bucket, "ab-configs");
            assert_eq!(config.policy.refresh_interval(), Duration::from_secs(10));
            assert_eq!(config.policy.fallback_variant, "training");
            assert_eq!(config.timeouts.budget(), TimeoutBudget::default());
            Ok(())
        });
    }

    #[test]
    fn missing_bucket_fails_validation() {
        Jail::expect_with(|_jail| {
            let err = load_config(None).unwrap_err();
            assert!(err.to_string().contains("policy.bucket"));
            Ok(())
        });
    }

    #[test]
    fn toml_file_is_overridden_by_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "gateway.toml",
                r#"
                    port = 9090
                    model_base_url = "http://models:8000"

                    [policy]
                    source = "file"
                    path = "policy.json"
                    refresh_interval_secs = 30

                    [timeouts]
                    features_ms = 250
                "#,
            )?;
            jail.set_env("GATEWAY_PORT", "7070");

            let config = load_config(None).expect("config should load");
            assert_eq!(config.port, 7070);
            assert_eq!(config.model_base_url, "http://models:8000");
            assert_eq!(config.policy.source, PolicySourceKind::File);
            assert_eq!(config.policy.refresh_interval_secs, 30);
            assert_eq!(config.timeouts.features_ms, 250);
            assert_eq!(config.timeouts.inference_ms, 10_000);
            Ok(())
        });
    }

    #[test]
    fn half_configured_static_credentials_are_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("GATEWAY_POLICY__BUCKET", "b");
            jail.set_env("GATEWAY_POLICY__ACCESS_KEY_ID", "AKIDEXAMPLE");
            let err = load_config(None).unwrap_err();
            assert!(err.to_string().contains("secret_access_key"));

            jail.set_env("GATEWAY_POLICY__SECRET_ACCESS_KEY", "secret");
            let config = load_config(None).expect("config should load");
            assert_eq!(config.policy.region, "us-east-1");
            Ok(())
        });
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("GATEWAY_POLICY__BUCKET", "b");
            jail.set_env("GATEWAY_TIMEOUTS__INFERENCE_MS", "0");
            assert!(load_config(None).is_err());
            Ok(())
        });
    }
}
