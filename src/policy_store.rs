//! Process-wide traffic-split policy, kept fresh by background polling.
//!
//! The current [`PolicySnapshot`] lives in an [`ArcSwap`]. Request handlers
//! load it without taking a lock and always see one complete snapshot; the
//! refresh path builds a new snapshot off to the side and swaps the pointer.
//! A failed refresh leaves the previous snapshot in place.

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{GatewayError, GatewayResult, PolicyError};
use crate::policy::Policy;
use crate::policy_source::PolicySource;

/// The policy visible to readers, with provenance
#[derive(Debug)]
pub struct PolicySnapshot {
    pub policy: Arc<Policy>,
    /// Starts at 1 and increases each time a changed document is swapped in
    pub version: u64,
    pub fetched_at: DateTime<Utc>,
    /// Hex SHA-256 of the raw document
    pub digest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyStatus {
    pub source: String,
    pub version: u64,
    pub digest: String,
    pub fetched_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u64,
    pub last_error: Option<String>,
    pub refresh_loop_started: bool,
}

pub struct PolicyStore {
    source: Arc<dyn PolicySource>,
    snapshot: ArcSwap<PolicySnapshot>,
    // Serializes writers only; readers never touch it.
    refresh_lock: Mutex<()>,
    consecutive_failures: AtomicU64,
    last_error: ArcSwapOption<String>,
    last_checked_ms: AtomicI64,
    loop_started: AtomicBool,
}

impl PolicyStore {
    /// Fetch the initial policy. Fails with `PolicyBootstrapFailed` when the
    /// source cannot produce a valid document.
    pub async fn bootstrap(source: Arc<dyn PolicySource>) -> GatewayResult<Self> {
        let address = source.address();
        let (policy, digest) = fetch_policy(source.as_ref())
            .await
            .map_err(|e| GatewayError::policy_bootstrap(&address, e))?;

        info!(
            source = %address,
            variants = policy.len(),
            total_weight = policy.total_weight(),
            "policy bootstrapped"
        );

        let now = Utc::now();
        Ok(Self {
            source,
            snapshot: ArcSwap::from_pointee(PolicySnapshot {
                policy: Arc::new(policy),
                version: 1,
                fetched_at: now,
                digest,
            }),
            refresh_lock: Mutex::new(()),
            consecutive_failures: AtomicU64::new(0),
            last_error: ArcSwapOption::empty(),
            last_checked_ms: AtomicI64::new(now.timestamp_millis()),
            loop_started: AtomicBool::new(false),
        })
    }

    /// Latest successfully fetched policy. Never blocks.
    pub fn current(&self) -> Arc<Policy> {
        Arc::clone(&self.snapshot.load().policy)
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.snapshot.load_full()
    }

    pub fn source_address(&self) -> String {
        self.source.address()
    }

    /// Fetch and swap in a new policy.
    ///
    /// Returns `Ok(true)` when a changed document was swapped in and
    /// `Ok(false)` when the document is byte-identical to the current one.
    /// On error the current snapshot is kept.
    pub async fn refresh(&self) -> GatewayResult<bool> {
        let _writer = self.refresh_lock.lock().await;
        self.last_checked_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);

        let (policy, digest) = match fetch_policy(self.source.as_ref()).await {
            Ok(fetched) => fetched,
            Err(source) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                self.last_error.store(Some(Arc::new(source.to_string())));
                return Err(GatewayError::policy_fetch(self.source.address(), source));
            }
        };

        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_error.store(None);

        let current = self.snapshot.load();
        if current.digest == digest {
            debug!(version = current.version, "policy document unchanged");
            return Ok(false);
        }

        let version = current.version + 1;
        self.snapshot.store(Arc::new(PolicySnapshot {
            policy: Arc::new(policy),
            version,
            fetched_at: Utc::now(),
            digest,
        }));

        info!(version, "policy refreshed");
        Ok(true)
    }

    /// Spawn the refresh loop. Only one loop may ever run per store; the
    /// loop exits when `cancel` fires, interrupting an in-flight fetch.
    pub fn start(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> GatewayResult<JoinHandle<()>> {
        if interval.is_zero() {
            return Err(GatewayError::config("policy refresh interval must be non-zero"));
        }
        if self.loop_started.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::internal(format!(
                "refresh loop for {} already started",
                self.source.address()
            )));
        }

        let store = Arc::clone(self);
        Ok(tokio::spawn(async move {
            store.run_refresh_loop(interval, cancel).await;
        }))
    }

    async fn run_refresh_loop(&self, interval: Duration, cancel: CancellationToken) {
        // Bootstrap already fetched, so the first tick is one interval out.
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(source = %self.source.address(), ?interval, "policy refresh loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.refresh() => {
                    if let Err(err) = result {
                        warn!(
                            error = %err,
                            consecutive_failures = self.consecutive_failures.load(Ordering::Relaxed),
                            "policy refresh failed, keeping previous policy"
                        );
                    }
                }
            }
        }

        info!(source = %self.source.address(), "policy refresh loop stopped");
    }

    pub fn status(&self) -> PolicyStatus {
        let snapshot = self.snapshot.load();
        PolicyStatus {
            source: self.source.address(),
            version: snapshot.version,
            digest: snapshot.digest.clone(),
            fetched_at: snapshot.fetched_at,
            last_checked_at: DateTime::from_timestamp_millis(
                self.last_checked_ms.load(Ordering::Relaxed),
            ),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_error: self.last_error.load_full().map(|e| e.as_ref().clone()),
            refresh_loop_started: self.loop_started.load(Ordering::SeqCst),
        }
    }
}

async fn fetch_policy(source: &dyn PolicySource) -> Result<(Policy, String), PolicyError> {
    let raw = source.fetch().await?;
    let policy = Policy::from_json(&raw)?;
    let digest = format!("{:x}", Sha256::digest(&raw));
    Ok((policy, digest))
}
