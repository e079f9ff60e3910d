//! Downstream health aggregation.
//!
//! Every backend is probed concurrently on each `/health` request; nothing
//! is cached. A slow or failing backend only affects its own entry, and so
//! does a probe task that dies: its backend is reported down.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use threshold_config::HealthConfig;

use crate::backends::{Backend, BackendRegistry};

/// Reachability of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    /// Answered its health endpoint with a 2xx.
    Up,
    /// Timed out, refused, or answered with a non-2xx.
    Down,
}

/// Aggregate health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every backend is up.
    Healthy,
    /// At least one backend is down.
    Unhealthy,
}

/// Probe result for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    /// Up or down.
    pub status: BackendStatus,
    /// Round trip of the probe, when one completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Why the backend is down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackendHealth {
    fn up(elapsed: Duration) -> Self {
        Self {
            status: BackendStatus::Up,
            response_time_ms: Some(millis(elapsed)),
            error: None,
        }
    }

    fn down(elapsed: Option<Duration>, error: impl Into<String>) -> Self {
        Self {
            status: BackendStatus::Down,
            response_time_ms: elapsed.map(millis),
            error: Some(error.into()),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// The folded result of one health round.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// Healthy iff every backend is up.
    pub status: HealthStatus,
    /// Per-backend entries keyed by backend name.
    pub backends: BTreeMap<String, BackendHealth>,
    /// Gateway uptime in seconds.
    pub uptime: u64,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Folds per-backend results into a snapshot.
    pub fn fold(backends: BTreeMap<String, BackendHealth>, uptime: Duration) -> Self {
        let status = if backends.values().all(|b| b.status == BackendStatus::Up) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            status,
            backends,
            uptime: uptime.as_secs(),
            timestamp: Utc::now(),
        }
    }

    /// Returns `true` when every backend is up.
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Fans health probes out to every registered backend.
#[derive(Debug, Clone)]
pub struct HealthAggregator {
    client: reqwest::Client,
    backends: BackendRegistry,
    probe_timeout: Duration,
    probe_path: Arc<str>,
    started_at: Instant,
}

impl HealthAggregator {
    /// Creates an aggregator over `backends`.
    pub fn new(client: reqwest::Client, backends: BackendRegistry, config: &HealthConfig) -> Self {
        Self {
            client,
            backends,
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            probe_path: Arc::from(config.probe_path.as_str()),
            started_at: Instant::now(),
        }
    }

    /// Time since the aggregator was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Probes every backend and folds the results.
    pub async fn check(&self) -> HealthSnapshot {
        let mut probes = JoinSet::new();
        for backend in self.backends.iter() {
            let client = self.client.clone();
            let backend = Arc::clone(backend);
            let path = Arc::clone(&self.probe_path);
            let timeout = self.probe_timeout;
            probes.spawn(async move {
                let health = probe(&client, &backend, &path, timeout).await;
                (backend.name().to_string(), health)
            });
        }

        let names = self.backends.iter().map(|b| b.name().to_string());
        let results = collect_probes(probes, names).await;
        HealthSnapshot::fold(results, self.uptime())
    }
}

/// Drains `probes`. Any of `expected` without a result is reported down.
async fn collect_probes(
    mut probes: JoinSet<(String, BackendHealth)>,
    expected: impl IntoIterator<Item = String>,
) -> BTreeMap<String, BackendHealth> {
    let mut results = BTreeMap::new();
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok((name, health)) => {
                if health.status == BackendStatus::Down {
                    tracing::warn!(
                        backend = %name,
                        error = health.error.as_deref().unwrap_or_default(),
                        "backend health probe failed"
                    );
                }
                results.insert(name, health);
            }
            Err(e) => tracing::error!(error = %e, "health probe task failed"),
        }
    }

    for name in expected {
        results
            .entry(name)
            .or_insert_with(|| BackendHealth::down(None, "probe task failed"));
    }
    results
}

async fn probe(
    client: &reqwest::Client,
    backend: &Backend,
    path: &str,
    timeout: Duration,
) -> BackendHealth {
    let url = format!("{}{}", backend.base_url(), path);
    let started = Instant::now();

    let outcome = tokio::time::timeout(timeout, client.get(&url).timeout(timeout).send()).await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(Ok(response)) if response.status().is_success() => BackendHealth::up(elapsed),
        Ok(Ok(response)) => BackendHealth::down(
            Some(elapsed),
            format!("unhealthy status {}", response.status().as_u16()),
        ),
        Ok(Err(e)) if e.is_timeout() => {
            BackendHealth::down(None, format!("timed out after {}ms", timeout.as_millis()))
        }
        Ok(Err(e)) => BackendHealth::down(None, format!("unreachable: {e}")),
        Err(_) => BackendHealth::down(None, format!("timed out after {}ms", timeout.as_millis())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use threshold_config::BackendConfig;

    fn entries(statuses: &[(&str, bool)]) -> BTreeMap<String, BackendHealth> {
        statuses
            .iter()
            .map(|(name, up)| {
                let health = if *up {
                    BackendHealth::up(Duration::from_millis(12))
                } else {
                    BackendHealth::down(None, "unreachable")
                };
                ((*name).to_string(), health)
            })
            .collect()
    }

    #[test]
    fn test_all_up_is_healthy() {
        let snapshot = HealthSnapshot::fold(
            entries(&[("identity", true), ("listings", true)]),
            Duration::from_secs(90),
        );
        assert!(snapshot.is_healthy());
        assert_eq!(snapshot.uptime, 90);
    }

    #[test]
    fn test_one_down_is_unhealthy() {
        let snapshot = HealthSnapshot::fold(
            entries(&[
                ("identity", true),
                ("listings", true),
                ("messaging", false),
                ("search", true),
            ]),
            Duration::ZERO,
        );
        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        assert_eq!(snapshot.backends["messaging"].status, BackendStatus::Down);
        assert_eq!(snapshot.backends["search"].status, BackendStatus::Up);
    }

    #[test]
    fn test_serialized_shape() {
        let snapshot = HealthSnapshot::fold(
            entries(&[("identity", true), ("search", false)]),
            Duration::from_secs(5),
        );
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["backends"]["identity"]["status"], "up");
        assert_eq!(json["backends"]["identity"]["responseTimeMs"], 12);
        assert!(json["backends"]["identity"].get("error").is_none());
        assert_eq!(json["backends"]["search"]["status"], "down");
        assert_eq!(json["backends"]["search"]["error"], "unreachable");
        assert!(json["backends"]["search"].get("responseTimeMs").is_none());
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_down() {
        let registry = BackendRegistry::from_config(&[BackendConfig::new(
            "identity",
            "http://127.0.0.1:1",
        )])
        .unwrap();
        let aggregator = HealthAggregator::new(
            reqwest::Client::new(),
            registry,
            &HealthConfig::default(),
        );

        let snapshot = aggregator.check().await;
        assert!(!snapshot.is_healthy());
        assert!(snapshot.backends["identity"].error.is_some());
    }

    #[tokio::test]
    async fn test_no_backends_is_healthy() {
        let aggregator = HealthAggregator::new(
            reqwest::Client::new(),
            BackendRegistry::default(),
            &HealthConfig::default(),
        );
        assert!(aggregator.check().await.is_healthy());
    }

    async fn crashing_check() -> (String, BackendHealth) {
        panic!("health check crashed")
    }

    #[tokio::test]
    async fn test_failed_health_task_only_marks_its_backend() {
        let mut probes = JoinSet::new();
        for name in ["identity", "listings", "search"] {
            probes.spawn(async move { (name.to_string(), BackendHealth::up(Duration::from_millis(3))) });
        }
        probes.spawn(crashing_check());

        let names = ["identity", "listings", "messaging", "search"].map(String::from);
        let snapshot = HealthSnapshot::fold(collect_probes(probes, names).await, Duration::ZERO);

        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        assert_eq!(snapshot.backends.len(), 4);
        assert_eq!(snapshot.backends["identity"].status, BackendStatus::Up);
        assert_eq!(snapshot.backends["listings"].status, BackendStatus::Up);
        assert_eq!(snapshot.backends["search"].status, BackendStatus::Up);
        assert_eq!(snapshot.backends["messaging"].status, BackendStatus::Down);
        assert_eq!(
            snapshot.backends["messaging"].error.as_deref(),
            Some("probe task failed")
        );
    }
}
