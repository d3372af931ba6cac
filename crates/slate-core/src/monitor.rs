//! Performance monitor: rolling latency, cache, and workload metrics with
//! threshold alerts.
//!
//! The monitor observes; it never acts. Recommendations attached to alerts
//! are informational, and alerts above warning are persisted as
//! `performance_alert` knowledge for other agents to consume.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::{Display, EnumString};
use tokio::sync::{broadcast, RwLock};

use crate::blackboard::Blackboard;
use crate::models::{KnowledgeItem, Space};
use crate::{Result, CONSTITUTIONAL_HASH};

/// Latency samples retained per operation.
const SAMPLE_WINDOW: usize = 1000;

/// P99 latency target in milliseconds.
pub const P99_TARGET_MS: f64 = 5.0;
/// Cache hit-rate target.
pub const CACHE_HIT_TARGET: f64 = 0.85;
/// Throughput target in operations per second.
pub const THROUGHPUT_TARGET_OPS: f64 = 100.0;
/// Workload imbalance bound: busiest over idlest agent.
const WORKLOAD_IMBALANCE_BOUND: f64 = 3.0;

/// Alert severity; everything here is above warning.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertSeverity {
    Medium,
    High,
    Critical,
}

/// A detected bottleneck, paired with a textual remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub metric: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub current_value: f64,
    pub threshold: f64,
    pub recommendation: String,
}

/// Point-in-time metrics view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub p99_latency_ms: f64,
    pub cache_hit_rate: f64,
    pub active_coordinations: u64,
    pub completed_coordinations: u64,
    pub constitutional_hash: String,
}

#[derive(Debug, Default)]
struct MonitorState {
    latencies: HashMap<String, VecDeque<f64>>,
    cache_hits: u64,
    cache_misses: u64,
    agent_workload: HashMap<String, u64>,
    active_coordinations: u64,
    completed_coordinations: u64,
}

/// Observes task and knowledge activity across the substrate.
#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    blackboard: Arc<Blackboard>,
    state: Arc<RwLock<MonitorState>>,
}

impl PerformanceMonitor {
    /// Create a monitor bound to a blackboard.
    #[must_use]
    pub fn new(blackboard: Arc<Blackboard>) -> Self {
        Self {
            blackboard,
            state: Arc::new(RwLock::new(MonitorState::default())),
        }
    }

    /// Record one operation's latency. Samples beyond the window evict the
    /// oldest.
    pub async fn record_operation(&self, operation: &str, latency_ms: f64) {
        let mut state = self.state.write().await;
        let samples = state.latencies.entry(operation.to_owned()).or_default();
        if samples.len() == SAMPLE_WINDOW {
            samples.pop_front();
        }
        samples.push_back(latency_ms);
    }

    /// Record a cache hit.
    pub async fn record_cache_hit(&self) {
        self.state.write().await.cache_hits += 1;
    }

    /// Record a cache miss.
    pub async fn record_cache_miss(&self) {
        self.state.write().await.cache_misses += 1;
    }

    /// Count one task against an agent's workload.
    pub async fn record_agent_task(&self, agent_id: &str) {
        let mut state = self.state.write().await;
        *state.agent_workload.entry(agent_id.to_owned()).or_insert(0) += 1;
    }

    /// Mark a coordination workflow started.
    pub async fn coordination_started(&self) {
        self.state.write().await.active_coordinations += 1;
    }

    /// Mark a coordination workflow finished.
    pub async fn coordination_completed(&self) {
        let mut state = self.state.write().await;
        state.active_coordinations = state.active_coordinations.saturating_sub(1);
        state.completed_coordinations += 1;
    }

    /// P99 latency over all operations' retained samples.
    pub async fn p99_latency_ms(&self) -> f64 {
        let state = self.state.read().await;
        let mut samples: Vec<f64> =
            state.latencies.values().flat_map(|d| d.iter().copied()).collect();
        if samples.is_empty() {
            return 0.0;
        }
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((samples.len() as f64) * 0.99).ceil() as usize;
        samples[index.saturating_sub(1).min(samples.len() - 1)]
    }

    /// Fraction of cache lookups that hit; 1.0 with no traffic.
    pub async fn cache_hit_rate(&self) -> f64 {
        let state = self.state.read().await;
        let total = state.cache_hits + state.cache_misses;
        if total == 0 {
            return 1.0;
        }
        state.cache_hits as f64 / total as f64
    }

    /// Current metrics view, with the compliance tag.
    pub async fn snapshot(&self) -> MonitorSnapshot {
        let (active, completed) = {
            let state = self.state.read().await;
            (state.active_coordinations, state.completed_coordinations)
        };
        MonitorSnapshot {
            p99_latency_ms: self.p99_latency_ms().await,
            cache_hit_rate: self.cache_hit_rate().await,
            active_coordinations: active,
            completed_coordinations: completed,
            constitutional_hash: CONSTITUTIONAL_HASH.to_owned(),
        }
    }

    /// Scan for threshold violations.
    pub async fn detect_bottlenecks(&self) -> Vec<PerformanceAlert> {
        let mut alerts = Vec::new();

        let p99 = self.p99_latency_ms().await;
        if p99 > P99_TARGET_MS {
            let severity = if p99 > 2.0 * P99_TARGET_MS {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            };
            alerts.push(PerformanceAlert {
                metric: "p99_latency".into(),
                severity,
                message: format!("P99 latency {p99:.2}ms over {P99_TARGET_MS}ms target"),
                current_value: p99,
                threshold: P99_TARGET_MS,
                recommendation: "Enable connection pooling and batch store round-trips".into(),
            });
        }

        let hit_rate = self.cache_hit_rate().await;
        if hit_rate < CACHE_HIT_TARGET {
            alerts.push(PerformanceAlert {
                metric: "cache_hit_rate".into(),
                severity: AlertSeverity::Medium,
                message: format!(
                    "Cache hit rate {:.1}% below {:.0}% target",
                    hit_rate * 100.0,
                    CACHE_HIT_TARGET * 100.0
                ),
                current_value: hit_rate,
                threshold: CACHE_HIT_TARGET,
                recommendation: "Widen the capability cache and review TTLs".into(),
            });
        }

        let (max_load, min_load) = {
            let state = self.state.read().await;
            let max = state.agent_workload.values().max().copied().unwrap_or(0);
            let min = state.agent_workload.values().min().copied().unwrap_or(0);
            (max, min)
        };
        if min_load > 0 && (max_load as f64 / min_load as f64) > WORKLOAD_IMBALANCE_BOUND {
            alerts.push(PerformanceAlert {
                metric: "agent_workload_imbalance".into(),
                severity: AlertSeverity::Medium,
                message: format!(
                    "Workload imbalance {max_load}:{min_load} across agents"
                ),
                current_value: max_load as f64 / min_load as f64,
                threshold: WORKLOAD_IMBALANCE_BOUND,
                recommendation: "Rebalance task-type capabilities across workers".into(),
            });
        }

        alerts
    }

    /// Detect bottlenecks and persist each as a `performance_alert`
    /// knowledge item in the performance space.
    pub async fn publish_alerts(&self) -> Result<Vec<PerformanceAlert>> {
        let alerts = self.detect_bottlenecks().await;
        for alert in &alerts {
            let item = KnowledgeItem::new(
                Space::Performance,
                "performance_monitor",
                "performance_alert",
                json!(alert),
            )
            .with_priority(match alert.severity {
                AlertSeverity::Critical => 1,
                AlertSeverity::High => 2,
                AlertSeverity::Medium => 3,
            })
            .with_tags(["performance", "alert"]);
            self.blackboard.add_knowledge(&item).await?;
            tracing::warn!(
                metric = %alert.metric,
                severity = %alert.severity,
                "Performance alert"
            );
        }
        Ok(alerts)
    }

    /// Periodic scan loop; runs until the shutdown signal arrives.
    pub async fn run_scan_loop(
        &self,
        interval: StdDuration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Performance scan loop shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {
                    if let Err(e) = self.publish_alerts().await {
                        tracing::error!(error = %e, "Failed to publish performance alerts");
                    }
                }
            }
        }
    }
}
