//! Component C/D: the breaker monitor's sampling loop and the metrics collector.

use super::events::{Alert, AlertSeverity, BoundedRing, MetricSample, StateChangeEvent};
use crate::circuit::{CircuitRegistry, CircuitState};
use crate::error::{FabricError, FabricResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

const EVENT_RING_CAP: usize = 1000;
const ALERT_RING_CAP: usize = 500;
const METRIC_RING_CAP: usize = 1000;

/// Receives alerts derived by the monitor loop.
///
/// Handlers are invoked best-effort, in registration order; an error
/// returned here is logged at ERROR and never propagated to the loop.
#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn handle(&self, alert: &Alert) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Adapts a plain synchronous closure into an [`AlertHandler`], mirroring the
/// spec's "a sync handler is called directly" dispatch rule.
pub struct SyncAlertHandler<F>(pub F);

#[async_trait]
impl<F> AlertHandler for SyncAlertHandler<F>
where
    F: Fn(&Alert) + Send + Sync,
{
    async fn handle(&self, alert: &Alert) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (self.0)(alert);
        Ok(())
    }
}

struct MonitorRings {
    events: Mutex<BoundedRing<StateChangeEvent>>,
    alerts: Mutex<BoundedRing<Alert>>,
}

impl MonitorRings {
    fn new() -> Self {
        Self {
            events: Mutex::new(BoundedRing::new(EVENT_RING_CAP)),
            alerts: Mutex::new(BoundedRing::new(ALERT_RING_CAP)),
        }
    }
}

#[derive(Clone, Default)]
struct PerBreakerMetrics {
    samples: Arc<Mutex<HashMap<String, BoundedRing<MetricSample>>>>,
}

/// Bounded per-breaker time series of metric snapshots.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: PerBreakerMetrics,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, name: &str, sample: MetricSample) {
        let mut guard = self.inner.samples.lock().unwrap();
        guard.entry(name.to_string()).or_insert_with(|| BoundedRing::new(METRIC_RING_CAP)).push(sample);
    }

    /// Samples whose timestamp falls within the last `hours`.
    pub fn get_metrics_history(&self, name: &str, hours: f64) -> Vec<MetricSample> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs_f64((hours.max(0.0)) * 3600.0))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let guard = self.inner.samples.lock().unwrap();
        guard
            .get(name)
            .map(|ring| ring.iter().filter(|s| s.timestamp >= cutoff).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_aggregated_metrics(&self, hours: f64) -> HashMap<String, AggregatedMetrics> {
        let names: Vec<String> = self.inner.samples.lock().unwrap().keys().cloned().collect();
        names
            .into_iter()
            .map(|name| {
                let samples = self.get_metrics_history(&name, hours);
                (name, AggregatedMetrics::from_samples(&samples))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedMetrics {
    pub avg_success_rate: f64,
    pub total_calls: u64,
    pub total_rejections: u64,
    pub total_timeouts: u64,
    pub state_changes: usize,
}

impl AggregatedMetrics {
    fn from_samples(samples: &[MetricSample]) -> Self {
        let with_calls: Vec<&MetricSample> = samples.iter().filter(|s| s.total_calls > 0).collect();
        let avg_success_rate = if with_calls.is_empty() {
            0.0
        } else {
            with_calls.iter().map(|s| s.success_rate).sum::<f64>() / with_calls.len() as f64
        };
        let total_calls = samples.iter().map(|s| s.total_calls).max().unwrap_or(0);
        let total_rejections = samples.iter().map(|s| s.rejected_calls).max().unwrap_or(0);
        let total_timeouts = samples.iter().map(|s| s.timeouts).max().unwrap_or(0);
        let distinct_states: std::collections::HashSet<_> = samples.iter().map(|s| format!("{:?}", s.state)).collect();
        let state_changes = distinct_states.len().saturating_sub(1);
        Self { avg_success_rate, total_calls, total_rejections, total_timeouts, state_changes }
    }
}

/// Component C: periodic poller over the [`CircuitRegistry`].
pub struct BreakerMonitor {
    registry: CircuitRegistry,
    rings: Arc<MonitorRings>,
    metrics: MetricsCollector,
    handlers: Arc<Mutex<Vec<Arc<dyn AlertHandler>>>>,
    last_states: Arc<Mutex<HashMap<String, CircuitState>>>,
    running: Arc<AtomicBool>,
}

impl BreakerMonitor {
    pub fn new(registry: CircuitRegistry) -> Self {
        Self {
            registry,
            rings: Arc::new(MonitorRings::new()),
            metrics: MetricsCollector::new(),
            handlers: Arc::new(Mutex::new(Vec::new())),
            last_states: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    /// Handlers are invoked in registration order; order is preserved here.
    pub fn register_handler(&self, handler: Arc<dyn AlertHandler>) {
        self.handlers.lock().unwrap().push(handler);
    }

    pub fn recent_events(&self, n: usize) -> Vec<StateChangeEvent> {
        self.rings.events.lock().unwrap().recent(n)
    }

    pub fn recent_alerts(&self, n: usize) -> Vec<Alert> {
        self.rings.alerts.lock().unwrap().recent(n)
    }

    /// Spawn the single cooperative sampling task. `interval_seconds` must be
    /// in `[1.0, 60.0]`.
    pub fn start(&self, interval_seconds: f64) -> FabricResult<tokio::task::JoinHandle<()>> {
        if !(1.0..=60.0).contains(&interval_seconds) {
            return Err(FabricError::Validation(format!(
                "monitor interval {interval_seconds} out of range [1.0, 60.0]"
            )));
        }
        self.running.store(true, Ordering::Release);

        let registry = self.registry.clone();
        let rings = self.rings.clone();
        let metrics = self.metrics.clone();
        let handlers = self.handlers.clone();
        let last_states = self.last_states.clone();
        let running = self.running.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs_f64(interval_seconds));
            while running.load(Ordering::Acquire) {
                ticker.tick().await;
                if let Err(err) = sample_once(&registry, &rings, &metrics, &handlers, &last_states).await {
                    tracing::error!(error = %err, "breaker monitor iteration failed");
                }
            }
        });
        Ok(handle)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

async fn sample_once(
    registry: &CircuitRegistry,
    rings: &MonitorRings,
    metrics: &MetricsCollector,
    handlers: &Mutex<Vec<Arc<dyn AlertHandler>>>,
    last_states: &Mutex<HashMap<String, CircuitState>>,
) -> FabricResult<()> {
    let now = SystemTime::now();
    let statuses = registry.get_all_status();
    let mut alerts_to_dispatch = Vec::new();

    for status in &statuses {
        let mut last = last_states.lock().unwrap();
        let previous = last.insert(status.name.clone(), status.state);

        if let Some(previous_state) = previous {
            if previous_state != status.state {
                rings.events.lock().unwrap().push(StateChangeEvent {
                    circuit_name: status.name.clone(),
                    old_state: previous_state,
                    new_state: status.state,
                    timestamp: now,
                    failure_count: status.failure_count,
                    success_rate: status.success_rate,
                });
                if status.state == CircuitState::Open {
                    alerts_to_dispatch.push(Alert {
                        circuit_name: status.name.clone(),
                        severity: AlertSeverity::High,
                        message: "Circuit breaker OPENED due to failures".to_string(),
                        timestamp: now,
                        state: status.state,
                    });
                }
            }
        }
        drop(last);

        if status.state == CircuitState::Closed && status.success_rate < 0.5 && status.total_calls > 10 {
            alerts_to_dispatch.push(Alert {
                circuit_name: status.name.clone(),
                severity: AlertSeverity::Medium,
                message: format!("Low success rate: {:.2}", status.success_rate),
                timestamp: now,
                state: status.state,
            });
        }

        let rejection_rate = status.rejected_calls as f64 / status.total_calls.max(1) as f64;
        if rejection_rate > 0.1 && status.rejected_calls > 5 {
            alerts_to_dispatch.push(Alert {
                circuit_name: status.name.clone(),
                severity: AlertSeverity::High,
                message: format!("High rejection rate: {:.2}", rejection_rate),
                timestamp: now,
                state: status.state,
            });
        }

        metrics.record(
            &status.name,
            MetricSample {
                timestamp: now,
                state: status.state,
                success_rate: status.success_rate,
                failure_count: status.failure_count,
                total_calls: status.total_calls,
                rejected_calls: status.rejected_calls,
                timeouts: status.timeouts,
            },
        );
    }

    for alert in alerts_to_dispatch {
        rings.alerts.lock().unwrap().push(alert.clone());
        let handlers = handlers.lock().unwrap().clone();
        for handler in handlers {
            if let Err(err) = handler.handle(&alert).await {
                tracing::error!(error = %err, circuit = %alert.circuit_name, "alert handler failed");
            }
        }
    }

    Ok(())
}
