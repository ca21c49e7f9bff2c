//! Health monitoring
//!
//! Provisions the health alarm and evaluates it against a metric source.
//! A period with no data point is always a breach: silence from the metric
//! stream is evidence of a problem, not absence of evidence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{fingerprint, AlarmSpec, MetricId, ResourceKind, ResourceRecord};
use crate::provider::Provider;
use crate::state::{DataPoint, StateStore};

use super::{apply, ProvisionError, Provisioned};

/// Alarm provisioner
pub struct AlarmProvisioner {
    provider: Arc<dyn Provider>,
}

impl AlarmProvisioner {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Validate the specification without touching the provider
    pub fn validate(spec: &AlarmSpec) -> Result<(), ProvisionError> {
        if spec.name.is_empty() {
            return Err(ProvisionError::InvalidSpec {
                component: "monitor",
                reason: "alarm name is empty".to_string(),
            });
        }
        if spec.period_secs == 0 {
            return Err(ProvisionError::InvalidSpec {
                component: "monitor",
                reason: "evaluation period must be positive".to_string(),
            });
        }
        if spec.evaluation_periods == 0 {
            return Err(ProvisionError::InvalidSpec {
                component: "monitor",
                reason: "at least one evaluation period is required".to_string(),
            });
        }
        Ok(())
    }

    /// Provision the alarm
    pub async fn provision(&self, spec: &AlarmSpec) -> Result<Provisioned, ProvisionError> {
        Self::validate(spec)?;

        info!("Provisioning alarm {} over {}", spec.name, spec.metric);

        let dimensions = serde_json::to_string(&spec.metric.dimensions).unwrap_or_default();
        apply(
            self.provider.as_ref(),
            "monitor",
            ResourceRecord::new(ResourceKind::Alarm, &spec.name)
                .attribute("namespace", &spec.metric.namespace)
                .attribute("metric_name", &spec.metric.name)
                .attribute("dimensions", dimensions)
                .attribute("period_secs", spec.period_secs.to_string())
                .attribute("evaluation_periods", spec.evaluation_periods.to_string())
                .attribute("threshold", spec.threshold.to_string())
                .attribute("comparison", spec.comparison.symbol())
                .attribute("treat_missing_data", "breaching")
                .fingerprint(fingerprint(spec)),
        )
        .await
    }
}

/// Alarm state after an evaluation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmState {
    Ok,
    Alarm,
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmState::Ok => write!(f, "OK"),
            AlarmState::Alarm => write!(f, "ALARM"),
        }
    }
}

/// Why an evaluation produced its state
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum AlarmReason {
    /// The latest value did not breach the threshold
    WithinThreshold(f64),

    /// The latest value breached the threshold
    Breaching(f64),

    /// No data point arrived during the evaluation window
    MissingData,
}

/// Result of one alarm evaluation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Evaluation {
    /// Alarm name
    pub alarm: String,

    /// Resulting state
    pub state: AlarmState,

    /// Why
    pub reason: AlarmReason,

    /// Configured threshold
    pub threshold: f64,

    /// Evaluation timestamp
    pub evaluated_at: DateTime<Utc>,
}

impl Evaluation {
    /// Human-readable current-vs-threshold summary
    pub fn describe(&self) -> String {
        match self.reason {
            AlarmReason::WithinThreshold(value) => {
                format!("current value {value} within threshold {}", self.threshold)
            }
            AlarmReason::Breaching(value) => {
                format!("current value {value} breaches threshold {}", self.threshold)
            }
            AlarmReason::MissingData => {
                "no data points in the evaluation window (treated as breaching)".to_string()
            }
        }
    }
}

/// Source of metric data points
pub trait MetricSource: Send + Sync {
    /// Most recent data point for the metric at or after `since`
    fn latest(&self, metric: &MetricId, since: DateTime<Utc>) -> anyhow::Result<Option<DataPoint>>;
}

/// Metric source reading data points recorded in the state store
pub struct StoredMetricSource {
    store: StateStore,
}

impl StoredMetricSource {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl MetricSource for StoredMetricSource {
    fn latest(&self, metric: &MetricId, since: DateTime<Utc>) -> anyhow::Result<Option<DataPoint>> {
        self.store.latest_data_point(metric, since)
    }
}

/// Polls the alarm during a deployment
#[async_trait]
pub trait AlarmPoller: Send + Sync {
    async fn poll(&self) -> anyhow::Result<Evaluation>;
}

/// Evaluates one alarm on its fixed cadence
pub struct AlarmEvaluator {
    spec: AlarmSpec,
    source: Arc<dyn MetricSource>,
}

impl AlarmEvaluator {
    pub fn new(spec: AlarmSpec, source: Arc<dyn MetricSource>) -> Self {
        Self { spec, source }
    }

    /// Evaluate once at the given instant
    pub fn evaluate_at(&self, now: DateTime<Utc>) -> anyhow::Result<Evaluation> {
        let window =
            chrono::Duration::seconds((self.spec.period_secs * u64::from(self.spec.evaluation_periods)) as i64);
        let since = now - window;

        let (state, reason) = match self.source.latest(&self.spec.metric, since)? {
            None => (AlarmState::Alarm, AlarmReason::MissingData),
            Some(point) if self.spec.comparison.breaches(point.value, self.spec.threshold) => {
                (AlarmState::Alarm, AlarmReason::Breaching(point.value))
            }
            Some(point) => (AlarmState::Ok, AlarmReason::WithinThreshold(point.value)),
        };

        let evaluation = Evaluation {
            alarm: self.spec.name.clone(),
            state,
            reason,
            threshold: self.spec.threshold,
            evaluated_at: now,
        };

        match state {
            AlarmState::Alarm => warn!("{}: ALARM ({})", self.spec.name, evaluation.describe()),
            AlarmState::Ok => debug!("{}: OK ({})", self.spec.name, evaluation.describe()),
        }

        Ok(evaluation)
    }

    /// Evaluate once now
    pub fn evaluate(&self) -> anyhow::Result<Evaluation> {
        self.evaluate_at(Utc::now())
    }
}

#[async_trait]
impl AlarmPoller for AlarmEvaluator {
    async fn poll(&self) -> anyhow::Result<Evaluation> {
        self.evaluate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSource {
        points: Vec<DataPoint>,
    }

    impl MetricSource for StubSource {
        fn latest(
            &self,
            _metric: &MetricId,
            since: DateTime<Utc>,
        ) -> anyhow::Result<Option<DataPoint>> {
            Ok(self
                .points
                .iter()
                .filter(|p| p.timestamp >= since)
                .max_by_key(|p| p.timestamp)
                .copied())
        }
    }

    fn evaluator(points: Vec<DataPoint>) -> AlarmEvaluator {
        AlarmEvaluator::new(AlarmSpec::default(), Arc::new(StubSource { points }))
    }

    #[test]
    fn test_zero_data_points_is_alarm() {
        let evaluation = evaluator(Vec::new()).evaluate().unwrap();
        assert_eq!(evaluation.state, AlarmState::Alarm);
        assert_eq!(evaluation.reason, AlarmReason::MissingData);
    }

    #[test]
    fn test_stale_data_is_alarm() {
        // Only data point is outside the 30 second window.
        let stale = DataPoint {
            value: 1.0,
            timestamp: Utc::now() - chrono::Duration::seconds(300),
        };
        let evaluation = evaluator(vec![stale]).evaluate().unwrap();
        assert_eq!(evaluation.state, AlarmState::Alarm);
        assert_eq!(evaluation.reason, AlarmReason::MissingData);
    }

    #[test]
    fn test_breaching_value_alarms_on_first_evaluation() {
        let evaluation = evaluator(vec![DataPoint::now(0.0)]).evaluate().unwrap();
        assert_eq!(evaluation.state, AlarmState::Alarm);
        assert_eq!(evaluation.reason, AlarmReason::Breaching(0.0));
    }

    #[test]
    fn test_healthy_value_is_ok() {
        let evaluation = evaluator(vec![DataPoint::now(1.0)]).evaluate().unwrap();
        assert_eq!(evaluation.state, AlarmState::Ok);
        assert_eq!(evaluation.reason, AlarmReason::WithinThreshold(1.0));
    }

    #[test]
    fn test_validate_rejects_zero_period() {
        let spec = AlarmSpec {
            period_secs: 0,
            ..AlarmSpec::default()
        };
        assert!(AlarmProvisioner::validate(&spec).is_err());
    }
}
