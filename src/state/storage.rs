//! Stack state storage
//!
//! Persists the assembled stack's resource records, pipeline execution
//! history, and recorded metric data points as JSON under the platform data
//! directory, so re-assembly reconciles against existing resources instead
//! of recreating them.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{MetricId, ResourceRecord};
use crate::pipeline::ExecutionRecord;

/// Maximum data points retained per metric
const METRIC_RETENTION: usize = 1000;

/// The durable record of one assembled stack
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StackState {
    /// Stack name
    pub name: String,

    /// Target account identifier
    pub account: String,

    /// Target region
    pub region: String,

    /// Resource records keyed by logical id
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl StackState {
    /// Create an empty state for a stack
    pub fn new(name: impl Into<String>, account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account: account.into(),
            region: region.into(),
            resources: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Insert or replace a resource record
    pub fn upsert(&mut self, record: ResourceRecord) {
        self.resources.insert(record.logical_id.clone(), record);
        self.updated_at = Utc::now();
    }

    /// Remove a resource record
    pub fn remove(&mut self, logical_id: &str) -> Option<ResourceRecord> {
        let removed = self.resources.remove(logical_id);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Look up a resource record
    pub fn get(&self, logical_id: &str) -> Option<&ResourceRecord> {
        self.resources.get(logical_id)
    }

    /// Dependency edges recorded on the resources, as (dependency, dependent)
    pub fn dependency_edges(&self) -> Vec<(String, String)> {
        let mut edges = Vec::new();
        for record in self.resources.values() {
            for dep in &record.depends_on {
                edges.push((dep.clone(), record.logical_id.clone()));
            }
        }
        edges.sort();
        edges
    }
}

/// One recorded metric data point
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DataPoint {
    /// Observed value
    pub value: f64,

    /// Observation timestamp
    pub timestamp: DateTime<Utc>,
}

impl DataPoint {
    pub fn now(value: f64) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
        }
    }
}

/// State storage manager
#[derive(Clone, Debug)]
pub struct StateStore {
    /// Base directory for all persisted state
    base_dir: PathBuf,
}

impl StateStore {
    /// Create a state store rooted at the given directory
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Create with the platform default directory
    pub fn default_dir() -> Result<Self> {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ellipsoid-stack");
        Ok(Self::new(base_dir))
    }

    /// Base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory where fetched artifacts are written
    pub fn artifacts_dir(&self) -> Result<PathBuf> {
        let dir = self.base_dir.join("artifacts");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn stack_path(&self, name: &str) -> PathBuf {
        self.base_dir.join("stacks").join(format!("{name}.json"))
    }

    fn executions_dir(&self, pipeline: &str) -> PathBuf {
        self.base_dir.join("executions").join(pipeline)
    }

    fn metric_path(&self, metric: &MetricId) -> PathBuf {
        self.base_dir
            .join("metrics")
            .join(format!("{}.json", metric.storage_key()))
    }

    /// Save stack state
    pub fn save_stack(&self, state: &StackState) -> Result<PathBuf> {
        let path = self.stack_path(&state.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&path).context("Failed to create stack state file")?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, state).context("Failed to write stack state")?;

        debug!("Saved stack state to {}", path.display());
        Ok(path)
    }

    /// Load stack state, if present
    pub fn load_stack(&self, name: &str) -> Result<Option<StackState>> {
        let path = self.stack_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path).context("Failed to open stack state file")?;
        let reader = BufReader::new(file);
        let state: StackState =
            serde_json::from_reader(reader).context("Failed to parse stack state")?;

        debug!("Loaded stack state from {}", path.display());
        Ok(Some(state))
    }

    /// Delete stack state
    pub fn delete_stack(&self, name: &str) -> Result<()> {
        let path = self.stack_path(name);
        if path.exists() {
            fs::remove_file(&path)?;
            info!("Deleted stack state: {}", path.display());
        }
        Ok(())
    }

    /// List stacks with persisted state
    pub fn list_stacks(&self) -> Result<Vec<String>> {
        let dir = self.base_dir.join("stacks");
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut stacks = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    stacks.push(stem.to_string());
                }
            }
        }

        stacks.sort();
        Ok(stacks)
    }

    /// Save a pipeline execution record
    pub fn save_execution(&self, record: &ExecutionRecord) -> Result<PathBuf> {
        let dir = self.executions_dir(&record.pipeline);
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.json", record.id));
        let file = File::create(&path).context("Failed to create execution record")?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, record).context("Failed to write execution record")?;

        debug!("Saved execution record to {}", path.display());
        Ok(path)
    }

    /// Load all execution records for a pipeline, newest first
    pub fn list_executions(&self, pipeline: &str) -> Result<Vec<ExecutionRecord>> {
        let dir = self.executions_dir(pipeline);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match File::open(&path) {
                    Ok(file) => {
                        if let Ok(record) = serde_json::from_reader(BufReader::new(file)) {
                            records.push(record);
                        }
                    }
                    Err(e) => debug!("Failed to open {}: {}", path.display(), e),
                }
            }
        }

        records.sort_by(|a: &ExecutionRecord, b: &ExecutionRecord| {
            b.started_at.cmp(&a.started_at)
        });
        Ok(records)
    }

    /// Load one execution record by id
    pub fn load_execution(&self, pipeline: &str, id: &str) -> Result<Option<ExecutionRecord>> {
        let path = self.executions_dir(pipeline).join(format!("{id}.json"));
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path).context("Failed to open execution record")?;
        let record = serde_json::from_reader(BufReader::new(file))
            .context("Failed to parse execution record")?;
        Ok(Some(record))
    }

    /// Append a metric data point
    pub fn record_data_point(&self, metric: &MetricId, point: DataPoint) -> Result<()> {
        let path = self.metric_path(metric);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut points = self.load_data_points(metric)?;
        points.push(point);
        if points.len() > METRIC_RETENTION {
            let overflow = points.len() - METRIC_RETENTION;
            points.drain(..overflow);
        }

        let file = File::create(&path).context("Failed to create metric file")?;
        serde_json::to_writer(BufWriter::new(file), &points)
            .context("Failed to write metric data")?;
        Ok(())
    }

    /// Load all recorded data points for a metric
    pub fn load_data_points(&self, metric: &MetricId) -> Result<Vec<DataPoint>> {
        let path = self.metric_path(metric);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path).context("Failed to open metric file")?;
        let points = serde_json::from_reader(BufReader::new(file))
            .context("Failed to parse metric data")?;
        Ok(points)
    }

    /// Most recent data point at or after `since`
    pub fn latest_data_point(
        &self,
        metric: &MetricId,
        since: DateTime<Utc>,
    ) -> Result<Option<DataPoint>> {
        let points = self.load_data_points(metric)?;
        Ok(points
            .into_iter()
            .filter(|p| p.timestamp >= since)
            .max_by_key(|p| p.timestamp))
    }

    /// Export a stack's resource inventory as CSV
    pub fn export_csv(&self, state: &StackState, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        writer.write_record([
            "logical_id",
            "kind",
            "physical_id",
            "tags",
            "depends_on",
            "created_at",
        ])?;

        for record in state.resources.values() {
            let tags: Vec<String> = record.tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
            writer.write_record([
                record.logical_id.clone(),
                record.kind.name().to_string(),
                record.physical_id.clone(),
                tags.join(";"),
                record.depends_on.join(";"),
                record.created_at.to_rfc3339(),
            ])?;
        }

        writer.flush()?;
        info!("Exported stack inventory to {}", path.display());
        Ok(())
    }
}
