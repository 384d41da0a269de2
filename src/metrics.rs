//! Metrics collection and reporting for pipeline updates.
//!
//! Every [`Pipeline`](crate::pipeline::Pipeline) owns a [`MetricsCollector`].
//! The engine records into it while updating:
//!
//! - `executions.<label>`: how many times each stage ran `execute`
//! - `time.<label>`: wall time spent in each stage
//! - `cache.hits` / `cache.misses`: single-flight cache lookups
//! - `reduce.tasks` / `reduce.skipped`: fan-out units run and skipped
//! - `updates` and `time.update`: completed update cycles
//!
//! Custom metrics can be registered alongside the built-in ones, and the
//! whole set can be printed or saved as JSON at the end of a run.
//!
//! # Example
//!
//! ```no_run
//! use geoflow::metrics::{Metric, MetricsCollector};
//! use serde_json::Value;
//!
//! struct FilesScanned(usize);
//!
//! impl Metric for FilesScanned {
//!     fn name(&self) -> &str {
//!         "files_scanned"
//!     }
//!
//!     fn value(&self) -> Value {
//!         serde_json::json!(self.0)
//!     }
//!
//!     fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
//!         self
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let metrics = MetricsCollector::new();
//! metrics.register(Box::new(FilesScanned(12)));
//! metrics.increment_counter("executions.reader", 3);
//! metrics.print();
//! metrics.save_to_file("metrics.json")?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Trait for custom metrics.
pub trait Metric: Send + Sync + Any {
    /// The name of this metric (e.g., `files_scanned`).
    fn name(&self) -> &str;

    /// The current value of this metric as a JSON value.
    fn value(&self) -> Value;

    /// Optional description of what this metric measures.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Cast to Any for in-place updates of built-in metrics.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Thread-safe container for update metrics. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsCollectorInner>>,
}

#[derive(Default)]
struct MetricsCollectorInner {
    metrics: HashMap<String, Box<dyn Metric>>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsCollectorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a custom metric, replacing any metric with the same name.
    pub fn register(&self, metric: Box<dyn Metric>) {
        let mut inner = self.lock();
        inner.metrics.insert(metric.name().to_string(), metric);
    }

    /// Record the start of a run.
    pub fn record_start(&self) {
        self.lock().start_time = Some(Instant::now());
    }

    /// Record the end of a run.
    pub fn record_end(&self) {
        self.lock().end_time = Some(Instant::now());
    }

    /// Time between [`record_start`](Self::record_start) and
    /// [`record_end`](Self::record_end), if both were recorded.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Add `value` to a counter, creating it if needed.
    pub fn increment_counter(&self, name: &str, value: u64) {
        let mut inner = self.lock();
        let metric = inner
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Box::new(CounterMetric::new(name)) as Box<dyn Metric>);
        if let Some(counter) = metric.as_any_mut().downcast_mut::<CounterMetric>() {
            counter.count += value;
        }
    }

    /// Set a counter to a specific value.
    pub fn set_counter(&self, name: &str, value: u64) {
        let mut inner = self.lock();
        inner
            .metrics
            .insert(name.to_string(), Box::new(CounterMetric::with_value(name, value)));
    }

    /// Current value of a counter.
    #[must_use]
    pub fn counter(&self, name: &str) -> Option<u64> {
        let mut inner = self.lock();
        let metric = inner.metrics.get_mut(name)?;
        metric.as_any_mut().downcast_mut::<CounterMetric>().map(|c| c.count)
    }

    /// Add one event of length `elapsed` to a timer, creating it if needed.
    pub fn record_duration(&self, name: &str, elapsed: Duration) {
        let mut inner = self.lock();
        let metric = inner
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Box::new(TimerMetric::new(name)) as Box<dyn Metric>);
        if let Some(timer) = metric.as_any_mut().downcast_mut::<TimerMetric>() {
            timer.record(elapsed);
        }
    }

    /// Run `f` and record its wall time under `name`.
    pub fn time<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = f();
        self.record_duration(name, started.elapsed());
        out
    }

    /// All metrics as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let inner = self.lock();
        let mut metrics_json = serde_json::Map::new();

        for (name, metric) in &inner.metrics {
            let mut metric_obj = serde_json::Map::new();
            metric_obj.insert("value".to_string(), metric.value());
            if let Some(desc) = metric.description() {
                metric_obj.insert("description".to_string(), json!(desc));
            }
            metrics_json.insert(name.clone(), Value::Object(metric_obj));
        }

        if let (Some(start), Some(end)) = (inner.start_time, inner.end_time) {
            metrics_json.insert(
                "execution_time_ms".to_string(),
                json!({
                    "value": end.duration_since(start).as_millis(),
                    "description": "Total run time in milliseconds",
                }),
            );
        }
        drop(inner);
        Value::Object(metrics_json)
    }

    /// Print all metrics to stdout, sorted by name.
    pub fn print(&self) {
        println!("\n========== Pipeline Metrics ==========");

        let inner = self.lock();
        if let (Some(start), Some(end)) = (inner.start_time, inner.end_time) {
            let elapsed = end.duration_since(start);
            println!(
                "Execution Time: {:.3}s ({} ms)",
                elapsed.as_secs_f64(),
                elapsed.as_millis()
            );
            println!("--------------------------------------");
        }

        let mut sorted_metrics: Vec<_> = inner.metrics.iter().collect();
        sorted_metrics.sort_by_key(|(name, _)| *name);
        for (name, metric) in sorted_metrics {
            if let Some(desc) = metric.description() {
                println!("{}: {} ({})", name, metric.value(), desc);
            } else {
                println!("{}: {}", name, metric.value());
            }
        }
        drop(inner);
        println!("======================================\n");
    }

    /// Save all metrics to a pretty-printed JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }

    /// Snapshot of all metric names and values.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let inner = self.lock();
        inner
            .metrics
            .iter()
            .map(|(name, metric)| (name.clone(), metric.value()))
            .collect()
    }
}

// ========== Built-in Metrics ==========

/// A monotonically increasing counter.
pub struct CounterMetric {
    name: String,
    count: u64,
}

impl CounterMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_value(name, 0)
    }

    pub fn with_value(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.count)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Named timing events: how many, how long in total, and the longest.
pub struct TimerMetric {
    name: String,
    events: u64,
    total: Duration,
    longest: Duration,
}

impl TimerMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: 0,
            total: Duration::ZERO,
            longest: Duration::ZERO,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.events += 1;
        self.total += elapsed;
        self.longest = self.longest.max(elapsed);
    }
}

impl Metric for TimerMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!({
            "events": self.events,
            "total_ms": self.total.as_secs_f64() * 1e3,
            "max_ms": self.longest.as_secs_f64() * 1e3,
        })
    }

    fn description(&self) -> Option<&str> {
        Some("wall time")
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
