//! Build metrics on top of metrics-rs.
//!
//! The pipeline records through the global `metrics` macros; the CLI
//! installs [`CliRecorder`] to keep the values in memory and print them
//! when the command finishes.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use kiln_emit::Target;
use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit, counter,
    describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use parking_lot::RwLock;

// ============================================================================
// Metric descriptions
// ============================================================================

/// Register metric descriptions. Call once at startup.
pub fn init() {
    describe_counter!(
        "kiln_procedures_emitted_total",
        Unit::Count,
        "Procedures lowered to target text"
    );
    describe_counter!(
        "kiln_image_records_total",
        Unit::Count,
        "Hex records written to patched images"
    );
    describe_gauge!(
        "kiln_code_bytes",
        Unit::Bytes,
        "Bytes placed in the free-code region of the last image"
    );
    describe_histogram!(
        "kiln_emit_seconds",
        Unit::Seconds,
        "Wall-clock time of one emit_binary call"
    );
}

// ============================================================================
// Recording
// ============================================================================

/// Record one emit of `procs` procedures.
pub fn record_emit(target: Target, procs: usize, secs: f64) {
    counter!("kiln_procedures_emitted_total", "target" => target.as_str())
        .increment(procs as u64);
    histogram!("kiln_emit_seconds", "target" => target.as_str()).record(secs);
}

/// Record one patched image.
pub fn record_image(records: usize, code_bytes: usize) {
    counter!("kiln_image_records_total").increment(records as u64);
    gauge!("kiln_code_bytes").set(code_bytes as f64);
}

// ============================================================================
// CLI Recorder
// ============================================================================

#[derive(Default)]
struct Store {
    counters: RwLock<BTreeMap<String, u64>>,
    gauges: RwLock<BTreeMap<String, f64>>,
    histograms: RwLock<BTreeMap<String, Vec<f64>>>,
}

/// Handle registered for one key; serves all three metric kinds.
struct Slot {
    key: String,
    store: Arc<Store>,
}

impl metrics::CounterFn for Slot {
    fn increment(&self, value: u64) {
        *self.store.counters.write().entry(self.key.clone()).or_default() += value;
    }

    fn absolute(&self, value: u64) {
        self.store.counters.write().insert(self.key.clone(), value);
    }
}

impl metrics::GaugeFn for Slot {
    fn increment(&self, value: f64) {
        *self.store.gauges.write().entry(self.key.clone()).or_default() += value;
    }

    fn decrement(&self, value: f64) {
        *self.store.gauges.write().entry(self.key.clone()).or_default() -= value;
    }

    fn set(&self, value: f64) {
        self.store.gauges.write().insert(self.key.clone(), value);
    }
}

impl metrics::HistogramFn for Slot {
    fn record(&self, value: f64) {
        self.store
            .histograms
            .write()
            .entry(self.key.clone())
            .or_default()
            .push(value);
    }
}

fn key_to_string(key: &Key) -> String {
    let labels: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    if labels.is_empty() {
        key.name().to_string()
    } else {
        format!("{}{{{}}}", key.name(), labels.join(","))
    }
}

/// In-memory recorder for terminal output.
#[derive(Default)]
pub struct CliRecorder {
    store: Arc<Store>,
}

impl CliRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reader for the values this recorder collects.
    pub fn handle(&self) -> CliRecorderHandle {
        CliRecorderHandle {
            store: Arc::clone(&self.store),
        }
    }

    /// Install as the global recorder. Returns `None` if one is already set.
    pub fn install(self) -> Option<CliRecorderHandle> {
        let handle = self.handle();
        metrics::set_global_recorder(self).ok()?;
        Some(handle)
    }

    fn slot(&self, key: &Key) -> Arc<Slot> {
        Arc::new(Slot {
            key: key_to_string(key),
            store: Arc::clone(&self.store),
        })
    }
}

impl Recorder for CliRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.slot(key))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(self.slot(key))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(self.slot(key))
    }
}

/// Read access to the values collected by a [`CliRecorder`].
pub struct CliRecorderHandle {
    store: Arc<Store>,
}

impl CliRecorderHandle {
    pub fn counter(&self, key: &str) -> Option<u64> {
        self.store.counters.read().get(key).copied()
    }

    pub fn gauge(&self, key: &str) -> Option<f64> {
        self.store.gauges.read().get(key).copied()
    }

    pub fn histogram(&self, key: &str) -> Option<Vec<f64>> {
        self.store.histograms.read().get(key).cloned()
    }

    /// Human-readable summary, keys in sorted order.
    pub fn summary(&self) -> String {
        let counters = self.store.counters.read();
        let gauges = self.store.gauges.read();
        let histograms = self.store.histograms.read();
        if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
            return "No metrics collected.\n".to_string();
        }

        let mut out = String::from("\n## Metrics Summary\n\n");
        if !counters.is_empty() {
            out.push_str("### Counters\n");
            for (key, value) in counters.iter() {
                let _ = writeln!(out, "  {key}: {value}");
            }
            out.push('\n');
        }
        if !gauges.is_empty() {
            out.push_str("### Gauges\n");
            for (key, value) in gauges.iter() {
                let _ = writeln!(out, "  {key}: {value:.6}");
            }
            out.push('\n');
        }
        if !histograms.is_empty() {
            out.push_str("### Histograms\n");
            for (key, values) in histograms.iter().filter(|(_, v)| !v.is_empty()) {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let avg = values.iter().sum::<f64>() / values.len() as f64;
                let _ = writeln!(
                    out,
                    "  {key}: count={}, min={min:.6}, max={max:.6}, avg={avg:.6}",
                    values.len()
                );
            }
            out.push('\n');
        }
        out
    }

    pub fn print_summary(&self) {
        print!("{}", self.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::Label;

    #[test]
    fn test_key_to_string() {
        assert_eq!(key_to_string(&Key::from_name("kiln_code_bytes")), "kiln_code_bytes");
        let key = Key::from_parts(
            "kiln_emit_seconds",
            vec![Label::new("target", "avr"), Label::new("phase", "asm")],
        );
        assert_eq!(key_to_string(&key), "kiln_emit_seconds{target=avr,phase=asm}");
    }

    #[test]
    fn test_recorder_collects_pipeline_metrics() {
        let recorder = CliRecorder::new();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_emit(Target::Avr, 3, 0.5);
            record_emit(Target::Avr, 2, 0.25);
            record_image(70, 128);
        });

        assert_eq!(handle.counter("kiln_procedures_emitted_total{target=avr}"), Some(5));
        assert_eq!(handle.counter("kiln_image_records_total"), Some(70));
        assert_eq!(handle.gauge("kiln_code_bytes"), Some(128.0));
        assert_eq!(
            handle.histogram("kiln_emit_seconds{target=avr}"),
            Some(vec![0.5, 0.25])
        );
        let summary = handle.summary();
        assert!(summary.contains("kiln_procedures_emitted_total{target=avr}: 5"));
        assert!(summary.contains("count=2, min=0.250000, max=0.500000"));
    }

    #[test]
    fn test_empty_summary() {
        assert_eq!(CliRecorder::new().handle().summary(), "No metrics collected.\n");
    }
}
