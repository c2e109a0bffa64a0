use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{debug, info};

#[cfg(feature = "metrics-server")]
pub mod server;

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub streams: BTreeMap<String, StreamMetrics>,
    pub total_duration_ms: f64,
    pub seeks: u64,
    pub decode_errors: u64,
}

/// Decode statistics for one worker, keyed by its stream label.
#[derive(Debug, Default, Serialize, Clone)]
pub struct StreamMetrics {
    pub calls: u64,
    pub total_decode_ms: f64,
    pub max_decode_ms: f64,
    pub units: u64,
    pub bytes: u64,
    pub end_of_stream: u64,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn global() -> &'static MetricsCollector {
        static INSTANCE: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);
        &INSTANCE
    }

    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsSnapshot::default())),
        }
    }

    /// Starts timing one decode call. The timer records when dropped.
    pub fn start_decode(&self, stream: &str) -> DecodeTimer {
        DecodeTimer {
            stream: stream.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            outcome: Outcome::Failed,
            recorded: false,
        }
    }

    pub fn record_seek(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.seeks += 1;
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Delivered(usize),
    EndOfStream,
    Failed,
}

pub struct DecodeTimer {
    stream: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    outcome: Outcome,
    recorded: bool,
}

impl DecodeTimer {
    pub fn delivered(&mut self, bytes: usize) {
        self.outcome = Outcome::Delivered(bytes);
    }

    pub fn end_of_stream(&mut self) {
        self.outcome = Outcome::EndOfStream;
    }

    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            if matches!(self.outcome, Outcome::Failed) {
                guard.decode_errors += 1;
            }
            let metrics = guard.streams.entry(self.stream.clone()).or_default();
            metrics.calls += 1;
            metrics.total_decode_ms += duration_ms;
            if duration_ms > metrics.max_decode_ms {
                metrics.max_decode_ms = duration_ms;
            }
            match self.outcome {
                Outcome::Delivered(bytes) => {
                    metrics.units += 1;
                    metrics.bytes += bytes as u64;
                }
                Outcome::EndOfStream => metrics.end_of_stream += 1,
                Outcome::Failed => {}
            }
        }
        debug!(
            stream = self.stream.as_str(),
            duration_ms,
            outcome = ?self.outcome,
            "Decode call recorded"
        );
        self.recorded = true;
    }
}

impl Drop for DecodeTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        stream_count = snapshot.streams.len(),
        seeks = snapshot.seeks,
        decode_errors = snapshot.decode_errors,
        "Decode metrics summary"
    );
    for (stream, metrics) in &snapshot.streams {
        info!(
            stream = stream.as_str(),
            calls = metrics.calls,
            units = metrics.units,
            bytes = metrics.bytes,
            total_ms = metrics.total_decode_ms,
            max_ms = metrics.max_decode_ms,
            "Stream metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        output.push_str("# HELP stereo_decode_seeks_total Total number of seeks\n");
        output.push_str("# TYPE stereo_decode_seeks_total counter\n");
        output.push_str(&format!("stereo_decode_seeks_total {}\n", self.seeks));
        output.push_str("# HELP stereo_decode_errors_total Decode calls that failed\n");
        output.push_str("# TYPE stereo_decode_errors_total counter\n");
        output.push_str(&format!(
            "stereo_decode_errors_total {}\n",
            self.decode_errors
        ));
        output.push_str("# HELP stereo_decode_calls_total Decode calls per stream\n");
        output.push_str("# TYPE stereo_decode_calls_total counter\n");
        output.push_str("# HELP stereo_decode_units_total Units delivered per stream\n");
        output.push_str("# TYPE stereo_decode_units_total counter\n");
        output.push_str("# HELP stereo_decode_bytes_total Payload bytes delivered per stream\n");
        output.push_str("# TYPE stereo_decode_bytes_total counter\n");
        output.push_str(
            "# HELP stereo_decode_duration_seconds_total Accumulated decode time in seconds\n",
        );
        output.push_str("# TYPE stereo_decode_duration_seconds_total counter\n");
        output.push_str("# HELP stereo_decode_duration_seconds_max Slowest decode call in seconds\n");
        output.push_str("# TYPE stereo_decode_duration_seconds_max gauge\n");
        for (stream, metrics) in &self.streams {
            output.push_str(&format!(
                "stereo_decode_calls_total{{stream=\"{}\"}} {}\n",
                stream, metrics.calls
            ));
            output.push_str(&format!(
                "stereo_decode_units_total{{stream=\"{}\"}} {}\n",
                stream, metrics.units
            ));
            output.push_str(&format!(
                "stereo_decode_bytes_total{{stream=\"{}\"}} {}\n",
                stream, metrics.bytes
            ));
            output.push_str(&format!(
                "stereo_decode_duration_seconds_total{{stream=\"{}\"}} {:.6}\n",
                stream,
                metrics.total_decode_ms / 1_000.0
            ));
            output.push_str(&format!(
                "stereo_decode_duration_seconds_max{{stream=\"{}\"}} {:.6}\n",
                stream,
                metrics.max_decode_ms / 1_000.0
            ));
        }
        output.push_str("# HELP stereo_decode_session_duration_seconds Wall time of the session\n");
        output.push_str("# TYPE stereo_decode_session_duration_seconds gauge\n");
        output.push_str(&format!(
            "stereo_decode_session_duration_seconds {:.6}\n",
            self.total_duration_ms / 1_000.0
        ));
        output
    }
}
