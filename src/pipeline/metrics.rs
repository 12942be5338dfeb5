//! Per-stage timing records, summarized at shutdown and persisted as one JSON document.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use tracing::info;

/// Timing of one synthesized sentence.
///
/// Written as `[time, audio duration, speed, sentence]` so the time sits at index 0.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisSample {
    pub sequence_id: u64,
    pub sentence: String,
    pub millis: f64,
    pub audio_millis: f64,
    pub speed: f64,
}

impl Serialize for SynthesisSample {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (self.millis, self.audio_millis, self.speed, &self.sentence).serialize(serializer)
    }
}

/// Everything recorded during a run, in the shape written to the metrics file.
///
/// Every stage except `synthesis time` is a flat array of milliseconds. Fragment stages are
/// positional: entry `n` belongs to the `n`th accepted fragment. `playback time` and
/// `system latency` line up with `played ids`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsReport {
    #[serde(rename = "transcription time")]
    pub transcription: Vec<f64>,
    #[serde(rename = "transmission time")]
    pub transmission: Vec<f64>,
    #[serde(rename = "synthesis time")]
    pub synthesis: BTreeMap<u64, SynthesisSample>,
    #[serde(rename = "playback time")]
    pub playback: Vec<f64>,
    #[serde(rename = "system latency")]
    pub system_latency: Vec<f64>,
    #[serde(rename = "played ids")]
    pub played: Vec<u64>,
    pub skipped: Vec<u64>,
    #[serde(rename = "playback failures")]
    pub playback_failures: Vec<u64>,
}

/// Count / mean / min / max of one stage, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl StageSummary {
    fn of(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut count = 0;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for value in values {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }

        (count > 0).then(|| Self { count, mean: sum / count as f64, min, max })
    }
}

/// Append-only metrics store shared by the ingress, synthesis tasks and playback worker.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    report: Mutex<MetricsReport>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcription and transmission latency of one accepted fragment.
    pub fn record_fragment(&self, transcription_millis: f64, transmission_millis: f64) {
        let mut report = self.report.lock();
        report.transcription.push(transcription_millis);
        report.transmission.push(transmission_millis);
    }

    pub fn record_synthesis(&self, sample: SynthesisSample) {
        self.report.lock().synthesis.insert(sample.sequence_id, sample);
    }

    /// Playback duration and device latency of one played sentence.
    pub fn record_playback(&self, sequence_id: u64, playback_millis: f64, latency_millis: f64) {
        let mut report = self.report.lock();
        report.played.push(sequence_id);
        report.playback.push(playback_millis);
        report.system_latency.push(latency_millis);
    }

    pub fn record_skip(&self, sequence_id: u64) {
        self.report.lock().skipped.push(sequence_id);
    }

    pub fn record_playback_failure(&self, sequence_id: u64) {
        self.report.lock().playback_failures.push(sequence_id);
    }

    pub fn snapshot(&self) -> MetricsReport {
        self.report.lock().clone()
    }

    /// Per-stage summaries, for stages with at least one sample.
    pub fn summary(&self) -> Vec<(&'static str, StageSummary)> {
        let report = self.report.lock();

        [
            ("Transcription", StageSummary::of(report.transcription.iter().copied())),
            ("Transmission", StageSummary::of(report.transmission.iter().copied())),
            ("Synthesis", StageSummary::of(report.synthesis.values().map(|s| s.millis))),
            ("Playback", StageSummary::of(report.playback.iter().copied())),
            ("System latency", StageSummary::of(report.system_latency.iter().copied())),
        ]
        .into_iter()
        .filter_map(|(stage, summary)| summary.map(|s| (stage, s)))
        .collect()
    }

    pub fn log_summary(&self) {
        let (played, skipped, failed) = {
            let report = self.report.lock();
            (report.playback.len(), report.skipped.len(), report.playback_failures.len())
        };

        info!("📊 Session summary: {} played, {} skipped, {} playback failures", played, skipped, failed);
        for (stage, s) in self.summary() {
            info!("   {:<15} n={:<4} mean={:>8.1}ms min={:>8.1}ms max={:>8.1}ms", stage, s.count, s.mean, s.min, s.max);
        }
    }

    /// Write the report as pretty-printed JSON, replacing any previous file.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot()).context("Failed to serialize metrics")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        info!("💾 Metrics written to {}", path.display());
        Ok(())
    }
}
