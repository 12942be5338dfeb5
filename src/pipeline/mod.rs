//! Transcript-to-speech pipeline: fragments in, ordered audio out.
//!
//! Fragments are appended to a shared [`TextBuffer`]; every complete sentence is cut out,
//! given a sequence id and synthesized concurrently. A [`ReassemblyQueue`] puts the results
//! back in id order for the single [`PlaybackWorker`].

mod accumulator;
mod dispatcher;
mod metrics;
mod playback;
mod reassembly;
mod segmenter;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};

pub use dispatcher::PacingPolicy;

use accumulator::TextBuffer;
use dispatcher::Dispatcher;
use metrics::MetricsRecorder;
use playback::PlaybackWorker;
use reassembly::ReassemblyQueue;

use crate::audio::AudioSink;
use crate::config::VoiceSelector;
use crate::tts::EngineSlot;

/// Errors returned to the transcript source.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No model loaded. Call /load_model first.")]
    EngineUnavailable,

    #[error("No text provided.")]
    EmptyFragment,
}

/// A piece of live transcript.
///
/// `fragment_start` and `fragment_end` are offsets from `connection_start`, the moment the
/// transcription connection was opened.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub text: String,
    pub fragment_start: Duration,
    pub fragment_end: Duration,
    pub caller_posted_at: SystemTime,
    pub recipient_posted_at: SystemTime,
    pub connection_start: SystemTime,
}

/// Tunables for the synthesis side of the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub pacing: PacingPolicy,
    pub max_concurrent_synthesis: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { pacing: PacingPolicy::default(), max_concurrent_synthesis: 4 }
    }
}

/// Owns the transcript buffer and the reassembly queue, the pipeline's two locks.
pub struct Pipeline {
    buffer: Mutex<TextBuffer>,
    dispatcher: Dispatcher,
    queue: Arc<ReassemblyQueue>,
    metrics: Arc<MetricsRecorder>,
    engines: Arc<EngineSlot>,
    voices: Arc<VoiceSelector>,
}

impl Pipeline {
    /// Build a pipeline whose synthesis tasks run on `runtime`.
    pub fn new(settings: PipelineSettings, engines: Arc<EngineSlot>, voices: Arc<VoiceSelector>, runtime: Handle) -> Self {
        let queue = Arc::new(ReassemblyQueue::new());
        let metrics = Arc::new(MetricsRecorder::new());
        let dispatcher = Dispatcher::new(
            engines.clone(),
            voices.clone(),
            queue.clone(),
            metrics.clone(),
            settings.pacing,
            settings.max_concurrent_synthesis,
            runtime,
        );

        Self { buffer: Mutex::new(TextBuffer::new()), dispatcher, queue, metrics, engines, voices }
    }

    /// Accept a fragment and dispatch every sentence it completes.
    ///
    /// Rejections leave the buffer untouched. Sequence ids are allocated while the buffer
    /// lock is held, so sentences from concurrent fragments keep transcript order.
    ///
    /// # Returns
    /// Sequence ids of the dispatched sentences, possibly none.
    pub fn ingest(&self, fragment: &Fragment) -> Result<Vec<u64>, PipelineError> {
        if !self.engines.is_loaded() {
            warn!("⚠️  Fragment rejected: no TTS model loaded");
            return Err(PipelineError::EngineUnavailable);
        }
        if fragment.text.trim().is_empty() {
            warn!("⚠️  Fragment rejected: no text");
            return Err(PipelineError::EmptyFragment);
        }

        let connection_offset = fragment.connection_start.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
        let transcribed_at = fragment.connection_start + fragment.fragment_end;
        self.metrics.record_fragment(
            signed_millis(fragment.caller_posted_at, transcribed_at),
            signed_millis(fragment.recipient_posted_at, fragment.caller_posted_at),
        );

        let mut buffer = self.buffer.lock();
        buffer.append(&fragment.text, fragment.fragment_start, fragment.fragment_end);
        let ids = segmenter::extract_ready_sentences(&mut buffer)
            .into_iter()
            .map(|sentence| self.dispatcher.dispatch(sentence, connection_offset))
            .collect::<Result<Vec<_>, _>>()?;

        if ids.is_empty() {
            debug!("Buffered: \"{}\"", buffer.pending_text());
        }
        Ok(ids)
    }

    /// Consumer for this pipeline's queue, playing through `sink`.
    pub fn playback_worker(&self, sink: Box<dyn AudioSink>) -> PlaybackWorker {
        PlaybackWorker::new(self.queue.clone(), self.metrics.clone(), sink)
    }

    pub fn queue(&self) -> &Arc<ReassemblyQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn engines(&self) -> &Arc<EngineSlot> {
        &self.engines
    }

    pub fn voices(&self) -> &Arc<VoiceSelector> {
        &self.voices
    }

    /// Id the next complete sentence will get.
    pub fn next_sequence_id(&self) -> u64 {
        self.dispatcher.next_sequence_id()
    }

    /// Text waiting for a sentence boundary.
    pub fn pending_text(&self) -> String {
        self.buffer.lock().pending_text().to_string()
    }

    /// Stop the playback worker once it finishes its current result.
    pub fn shutdown(&self) {
        self.queue.close();
    }
}

/// `later - earlier` in milliseconds, negative if `later` is before `earlier`.
fn signed_millis(later: SystemTime, earlier: SystemTime) -> f64 {
    match later.duration_since(earlier) {
        Ok(d) => d.as_secs_f64() * 1000.0,
        Err(e) => -(e.duration().as_secs_f64() * 1000.0),
    }
}
