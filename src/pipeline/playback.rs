//! The single consumer of the reassembly queue.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use tracing::{debug, error, info, warn};

use super::metrics::MetricsRecorder;
use super::reassembly::{ReassemblyQueue, SynthesisResult};
use crate::audio::{AudioSink, PlaybackError};

/// Plays released results one at a time on the output device.
pub struct PlaybackWorker {
    queue: Arc<ReassemblyQueue>,
    metrics: Arc<MetricsRecorder>,
    sink: Box<dyn AudioSink>,
}

impl PlaybackWorker {
    pub fn new(queue: Arc<ReassemblyQueue>, metrics: Arc<MetricsRecorder>, sink: Box<dyn AudioSink>) -> Self {
        Self { queue, metrics, sink }
    }

    /// Run on a dedicated `playback` thread until the queue is closed.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new().name("playback".into()).spawn(move || self.run())
    }

    /// Block on the queue and play each result as it is released.
    ///
    /// A device failure is logged and recorded; the worker moves on to the next id.
    pub fn run(self) {
        info!("🔊 Playback worker started");

        while let Some(result) = self.queue.wait_release() {
            self.play(&result);
        }

        info!("🔇 Playback worker stopped");
    }

    fn play(&self, result: &SynthesisResult) {
        // Closed between release and here: shutting down, don't start a new clip
        if self.queue.is_closed() {
            debug!("Dropping #{}, queue closed", result.sequence_id);
            return;
        }
        debug!("🔊 Playing #{} \"{}\"", result.sequence_id, result.text);

        let started = SystemTime::now();
        match self.sink.play(&result.samples, result.sample_rate) {
            Ok(()) => {}
            Err(PlaybackError::Interrupted) => {
                warn!("⏹️  Playback of #{} interrupted", result.sequence_id);
                self.metrics.record_playback_failure(result.sequence_id);
                return;
            }
            Err(e) => {
                error!("❌ Playback failed for #{}: {}", result.sequence_id, e);
                self.metrics.record_playback_failure(result.sequence_id);
                return;
            }
        }
        let finished = SystemTime::now();

        let playback_millis = finished.duration_since(started).unwrap_or_default().as_secs_f64() * 1000.0;
        let latency = device_latency(result, started, finished);
        debug!("✅ #{} played in {:.0}ms, {:.0}ms behind the speaker", result.sequence_id, playback_millis, latency);

        self.metrics.record_playback(result.sequence_id, playback_millis, latency);
    }
}

/// Mean of the start and end offsets between playback and the original speech, in
/// milliseconds. Negative when playback runs ahead of the estimate.
pub fn device_latency(result: &SynthesisResult, playback_start: SystemTime, playback_end: SystemTime) -> f64 {
    let start = signed_millis(playback_start, result.absolute_start);
    let end = signed_millis(playback_end, result.absolute_end);
    (start + end) / 2.0
}

fn signed_millis(later: SystemTime, earlier: SystemTime) -> f64 {
    match later.duration_since(earlier) {
        Ok(d) => d.as_secs_f64() * 1000.0,
        Err(e) => -(e.duration().as_secs_f64() * 1000.0),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        played: Mutex<Vec<usize>>,
        fail_on_len: Option<usize>,
    }

    impl AudioSink for RecordingSink {
        fn play(&self, samples: &[f32], _sample_rate: u32) -> Result<(), PlaybackError> {
            if self.fail_on_len == Some(samples.len()) {
                return Err(PlaybackError::Device("unplugged".into()));
            }
            self.played.lock().push(samples.len());
            Ok(())
        }
    }

    fn result(id: u64, len: usize) -> SynthesisResult {
        SynthesisResult {
            sequence_id: id,
            text: format!("sentence {}", id),
            samples: vec![0.0; len],
            sample_rate: 1000,
            absolute_start: SystemTime::UNIX_EPOCH,
            absolute_end: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn latency_is_mean_of_start_and_end_offsets() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let mut played = result(1, 10);
        played.absolute_start = base;
        played.absolute_end = base + Duration::from_millis(1000);

        let latency = device_latency(&played, base + Duration::from_millis(400), base + Duration::from_millis(1600));
        assert!((latency - 500.0).abs() < 1e-6);
    }

    #[test]
    fn latency_can_be_negative() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let mut played = result(1, 10);
        played.absolute_start = base + Duration::from_millis(300);
        played.absolute_end = base + Duration::from_millis(500);

        let latency = device_latency(&played, base + Duration::from_millis(100), base + Duration::from_millis(300));
        assert!((latency + 200.0).abs() < 1e-6);
    }

    #[test]
    fn plays_in_order_and_continues_after_device_failure() {
        let queue = Arc::new(ReassemblyQueue::new());
        let metrics = Arc::new(MetricsRecorder::new());
        let sink = Arc::new(RecordingSink { fail_on_len: Some(20), ..Default::default() });

        queue.publish(result(3, 30));
        queue.publish(result(2, 20));
        queue.publish(result(1, 10));

        let handle = PlaybackWorker::new(queue.clone(), metrics.clone(), Box::new(sink.clone())).spawn().unwrap();

        for _ in 0..200 {
            if queue.next_to_play() == 4 && metrics.snapshot().played.len() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        queue.close();
        handle.join().unwrap();

        assert_eq!(*sink.played.lock(), vec![10, 30]);
        let report = metrics.snapshot();
        assert_eq!(report.playback_failures, vec![2]);
        assert_eq!(report.played, vec![1, 3]);
        assert_eq!(report.playback.len(), 2);
    }

    #[test]
    fn released_result_is_not_started_after_close() {
        let queue = Arc::new(ReassemblyQueue::new());
        let metrics = Arc::new(MetricsRecorder::new());
        let sink = Arc::new(RecordingSink::default());
        let worker = PlaybackWorker::new(queue.clone(), metrics.clone(), Box::new(sink.clone()));

        queue.publish(result(1, 10));
        let released = queue.try_release().unwrap();
        queue.close();
        worker.play(&released);

        assert!(sink.played.lock().is_empty());
        assert!(metrics.snapshot().played.is_empty());
    }

    #[test]
    fn worker_stops_when_queue_closes() {
        let queue = Arc::new(ReassemblyQueue::new());
        let handle = PlaybackWorker::new(queue.clone(), Arc::new(MetricsRecorder::new()), Box::new(RecordingSink::default()))
            .spawn()
            .unwrap();

        queue.close();
        handle.join().unwrap();
    }
}
