//! Sequence-id allocation and concurrent synthesis.
//!
//! Every sentence gets the next sequence id and its own synthesis task. Tasks run on the
//! blocking pool behind a fixed number of permits, handed out in id order by a single
//! feeder task, and always finish by either publishing a result or marking their id as
//! skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::{debug, error, info};

use super::PipelineError;
use super::metrics::{MetricsRecorder, SynthesisSample};
use super::reassembly::{FIRST_SEQUENCE_ID, ReassemblyQueue, SynthesisResult};
use super::segmenter::SentenceUnit;
use crate::config::{VoiceProfile, VoiceSelector};
use crate::tts::{EngineSlot, SpeechEngine};

/// Backlog-driven speed selection, the pipeline's only backpressure.
///
/// Submissions are never dropped or delayed; a long backlog of unplayed audio is drained
/// by speaking faster instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingPolicy {
    pub default_speed: f64,
    pub catchup_speed: f64,
    pub backlog_threshold: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self { default_speed: 1.1, catchup_speed: 1.3, backlog_threshold: Duration::from_secs(10) }
    }
}

impl PacingPolicy {
    /// Speed multiplier for a sentence synthesized while `backlog` of audio is queued.
    pub fn speed_for(&self, backlog: Duration) -> f64 {
        if backlog > self.backlog_threshold { self.catchup_speed } else { self.default_speed }
    }
}

/// One sentence on its way to the engine.
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub sequence_id: u64,
    pub sentence: SentenceUnit,
    /// Connection start as an offset from the Unix epoch; sentence times are relative to it.
    pub connection_offset: Duration,
}

impl SynthesisJob {
    /// Wall-clock span the sentence was originally spoken in.
    pub fn absolute_span(&self) -> (SystemTime, SystemTime) {
        let connection_start = SystemTime::UNIX_EPOCH + self.connection_offset;
        (connection_start + self.sentence.estimated_start, connection_start + self.sentence.estimated_end)
    }
}

/// Shared handles a synthesis task reports into.
#[derive(Clone)]
struct TaskContext {
    queue: Arc<ReassemblyQueue>,
    metrics: Arc<MetricsRecorder>,
    pacing: PacingPolicy,
    permits: Arc<Semaphore>,
}

/// A job waiting for a synthesis permit.
struct PendingJob {
    engine: Arc<dyn SpeechEngine>,
    voice: VoiceProfile,
    job: SynthesisJob,
}

/// Allocates sequence ids and queues jobs for the feeder.
pub struct Dispatcher {
    next_id: AtomicU64,
    engines: Arc<EngineSlot>,
    voices: Arc<VoiceSelector>,
    context: TaskContext,
    jobs: mpsc::UnboundedSender<PendingJob>,
}

impl Dispatcher {
    pub fn new(
        engines: Arc<EngineSlot>,
        voices: Arc<VoiceSelector>,
        queue: Arc<ReassemblyQueue>,
        metrics: Arc<MetricsRecorder>,
        pacing: PacingPolicy,
        max_concurrent: usize,
        runtime: Handle,
    ) -> Self {
        let context = TaskContext { queue, metrics, pacing, permits: Arc::new(Semaphore::new(max_concurrent.max(1))) };
        let (jobs, pending) = mpsc::unbounded_channel();
        runtime.spawn(feed(context.clone(), pending));

        Self { next_id: AtomicU64::new(FIRST_SEQUENCE_ID), engines, voices, context, jobs }
    }

    /// Allocate the next id and queue the sentence for the currently loaded engine.
    /// Never blocks on synthesis.
    ///
    /// # Errors
    /// [`PipelineError::EngineUnavailable`] if no engine is loaded; no id is consumed.
    pub fn dispatch(&self, sentence: SentenceUnit, connection_offset: Duration) -> Result<u64, PipelineError> {
        let engine = self.engines.current().ok_or(PipelineError::EngineUnavailable)?;
        let sequence_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let voice = self.voices.current();

        info!("📝 #{} \"{}\"", sequence_id, sentence.text);

        let job = SynthesisJob { sequence_id, sentence, connection_offset };
        if self.jobs.send(PendingJob { engine, voice, job }).is_err() {
            error!("❌ Synthesis feeder stopped, skipping #{}", sequence_id);
            skip(&self.context, sequence_id);
        }
        Ok(sequence_id)
    }

    /// Id the next dispatched sentence will get.
    pub fn next_sequence_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}

/// Hand out permits in the order jobs were dispatched, then run each job on its own task.
async fn feed(ctx: TaskContext, mut pending: mpsc::UnboundedReceiver<PendingJob>) {
    while let Some(next) = pending.recv().await {
        let Ok(permit) = ctx.permits.clone().acquire_owned().await else {
            error!("❌ Synthesis pool closed, skipping #{}", next.job.sequence_id);
            skip(&ctx, next.job.sequence_id);
            continue;
        };
        tokio::spawn(synthesize(ctx.clone(), permit, next));
    }
    debug!("Synthesis feeder stopped");
}

/// Run one job to completion: a published result or a skip, never neither.
async fn synthesize(ctx: TaskContext, _permit: OwnedSemaphorePermit, pending: PendingJob) {
    let PendingJob { engine, voice, job } = pending;
    let sequence_id = job.sequence_id;

    let speed = ctx.pacing.speed_for(ctx.queue.queued_audio());
    let sample_rate = engine.sample_rate();
    let text = job.sentence.text.clone();
    let started = Instant::now();

    let outcome = tokio::task::spawn_blocking(move || engine.synthesize(&text, voice, speed as f32)).await;
    let elapsed = started.elapsed();

    let samples = match outcome {
        Ok(Ok(samples)) => samples,
        Ok(Err(e)) => {
            error!("❌ TTS error for #{}: {}", sequence_id, e);
            skip(&ctx, sequence_id);
            return;
        }
        Err(e) => {
            error!("❌ Synthesis task for #{} panicked: {}", sequence_id, e);
            skip(&ctx, sequence_id);
            return;
        }
    };

    let (absolute_start, absolute_end) = job.absolute_span();
    let result = SynthesisResult { sequence_id, text: job.sentence.text, samples, sample_rate, absolute_start, absolute_end };
    let audio = result.audio_duration();

    debug!("🎵 #{} synthesized in {:?} ({:.2}s of audio at {:.2}x)", sequence_id, elapsed, audio.as_secs_f64(), speed);

    ctx.metrics.record_synthesis(SynthesisSample {
        sequence_id,
        sentence: result.text.clone(),
        millis: elapsed.as_secs_f64() * 1000.0,
        audio_millis: audio.as_secs_f64() * 1000.0,
        speed,
    });
    ctx.queue.publish(result);
}

fn skip(ctx: &TaskContext, sequence_id: u64) {
    ctx.metrics.record_skip(sequence_id);
    ctx.queue.mark_skip(sequence_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::testing::ScriptedEngine;

    fn sentence(text: &str) -> SentenceUnit {
        SentenceUnit { text: text.to_string(), estimated_start: Duration::from_millis(100), estimated_end: Duration::from_millis(900) }
    }

    fn dispatcher(engines: Arc<EngineSlot>, queue: Arc<ReassemblyQueue>, metrics: Arc<MetricsRecorder>) -> Dispatcher {
        dispatcher_with_permits(engines, queue, metrics, 4)
    }

    fn dispatcher_with_permits(engines: Arc<EngineSlot>, queue: Arc<ReassemblyQueue>, metrics: Arc<MetricsRecorder>, permits: usize) -> Dispatcher {
        Dispatcher::new(engines, Arc::new(VoiceSelector::new("af_bella")), queue, metrics, PacingPolicy::default(), permits, Handle::current())
    }

    async fn wait_for_cursor(queue: &ReassemblyQueue, released: &mut Vec<u64>, target: u64) {
        for _ in 0..200 {
            while let Some(result) = queue.try_release() {
                released.push(result.sequence_id);
            }
            if queue.next_to_play() >= target {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("cursor stuck at {}", queue.next_to_play());
    }

    #[test]
    fn speed_steps_up_above_threshold() {
        let pacing = PacingPolicy::default();
        assert_eq!(pacing.speed_for(Duration::ZERO), 1.1);
        assert_eq!(pacing.speed_for(Duration::from_secs(10)), 1.1);
        assert_eq!(pacing.speed_for(Duration::from_millis(10_001)), 1.3);
    }

    #[test]
    fn speed_is_non_decreasing_in_backlog() {
        let pacing = PacingPolicy::default();
        let speeds: Vec<f64> = (0..300).map(|tenths| pacing.speed_for(Duration::from_millis(tenths * 100))).collect();
        assert!(speeds.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn absolute_span_adds_connection_offset() {
        let job = SynthesisJob { sequence_id: 1, sentence: sentence("Hello."), connection_offset: Duration::from_secs(1_700_000_000) };
        let (start, end) = job.absolute_span();
        assert_eq!(start.duration_since(SystemTime::UNIX_EPOCH).unwrap(), Duration::from_secs(1_700_000_000) + Duration::from_millis(100));
        assert_eq!(end.duration_since(start).unwrap(), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn unloaded_engine_rejects_without_consuming_ids() {
        let queue = Arc::new(ReassemblyQueue::new());
        let dispatcher = dispatcher(Arc::new(EngineSlot::new()), queue.clone(), Arc::new(MetricsRecorder::new()));

        let err = dispatcher.dispatch(sentence("Hello."), Duration::ZERO).unwrap_err();
        assert!(matches!(err, PipelineError::EngineUnavailable));
        assert_eq!(dispatcher.next_sequence_id(), FIRST_SEQUENCE_ID);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ids_are_gapless_and_results_reassemble_in_order() {
        let engine = ScriptedEngine::new()
            .with_delay("Hello.", Duration::from_millis(120))
            .with_delay("World.", Duration::from_millis(10))
            .with_delay("Test.", Duration::from_millis(50));
        let engines = Arc::new(EngineSlot::new());
        engines.install(Arc::new(engine));

        let queue = Arc::new(ReassemblyQueue::new());
        let dispatcher = dispatcher(engines, queue.clone(), Arc::new(MetricsRecorder::new()));

        let ids: Vec<u64> = ["Hello.", "World.", "Test."].iter().map(|s| dispatcher.dispatch(sentence(s), Duration::ZERO).unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let mut released = Vec::new();
        wait_for_cursor(&queue, &mut released, 4).await;
        assert_eq!(released, vec![1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn engine_failure_registers_skip() {
        let engine = ScriptedEngine::new().failing_on("World.");
        let engines = Arc::new(EngineSlot::new());
        engines.install(Arc::new(engine));

        let queue = Arc::new(ReassemblyQueue::new());
        let metrics = Arc::new(MetricsRecorder::new());
        let dispatcher = dispatcher(engines, queue.clone(), metrics.clone());

        for text in ["Hello.", "World.", "Test."] {
            dispatcher.dispatch(sentence(text), Duration::ZERO).unwrap();
        }

        let mut released = Vec::new();
        wait_for_cursor(&queue, &mut released, 4).await;
        assert_eq!(released, vec![1, 3]);
        assert_eq!(metrics.snapshot().skipped, vec![2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn backlog_raises_speed_for_later_jobs() {
        let engine = Arc::new(ScriptedEngine::new());
        let engines = Arc::new(EngineSlot::new());
        engines.install(engine.clone());

        let queue = Arc::new(ReassemblyQueue::new());
        let dispatcher = dispatcher(engines, queue.clone(), Arc::new(MetricsRecorder::new()));

        // Hold the cursor at 1 so published audio accumulates.
        queue.publish(SynthesisResult {
            sequence_id: 50,
            text: "queued".into(),
            samples: vec![0.0; 11 * 1000],
            sample_rate: 1000,
            absolute_start: SystemTime::UNIX_EPOCH,
            absolute_end: SystemTime::UNIX_EPOCH,
        });
        assert!(queue.queued_audio() > PacingPolicy::default().backlog_threshold);

        dispatcher.dispatch(sentence("Fast."), Duration::ZERO).unwrap();
        for _ in 0..200 {
            if queue.pending() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(engine.speeds.lock().as_slice(), &[("Fast.".to_string(), 1.3)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn saturated_pool_synthesizes_in_id_order() {
        let engine = Arc::new(ScriptedEngine::new().with_delay("S0.", Duration::from_millis(80)));
        let engines = Arc::new(EngineSlot::new());
        engines.install(engine.clone());

        let queue = Arc::new(ReassemblyQueue::new());
        let dispatcher = dispatcher_with_permits(engines, queue.clone(), Arc::new(MetricsRecorder::new()), 1);

        let texts: Vec<String> = (0..12).map(|n| format!("S{}.", n)).collect();
        for text in &texts {
            dispatcher.dispatch(sentence(text), Duration::ZERO).unwrap();
        }

        let mut released = Vec::new();
        wait_for_cursor(&queue, &mut released, 13).await;

        let started: Vec<String> = engine.speeds.lock().iter().map(|(text, _)| text.clone()).collect();
        assert_eq!(started, texts);
        assert_eq!(released, (1..=12).collect::<Vec<u64>>());
    }

    #[test]
    fn default_speeds_are_exact() {
        let pacing = PacingPolicy::default();
        assert_eq!(serde_json::to_string(&pacing.speed_for(Duration::ZERO)).unwrap(), "1.1");
        assert_eq!(serde_json::to_string(&pacing.speed_for(Duration::MAX)).unwrap(), "1.3");
    }
}
