//! Ordered reassembly of out-of-order synthesis results.
//!
//! Synthesis tasks finish in any order. The queue holds finished results by sequence id
//! and releases them to the single playback consumer strictly in id order, stepping over
//! ids that were marked as skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, SystemTime};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

/// First sequence id handed out by the dispatcher.
pub const FIRST_SEQUENCE_ID: u64 = 1;

/// Synthesized audio for one sentence, with the wall-clock span the sentence was spoken in.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub sequence_id: u64,
    pub text: String,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub absolute_start: SystemTime,
    pub absolute_end: SystemTime,
}

impl SynthesisResult {
    /// Playback length of the samples.
    pub fn audio_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

struct QueueState {
    ready: BTreeMap<u64, SynthesisResult>,
    skipped: BTreeSet<u64>,
    next_to_play: u64,
    queued_audio: Duration,
    closed: bool,
}

/// Sequence-id gate between the synthesis tasks and the playback worker.
///
/// One lock guards the map, the cursor and the queued-audio counter; `publish` and
/// `mark_skip` wake the consumer blocked in [`ReassemblyQueue::wait_release`].
pub struct ReassemblyQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl Default for ReassemblyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReassemblyQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                ready: BTreeMap::new(),
                skipped: BTreeSet::new(),
                next_to_play: FIRST_SEQUENCE_ID,
                queued_audio: Duration::ZERO,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Insert a finished result.
    ///
    /// Results for ids already released, already published, or already skipped are
    /// rejected so no id is ever played twice.
    ///
    /// # Returns
    /// `true` if the result was queued.
    pub fn publish(&self, result: SynthesisResult) -> bool {
        let mut state = self.state.lock();
        let id = result.sequence_id;

        if id < state.next_to_play || state.ready.contains_key(&id) || state.skipped.contains(&id) {
            warn!("Dropping result for sequence {}: already released, queued or skipped", id);
            return false;
        }

        state.queued_audio += result.audio_duration();
        state.ready.insert(id, result);
        drop(state);

        self.changed.notify_one();
        true
    }

    /// Record that `id` will never produce playable audio.
    ///
    /// A result already published for `id` is discarded with it.
    ///
    /// # Returns
    /// `false` if `id` was already released.
    pub fn mark_skip(&self, id: u64) -> bool {
        let mut state = self.state.lock();

        if id < state.next_to_play {
            return false;
        }

        if let Some(discarded) = state.ready.remove(&id) {
            state.queued_audio = state.queued_audio.saturating_sub(discarded.audio_duration());
        }
        state.skipped.insert(id);
        drop(state);

        self.changed.notify_one();
        true
    }

    /// Release the result at the cursor if it is ready, consuming skipped ids on the way.
    pub fn try_release(&self) -> Option<SynthesisResult> {
        Self::release_locked(&mut self.state.lock())
    }

    /// Block until the result at the cursor is ready.
    ///
    /// # Returns
    /// `None` once the queue is closed.
    pub fn wait_release(&self) -> Option<SynthesisResult> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(result) = Self::release_locked(&mut state) {
                return Some(result);
            }
            self.changed.wait(&mut state);
        }
    }

    /// Wake the consumer and make every later [`ReassemblyQueue::wait_release`] return `None`.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Total duration of published results not yet released.
    pub fn queued_audio(&self) -> Duration {
        self.state.lock().queued_audio
    }

    /// Id the playback worker is waiting for.
    pub fn next_to_play(&self) -> u64 {
        self.state.lock().next_to_play
    }

    /// Number of published results waiting behind the cursor.
    pub fn pending(&self) -> usize {
        self.state.lock().ready.len()
    }

    fn release_locked(state: &mut QueueState) -> Option<SynthesisResult> {
        while state.skipped.remove(&state.next_to_play) {
            debug!("⏭️  Skipping sequence {}", state.next_to_play);
            state.next_to_play += 1;
        }

        let result = state.ready.remove(&state.next_to_play)?;
        state.next_to_play += 1;
        state.queued_audio = state.queued_audio.saturating_sub(result.audio_duration());
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;

    use super::*;

    /// `seconds` of audio at 10 Hz.
    fn result(id: u64, seconds: usize) -> SynthesisResult {
        SynthesisResult {
            sequence_id: id,
            text: format!("sentence {}", id),
            samples: vec![0.0; seconds * 10],
            sample_rate: 10,
            absolute_start: SystemTime::UNIX_EPOCH,
            absolute_end: SystemTime::UNIX_EPOCH,
        }
    }

    fn drain(queue: &ReassemblyQueue) -> Vec<u64> {
        std::iter::from_fn(|| queue.try_release()).map(|r| r.sequence_id).collect()
    }

    #[test]
    fn out_of_order_completion_plays_in_order() {
        let queue = ReassemblyQueue::new();

        queue.publish(result(2, 1));
        assert!(queue.try_release().is_none());
        queue.publish(result(3, 1));
        assert!(queue.try_release().is_none());
        queue.publish(result(1, 1));

        assert_eq!(drain(&queue), vec![1, 2, 3]);
        assert_eq!(queue.next_to_play(), 4);
    }

    #[test]
    fn skipped_id_is_stepped_over() {
        let queue = ReassemblyQueue::new();
        queue.publish(result(1, 1));
        queue.publish(result(3, 1));
        assert_eq!(drain(&queue), vec![1]);

        queue.mark_skip(2);
        assert_eq!(drain(&queue), vec![3]);
        assert_eq!(queue.next_to_play(), 4);
    }

    #[test]
    fn randomized_completion_order_is_reassembled() {
        let mut rng = SmallRng::seed_from_u64(7);

        for _ in 0..50 {
            let queue = ReassemblyQueue::new();
            let mut ids: Vec<u64> = (1..=40).collect();
            ids.shuffle(&mut rng);

            let mut played = Vec::new();
            for id in ids {
                if id % 7 == 0 {
                    queue.mark_skip(id);
                } else {
                    queue.publish(result(id, 1));
                }
                played.extend(drain(&queue));
            }

            let expected: Vec<u64> = (1..=40).filter(|id| id % 7 != 0).collect();
            assert_eq!(played, expected);
            assert_eq!(queue.next_to_play(), 41);
            assert_eq!(queue.queued_audio(), Duration::ZERO);
        }
    }

    #[test]
    fn queued_audio_tracks_unplayed_results() {
        let queue = ReassemblyQueue::new();
        queue.publish(result(2, 3));
        queue.publish(result(3, 4));
        assert_eq!(queue.queued_audio(), Duration::from_secs(7));

        queue.publish(result(1, 2));
        assert_eq!(queue.queued_audio(), Duration::from_secs(9));

        queue.try_release();
        assert_eq!(queue.queued_audio(), Duration::from_secs(7));

        queue.mark_skip(2);
        assert_eq!(queue.queued_audio(), Duration::from_secs(4));

        assert_eq!(drain(&queue), vec![3]);
        assert_eq!(queue.queued_audio(), Duration::ZERO);
    }

    #[test]
    fn duplicate_and_stale_results_are_rejected() {
        let queue = ReassemblyQueue::new();
        assert!(queue.publish(result(1, 1)));
        assert!(!queue.publish(result(1, 1)));
        assert_eq!(drain(&queue), vec![1]);

        assert!(!queue.publish(result(1, 1)));
        assert!(!queue.mark_skip(1));

        assert!(queue.mark_skip(2));
        assert!(!queue.publish(result(2, 1)));
        assert_eq!(queue.queued_audio(), Duration::ZERO);
    }

    #[test]
    fn zero_rate_result_has_no_duration() {
        let mut silent = result(1, 1);
        silent.sample_rate = 0;
        assert_eq!(silent.audio_duration(), Duration::ZERO);
    }

    #[test]
    fn waiting_consumer_wakes_on_publish() {
        let queue = Arc::new(ReassemblyQueue::new());

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || (0..3).filter_map(|_| queue.wait_release()).map(|r| r.sequence_id).collect::<Vec<_>>())
        };

        for id in [3, 2, 1] {
            thread::sleep(Duration::from_millis(10));
            queue.publish(result(id, 1));
        }

        assert_eq!(consumer.join().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn waiting_consumer_wakes_on_skip_and_close() {
        let queue = Arc::new(ReassemblyQueue::new());
        queue.publish(result(2, 1));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let first = queue.wait_release().map(|r| r.sequence_id);
                let second = queue.wait_release().map(|r| r.sequence_id);
                (first, second)
            })
        };

        thread::sleep(Duration::from_millis(20));
        queue.mark_skip(1);
        thread::sleep(Duration::from_millis(20));
        queue.close();

        assert_eq!(consumer.join().unwrap(), (Some(2), None));
    }
}
