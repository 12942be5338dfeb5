//! Audio playback module using cpal.
//!
//! Plays audio samples through the default output device. Each call blocks until the
//! samples have drained, so only one stream is ever audible.
//! Uses lock-free ring buffer to avoid mutex contention in audio callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use parking_lot::{Condvar, Mutex};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::resampler::resample;
use super::util::{find_best_config, get_device_name};

/// Size of the playback ring buffer in samples (~11 seconds at 48kHz)
const PLAYBACK_RING_SIZE: usize = 524288;

/// Slack added to the expected duration before a playback is declared stuck.
const PLAYBACK_GRACE: Duration = Duration::from_secs(1);

/// Errors reported by an output device.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Playback interrupted")]
    Interrupted,

    #[error("Playback did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Output device error: {0}")]
    Device(String),
}

/// An exclusive output device: plays `(samples, sample_rate)` and blocks until done.
pub trait AudioSink: Send {
    fn play(&self, samples: &[f32], sample_rate: u32) -> Result<(), PlaybackError>;
}

impl<T: AudioSink + Sync + ?Sized> AudioSink for Arc<T> {
    fn play(&self, samples: &[f32], sample_rate: u32) -> Result<(), PlaybackError> {
        (**self).play(samples, sample_rate)
    }
}

/// Audio player that outputs mono samples to the default speaker.
/// The ring buffer keeps the high-priority audio callback free of locks.
pub struct Player {
    /// Kept alive to maintain the audio stream
    _stream: Stream,
    /// Sample rate of the audio device
    device_sample_rate: u32,
    /// Ring buffer producer for queuing samples
    producer: Mutex<ringbuf::HeapProd<f32>>,
    /// Flag to indicate playback should be interrupted
    interrupt: Arc<AtomicBool>,
    /// Set once by [`Player::stop`]; every later play is refused
    stopped: AtomicBool,
    /// Flag to indicate playback is active
    playing: Arc<AtomicBool>,
    /// Signalled by the callback when the ring buffer drains
    playing_mutex: Arc<Mutex<()>>,
    playback_complete: Arc<Condvar>,
}

impl Player {
    /// Open the default output device.
    ///
    /// # Errors
    /// Returns an error if:
    /// - No output device is available
    /// - Failed to get supported output configurations
    /// - Failed to build output stream
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().context("No output device available")?;

        info!("Using output device: {}", get_device_name(&device));

        let device_sample_rate = match device.default_output_config() {
            Ok(default_config) => default_config.sample_rate(),
            Err(_) => {
                let supported_configs = device.supported_output_configs().context("Failed to get supported output configs")?;
                find_best_config(supported_configs, 48000)?.sample_rate()
            }
        };

        let supported_configs = device.supported_output_configs().context("Failed to get supported output configs")?;
        let config = find_best_config(supported_configs, device_sample_rate)?;

        debug!("Audio playback config: {} Hz, {} channels, {:?}", device_sample_rate, config.channels(), config.sample_format());

        let ring = HeapRb::<f32>::new(PLAYBACK_RING_SIZE);
        let (producer, mut consumer) = ring.split();

        let interrupt = Arc::new(AtomicBool::new(false));
        let playing = Arc::new(AtomicBool::new(false));
        let playing_mutex = Arc::new(Mutex::new(()));
        let playback_complete = Arc::new(Condvar::new());

        let interrupt_clone = interrupt.clone();
        let playing_clone = playing.clone();
        let playing_mutex_clone = playing_mutex.clone();
        let playback_complete_clone = playback_complete.clone();

        let channels = config.channels() as usize;
        let stream_config: StreamConfig = config.config();

        let stream = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let interrupted = interrupt_clone.load(Ordering::Relaxed);

                for frame in data.chunks_mut(channels) {
                    let sample = if interrupted { 0.0 } else { consumer.try_pop().unwrap_or(0.0) };

                    // Duplicate mono sample to all channels
                    for channel in frame.iter_mut() {
                        *channel = sample;
                    }
                }

                if (consumer.is_empty() || interrupted) && playing_clone.swap(false, Ordering::SeqCst) {
                    let _guard = playing_mutex_clone.lock();
                    playback_complete_clone.notify_all();
                }
            },
            |err| error!("Audio playback error: {}", err),
            None,
        )?;

        stream.play().context("Failed to start playback stream")?;

        info!("Audio playback configured: device {} Hz (lock-free)", device_sample_rate);

        Ok(Self {
            _stream: stream,
            device_sample_rate,
            producer: Mutex::new(producer),
            interrupt,
            stopped: AtomicBool::new(false),
            playing,
            playing_mutex,
            playback_complete,
        })
    }

    /// Cut off current playback and refuse any later clip. The blocked
    /// [`AudioSink::play`] call, and every call after it, returns [`PlaybackError::Interrupted`].
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.interrupt.store(true, Ordering::SeqCst);
        let _guard = self.playing_mutex.lock();
        self.playback_complete.notify_all();
    }

    /// Stop playback and let the callback drain the buffer as silence.
    fn clear(&self) {
        let producer = self.producer.lock();
        self.interrupt.store(true, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        drop(producer);

        std::thread::sleep(Duration::from_millis(20));
        self.interrupt.store(self.is_stopped(), Ordering::SeqCst);
    }
}

impl AudioSink for Player {
    fn play(&self, samples: &[f32], sample_rate: u32) -> Result<(), PlaybackError> {
        if self.is_stopped() {
            return Err(PlaybackError::Interrupted);
        }
        if samples.is_empty() {
            return Ok(());
        }

        self.interrupt.store(false, Ordering::SeqCst);

        let samples_to_play = if sample_rate != self.device_sample_rate {
            resample(samples, sample_rate, self.device_sample_rate).map_err(|e| PlaybackError::Device(e.to_string()))?
        } else {
            samples.to_vec()
        };

        // Longer clips than the ring holds are fed in ring-sized slices as it drains
        let duration = Duration::from_secs_f64(samples_to_play.len() as f64 / self.device_sample_rate as f64);
        let deadline = Instant::now() + duration + PLAYBACK_GRACE;
        let mut offset = 0;

        while offset < samples_to_play.len() {
            let written = self.producer.lock().push_slice(&samples_to_play[offset..]);
            offset += written;
            self.playing.store(true, Ordering::SeqCst);

            if let Err(e) = self.wait_until_drained(deadline, duration) {
                self.clear();
                return Err(e);
            }
        }

        debug!("Played {} samples at {} Hz", samples_to_play.len(), self.device_sample_rate);
        Ok(())
    }
}

impl Player {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    // `stopped` is re-checked under the lock: a stop racing the flag reset above still wins
    fn wait_until_drained(&self, deadline: Instant, duration: Duration) -> Result<(), PlaybackError> {
        let mut guard = self.playing_mutex.lock();
        while self.playing.load(Ordering::SeqCst) {
            if self.interrupt.load(Ordering::SeqCst) || self.is_stopped() {
                return Err(PlaybackError::Interrupted);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("Playback timeout exceeded");
                return Err(PlaybackError::Timeout(duration + PLAYBACK_GRACE));
            }

            self.playback_complete.wait_for(&mut guard, deadline - now);
        }

        if self.interrupt.load(Ordering::SeqCst) || self.is_stopped() {
            return Err(PlaybackError::Interrupted);
        }
        Ok(())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.interrupt.store(true, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSink(Mutex<usize>);

    impl AudioSink for CountingSink {
        fn play(&self, samples: &[f32], _sample_rate: u32) -> Result<(), PlaybackError> {
            *self.0.lock() += samples.len();
            Ok(())
        }
    }

    #[test]
    fn shared_sink_forwards_to_inner_device() {
        let sink = Arc::new(CountingSink(Mutex::new(0)));
        let boxed: Box<dyn AudioSink> = Box::new(sink.clone());
        boxed.play(&[0.0; 32], 24000).unwrap();
        assert_eq!(*sink.0.lock(), 32);
    }

    #[test]
    fn playback_error_messages() {
        assert_eq!(PlaybackError::Interrupted.to_string(), "Playback interrupted");
        assert_eq!(PlaybackError::Device("gone".into()).to_string(), "Output device error: gone");
    }
}
