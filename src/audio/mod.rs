//! Audio output for synthesized speech.
//!
//! This module provides playback on the default output device using cpal,
//! with resampling support via rubato.

mod playback;
pub mod resampler;
pub mod util;

pub use playback::{AudioSink, PlaybackError, Player};
