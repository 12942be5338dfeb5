//! Text-to-speech module.
//!
//! Defines the engine seam used by the pipeline and the Kokoro engine behind it.

mod engine;
mod synthesizer;

pub use engine::{EngineFactory, EngineSlot, SpeechEngine, SynthesisError};
pub use synthesizer::KokoroFactory;

#[cfg(test)]
pub(crate) use engine::testing;
