//! Engine seam: the synthesis call the pipeline treats as opaque, and the slot holding the
//! currently loaded engine.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

use crate::config::VoiceProfile;

/// Errors raised by a speech-synthesis engine.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("TTS generation failed: {0}")]
    Generation(String),

    #[error("Model file not found: {}", .0.display())]
    MissingModel(PathBuf),

    #[error("Failed to load model {model}: {reason}")]
    Load { model: String, reason: String },
}

/// Text + voice + speed in, mono samples out.
///
/// Calls block for as long as synthesis takes; callers run them off the async runtime.
pub trait SpeechEngine: Send + Sync {
    /// Synthesize one sentence.
    fn synthesize(&self, text: &str, voice: VoiceProfile, speed: f32) -> Result<Vec<f32>, SynthesisError>;

    /// Sample rate of the samples returned by [`SpeechEngine::synthesize`].
    fn sample_rate(&self) -> u32;

    /// Model name, for logs and health reporting.
    fn model(&self) -> &str;
}

/// Loads engines by model name (the `/load_model` collaborator).
pub trait EngineFactory: Send + Sync {
    fn load(&self, model: &str) -> Result<Arc<dyn SpeechEngine>, SynthesisError>;
}

/// Holds the engine new sentences are dispatched to. Empty until a model is loaded.
#[derive(Default)]
pub struct EngineSlot {
    engine: RwLock<Option<Arc<dyn SpeechEngine>>>,
}

impl EngineSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the engine. Tasks already holding the previous engine finish with it.
    pub fn install(&self, engine: Arc<dyn SpeechEngine>) {
        info!("🎵 TTS model {} ready ({} Hz)", engine.model(), engine.sample_rate());
        *self.engine.write() = Some(engine);
    }

    pub fn current(&self) -> Option<Arc<dyn SpeechEngine>> {
        self.engine.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.read().is_some()
    }
}
