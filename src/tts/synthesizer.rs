//! Kokoro speech-synthesis engine backed by sherpa-rs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sherpa_rs::OnnxConfig;
use sherpa_rs::tts::{CommonTtsConfig, KokoroTts, KokoroTtsConfig};
use tracing::{debug, info};

use super::engine::{EngineFactory, SpeechEngine, SynthesisError};
use crate::config::{AppConfig, VoiceProfile, VoiceSelector};

/// Kokoro always produces 24 kHz audio.
const KOKORO_SAMPLE_RATE: u32 = 24000;

/// Text-to-speech engine using a Kokoro model.
///
/// Kokoro phonemizes with a per-language lexicon or espeak-ng voice fixed at construction,
/// so one sherpa-rs instance is kept per voice language and built the first time a voice
/// of that language is used. sherpa-rs needs exclusive access per call, so concurrent
/// synthesis tasks queue on the mutex.
pub struct KokoroEngine {
    config: AppConfig,
    model: String,
    languages: Mutex<HashMap<&'static str, KokoroTts>>,
}

impl KokoroEngine {
    /// Load a Kokoro model from `<model_dir>/tts/<model>`, ready for `voice`'s language.
    ///
    /// # Errors
    /// Returns an error if a required model file is missing.
    pub fn load(config: &AppConfig, model: &str, voice: VoiceProfile) -> Result<Self, SynthesisError> {
        let dir = config.tts_model_dir(model);
        for file in ["model.onnx", "voices.bin", "tokens.txt"] {
            let path = dir.join(file);
            if !path.exists() {
                return Err(SynthesisError::MissingModel(path));
            }
        }

        info!("Initializing Kokoro TTS model {} with {} provider", model, config.effective_tts_provider());

        let engine = Self { config: config.clone(), model: model.to_string(), languages: Mutex::new(HashMap::new()) };
        engine.languages.lock().insert(voice.language, KokoroTts::new(tts_config(config, model, voice.language)));
        Ok(engine)
    }
}

/// sherpa-rs configuration for one voice language of `model`.
fn tts_config(config: &AppConfig, model: &str, language: &str) -> KokoroTtsConfig {
    let dir = config.tts_model_dir(model);

    KokoroTtsConfig {
        model: dir.join("model.onnx").to_string_lossy().to_string(),
        voices: dir.join("voices.bin").to_string_lossy().to_string(),
        tokens: dir.join("tokens.txt").to_string_lossy().to_string(),
        data_dir: dir.join("espeak-ng-data").to_string_lossy().to_string(),
        dict_dir: dir.join("dict").to_string_lossy().to_string(),
        lexicon: config.tts_lexicon(model, language),
        lang: AppConfig::tts_language(language).to_string(),
        // Speed is passed per call; keep the model's natural length scale
        length_scale: 1.0,
        onnx_config: OnnxConfig {
            provider: config.effective_tts_provider().as_sherpa_provider().to_string(),
            num_threads: config.tts_threads.try_into().unwrap_or(2),
            debug: config.verbose,
        },
        common_config: CommonTtsConfig { max_num_sentences: 1, ..Default::default() }, // Kokoro only supports 1
    }
}

impl SpeechEngine for KokoroEngine {
    fn synthesize(&self, text: &str, voice: VoiceProfile, speed: f32) -> Result<Vec<f32>, SynthesisError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        debug!("Synthesizing with {} ({}) at {:.2}x: \"{}\"", voice.name, voice.language, speed, text);

        let mut languages = self.languages.lock();
        let tts = languages.entry(voice.language).or_insert_with(|| {
            info!("Initializing Kokoro TTS for {} voices", voice.language);
            KokoroTts::new(tts_config(&self.config, &self.model, voice.language))
        });

        let audio = tts.create(text, voice.speaker_id, speed).map_err(|e| SynthesisError::Generation(e.to_string()))?;
        Ok(audio.samples)
    }

    fn sample_rate(&self) -> u32 {
        KOKORO_SAMPLE_RATE
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Loads [`KokoroEngine`]s for `/load_model` and `--preload`, warmed up for the
/// currently selected voice.
pub struct KokoroFactory {
    config: AppConfig,
    voices: Arc<VoiceSelector>,
}

impl KokoroFactory {
    pub fn new(config: AppConfig, voices: Arc<VoiceSelector>) -> Self {
        Self { config, voices }
    }
}

impl EngineFactory for KokoroFactory {
    fn load(&self, model: &str) -> Result<Arc<dyn SpeechEngine>, SynthesisError> {
        Ok(Arc::new(KokoroEngine::load(&self.config, model, self.voices.current())?))
    }
}
