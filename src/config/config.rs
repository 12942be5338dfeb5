//! Application configuration and CLI argument parsing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::voices;
use crate::pipeline::{PacingPolicy, PipelineSettings};

/// Kokoro model loaded when none is named.
pub const DEFAULT_TTS_MODEL: &str = "kokoro-multi-lang-v1_0";

/// Hardware acceleration provider for ONNX models.
/// Auto-detected based on platform if not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// CPU inference (default fallback, always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA acceleration (Linux only, requires CUDA toolkit)
    Cuda,
    /// Apple CoreML acceleration (macOS only, uses Neural Engine)
    #[value(name = "coreml")]
    CoreMl,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sherpa_provider())
    }
}

impl Provider {
    /// Convert to sherpa-rs provider string.
    pub fn as_sherpa_provider(&self) -> &'static str {
        match self {
            Provider::Cpu => "cpu",
            Provider::Cuda => "cuda",
            Provider::CoreMl => "coreml",
        }
    }
}

/// Speech relay configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "speech-relay")]
#[command(author, version, about = "Speaks a live transcript back in sentence order", long_about = None)]
pub struct AppConfig {
    /// List all available TTS voices and exit
    #[arg(long)]
    pub list_voices: bool,

    /// Address the transcript ingress listens on
    #[arg(long, short = 'l', env = "SPEECH_RELAY_LISTEN", default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Directory containing TTS model directories
    #[arg(long, short = 'd', env = "MODEL_DIR", default_value_os_t = default_model_dir())]
    pub model_dir: PathBuf,

    /// TTS model loaded by --preload and by /load_model requests that name no model
    #[arg(long, default_value = DEFAULT_TTS_MODEL)]
    pub tts_model: String,

    /// Load the TTS model at startup instead of waiting for /load_model
    #[arg(long)]
    pub preload: bool,

    /// Initial TTS voice (unknown names fall back to af_bella)
    #[arg(long, default_value = voices::DEFAULT_VOICE)]
    pub tts_voice: String,

    /// Hardware acceleration provider for TTS (auto-detected if not specified)
    #[arg(long, value_enum)]
    pub tts_provider: Option<Provider>,

    /// TTS threads (0 = auto-detect based on CPU cores)
    #[arg(long, default_value = "0")]
    pub tts_threads: usize,

    /// Speech speed while the playback backlog is below the threshold
    #[arg(long, default_value = "1.1")]
    pub default_speed: f64,

    /// Speech speed used to drain a backlog above the threshold
    #[arg(long, default_value = "1.3")]
    pub catchup_speed: f64,

    /// Queued (unplayed) audio, in seconds, above which the catch-up speed applies
    #[arg(long, default_value = "10")]
    pub backlog_threshold_secs: f32,

    /// Maximum sentences synthesized at once (0 = number of CPU cores)
    #[arg(long, default_value = "0")]
    pub max_concurrent_synthesis: usize,

    /// File the run's metrics are written to at shutdown
    #[arg(long, env = "SPEECH_RELAY_METRICS", default_value = "testing_logs.json")]
    pub metrics_file: PathBuf,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        let mut config = Self::parse();

        if config.list_voices {
            voices::print_voices();
            std::process::exit(0);
        }

        config.normalize_thread_counts();
        config
    }

    /// Resolve the "auto" (zero) thread and worker counts.
    ///
    /// With CUDA the GPU handles parallelism, so a single TTS thread avoids contention.
    fn normalize_thread_counts(&mut self) {
        let cpu_cores = num_cpus::get();

        if self.tts_threads == 0 {
            self.tts_threads = if self.effective_tts_provider() == Provider::Cuda { 1 } else { (cpu_cores / 3).max(1) };
        }

        if self.max_concurrent_synthesis == 0 {
            self.max_concurrent_synthesis = cpu_cores.max(1);
        }
    }

    /// Get the effective TTS provider.
    pub fn effective_tts_provider(&self) -> Provider {
        self.tts_provider.unwrap_or_else(detect_provider)
    }

    /// Directory of a named Kokoro model.
    pub fn tts_model_dir(&self, model: &str) -> PathBuf {
        self.model_dir.join("tts").join(model)
    }

    /// Lexicon files for a voice language. Kokoro ships lexicons for English and Chinese;
    /// other languages return an empty string and rely on [`AppConfig::tts_language`].
    pub fn tts_lexicon(&self, model: &str, language: &str) -> String {
        let dir = self.tts_model_dir(model);
        let us = dir.join("lexicon-us-en.txt");

        match language {
            "American English" => us.to_string_lossy().to_string(),
            "British English" => dir.join("lexicon-gb-en.txt").to_string_lossy().to_string(),
            "Mandarin Chinese" => format!("{},{}", us.to_string_lossy(), dir.join("lexicon-zh.txt").to_string_lossy()),
            _ => String::new(),
        }
    }

    /// espeak-ng language for voice languages without a lexicon.
    pub fn tts_language(language: &str) -> &'static str {
        match language {
            "Spanish" => "es",
            "French" => "fr",
            "Hindi" => "hi",
            "Italian" => "it",
            "Japanese" => "ja",
            "Portuguese BR" => "pt-br",
            _ => "",
        }
    }

    /// Backlog-driven speed selection.
    pub fn pacing(&self) -> PacingPolicy {
        PacingPolicy {
            default_speed: self.default_speed,
            catchup_speed: self.catchup_speed,
            backlog_threshold: Duration::try_from_secs_f32(self.backlog_threshold_secs.max(0.0)).unwrap_or(Duration::MAX),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings { pacing: self.pacing(), max_concurrent_synthesis: self.max_concurrent_synthesis.max(1) }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.preload {
            let model_dir = self.tts_model_dir(&self.tts_model);
            if !model_dir.exists() {
                anyhow::bail!("TTS model directory does not exist: {}", model_dir.display());
            }
        }

        if self.default_speed <= 0.0 || self.catchup_speed <= 0.0 {
            anyhow::bail!("TTS speeds must be positive");
        }

        if self.catchup_speed < self.default_speed {
            anyhow::bail!("Catch-up speed ({}) must not be slower than the default speed ({})", self.catchup_speed, self.default_speed);
        }

        if self.backlog_threshold_secs <= 0.0 {
            anyhow::bail!("Backlog threshold must be positive");
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Listen address: {}", self.listen);
        info!("  Model directory: {}", self.model_dir.display());
        info!("  TTS model: {}{}", self.tts_model, if self.preload { " (preloaded)" } else { "" });
        info!("  TTS voice: {}", self.tts_voice);
        info!("  TTS provider: {}", self.effective_tts_provider());
        info!("  Speed: {} (catch-up {} above {}s backlog)", self.default_speed, self.catchup_speed, self.backlog_threshold_secs);
        info!("  Concurrent synthesis: {}", self.max_concurrent_synthesis);
        info!("  Metrics file: {}", self.metrics_file.display());
    }
}

/// Get the default model directory (~/.speech-relay/models).
fn default_model_dir() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".speech-relay").join("models")
    } else {
        PathBuf::from("models")
    }
}

/// Auto-detect the best hardware acceleration provider.
fn detect_provider() -> Provider {
    #[cfg(target_os = "macos")]
    {
        Provider::CoreMl
    }

    #[cfg(target_os = "linux")]
    {
        if has_nvidia_gpu() { Provider::Cuda } else { Provider::Cpu }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Provider::Cpu
    }
}

/// Check if an NVIDIA GPU is available (Linux only).
#[cfg(target_os = "linux")]
fn has_nvidia_gpu() -> bool {
    use std::path::Path;

    const NVIDIA_PATHS: [&str; 6] = [
        "/dev/nvidia0",
        "/dev/nvidiactl",
        "/dev/nvidia-uvm",
        // Jetson devices
        "/dev/nvhost-ctrl",
        "/dev/nvhost-ctrl-gpu",
        "/etc/nv_tegra_release",
    ];

    NVIDIA_PATHS.iter().any(|path| Path::new(path).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        let mut argv = vec!["speech-relay"];
        argv.extend_from_slice(args);
        AppConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse(&[]);
        assert!(config.validate().is_ok());
        assert_eq!(config.tts_model, DEFAULT_TTS_MODEL);

        let pacing = config.pacing();
        assert_eq!(pacing.default_speed, 1.1);
        assert_eq!(pacing.catchup_speed, 1.3);
        assert_eq!(pacing.backlog_threshold, Duration::from_secs(10));
    }

    #[test]
    fn catchup_slower_than_default_is_rejected() {
        let config = parse(&["--default-speed", "1.2", "--catchup-speed", "1.0"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_values_are_rejected() {
        assert!(parse(&["--default-speed", "0"]).validate().is_err());
        assert!(parse(&["--backlog-threshold-secs", "0"]).validate().is_err());
    }

    #[test]
    fn preload_requires_model_directory() {
        let config = parse(&["--preload", "--model-dir", "/nonexistent/speech-relay-models"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn lexicon_follows_voice_language() {
        let config = parse(&["--model-dir", "/models"]);
        assert!(config.tts_lexicon(DEFAULT_TTS_MODEL, "British English").ends_with("lexicon-gb-en.txt"));
        assert!(config.tts_lexicon(DEFAULT_TTS_MODEL, "Mandarin Chinese").contains("lexicon-zh.txt"));
        assert!(config.tts_lexicon(DEFAULT_TTS_MODEL, "Spanish").is_empty());
        assert_eq!(AppConfig::tts_language("Spanish"), "es");
        assert_eq!(AppConfig::tts_language("American English"), "");
    }

    #[test]
    fn zero_workers_resolve_to_at_least_one() {
        let mut config = parse(&[]);
        config.normalize_thread_counts();
        assert!(config.max_concurrent_synthesis >= 1);
        assert!(config.tts_threads >= 1);
        assert!(config.pipeline_settings().max_concurrent_synthesis >= 1);
    }
}
