//! Configuration module for the speech relay.
//!
//! Provides CLI argument parsing and the voice allow-list.

#[allow(clippy::module_inception)]
mod config;
mod voices;

pub use config::AppConfig;
pub use voices::{VoiceProfile, VoiceSelector};
