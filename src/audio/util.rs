//! Output device helpers.

use anyhow::Result;
use cpal::traits::DeviceTrait;
use cpal::{Device, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};

/// Human-readable device name, or "Unknown".
pub fn get_device_name(device: &Device) -> String {
    device.description().map(|desc| desc.name().to_string()).unwrap_or_else(|_| "Unknown".to_string())
}

/// Pick an F32 mono or stereo output configuration at `target_sample_rate`.
///
/// When no range covers the target, the first usable range is clamped to the nearest
/// rate it supports. Playback duplicates mono samples across channels, so stereo is fine.
pub fn find_best_config(configs: impl Iterator<Item = SupportedStreamConfigRange>, target_sample_rate: u32) -> Result<SupportedStreamConfig> {
    let usable: Vec<SupportedStreamConfigRange> = configs.filter(|c| c.channels() <= 2 && c.sample_format() == SampleFormat::F32).collect();

    if let Some(range) = usable.iter().find(|c| (c.min_sample_rate()..=c.max_sample_rate()).contains(&target_sample_rate)) {
        return Ok(range.with_sample_rate(target_sample_rate));
    }

    let Some(range) = usable.first() else {
        anyhow::bail!("No F32 mono or stereo output configuration available");
    };
    let rate = target_sample_rate.clamp(range.min_sample_rate(), range.max_sample_rate());
    Ok(range.with_sample_rate(rate))
}
