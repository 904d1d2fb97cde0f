use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::IoriResult;

/// Tunables of the fragment collector.
///
/// All durations are expressed in milliseconds in the serialized form so that a
/// `config.toml` stays readable:
///
/// ```toml
/// preferred_languages = ["en", "de"]
/// live_offset_ms = 15000
/// max_refresh_interval_ms = 6000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashConfig {
    /// Audio languages in order of preference. The first language found in a period wins.
    pub preferred_languages: Vec<String>,
    /// Subtitle languages in order of preference. No text track is selected when empty.
    pub preferred_text_languages: Vec<String>,
    /// Language of the auxiliary audio track. No auxiliary audio is selected when absent.
    pub aux_audio_language: Option<String>,

    /// Avoid Dolby Atmos audio.
    pub disable_atmos: bool,
    /// Avoid both Dolby Digital Plus and Atmos audio, forcing AAC.
    pub disable_ec3: bool,

    /// Largest `(width, height)` the display can render.
    pub max_resolution: Option<(u64, u64)>,
    pub min_bitrate: Option<u64>,
    pub max_bitrate: Option<u64>,
    /// Bitrate assumed for 4K representations which do not declare one.
    pub default_4k_bitrate: u64,
    /// Bitrate the ABR starts from.
    pub initial_bitrate: u64,
    /// Run the ABR check every N video fragments.
    pub abr_check_interval: u32,

    /// Distance from the live edge playback starts at.
    pub live_offset_ms: u64,
    /// Refresh interval used when the manifest does not declare `minimumUpdatePeriod`.
    pub default_update_interval_ms: u64,
    pub min_refresh_interval_ms: u64,
    pub max_refresh_interval_ms: u64,
    /// Timeout of a single manifest download.
    pub manifest_timeout_ms: u64,

    /// Consecutive fragment failures tolerated before the tune fails.
    pub max_segment_fail_count: u32,
    /// Maximum number of consecutive profile rampdowns. Unlimited when absent.
    pub rampdown_limit: Option<u32>,

    /// Frame rate iframe tracks are played back at during trick-play.
    pub trick_play_fps: u32,
    /// Treat a `BaseURL` of "/" as absent.
    pub ignore_base_url_if_slash: bool,
    /// Upper bound of fragments fetched concurrently in one scheduling tick.
    pub max_parallel_fetches: usize,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            preferred_languages: vec!["en".to_string()],
            preferred_text_languages: Vec::new(),
            aux_audio_language: None,
            disable_atmos: false,
            disable_ec3: false,
            max_resolution: None,
            min_bitrate: None,
            max_bitrate: None,
            default_4k_bitrate: 13_000_000,
            initial_bitrate: 2_500_000,
            abr_check_interval: 5,
            live_offset_ms: 15_000,
            default_update_interval_ms: 3_000,
            min_refresh_interval_ms: 500,
            max_refresh_interval_ms: 6_000,
            manifest_timeout_ms: 10_000,
            max_segment_fail_count: 10,
            rampdown_limit: None,
            trick_play_fps: 4,
            ignore_base_url_if_slash: false,
            max_parallel_fetches: 4,
        }
    }
}

impl DashConfig {
    pub fn from_toml_str(data: &str) -> IoriResult<Self> {
        Ok(toml::from_str(data)?)
    }

    pub fn load(path: impl AsRef<Path>) -> IoriResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_toml_str(&data)
    }

    pub fn live_offset(&self) -> f64 {
        self.live_offset_ms as f64 / 1000.
    }

    pub fn default_update_interval(&self) -> Duration {
        Duration::from_millis(self.default_update_interval_ms)
    }

    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.min_refresh_interval_ms)
    }

    pub fn max_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.max_refresh_interval_ms)
    }

    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_millis(self.manifest_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config = DashConfig::from_toml_str(
            r#"
            preferred_languages = ["de", "fr"]
            disable_ec3 = true
            max_resolution = [1920, 1080]
            live_offset_ms = 8000
            "#,
        )
        .unwrap();

        assert_eq!(config.preferred_languages, vec!["de", "fr"]);
        assert!(config.disable_ec3);
        assert_eq!(config.max_resolution, Some((1920, 1080)));
        assert_eq!(config.live_offset(), 8.);
        // untouched fields keep their defaults
        assert_eq!(config.max_refresh_interval(), Duration::from_millis(6000));
        assert_eq!(config.max_segment_fail_count, 10);
    }

    #[test]
    fn test_invalid_config() {
        assert!(DashConfig::from_toml_str("live_offset_ms = \"soon\"").is_err());
    }
}
