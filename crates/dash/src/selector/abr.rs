use serde::Serialize;

use crate::{config::DashConfig, manifest::AdaptationSet};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbrProfile {
    /// Position of the representation inside its adaptation set.
    pub representation_index: usize,
    pub bandwidth: u64,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub frame_rate: Option<String>,
    pub is_iframe: bool,
}

/// Video profiles of the selected adaptation set, ordered by ascending bandwidth.
///
/// Profile indices used throughout the collector refer to positions in this table, so a
/// rampdown is always `index - 1`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AbrTable {
    profiles: Vec<AbrProfile>,
    default_bitrate: u64,
}

impl AbrTable {
    /// Build the table, applying the display cap and the bitrate window of `config`.
    ///
    /// When the filters reject every representation the unfiltered set is kept, so a period is
    /// never left without a playable profile.
    pub fn build(adaptation_set: &AdaptationSet, is_iframe: bool, config: &DashConfig) -> Self {
        let mut default_bitrate = config.initial_bitrate;
        let all: Vec<AbrProfile> = adaptation_set
            .representations
            .iter()
            .enumerate()
            .map(|(representation_index, representation)| {
                let is_4k = representation.is_4k();
                if is_4k {
                    default_bitrate = config.default_4k_bitrate;
                }
                let bandwidth = match representation.bandwidth {
                    0 if is_4k => config.default_4k_bitrate,
                    bandwidth => bandwidth,
                };
                AbrProfile {
                    representation_index,
                    bandwidth,
                    width: representation.width,
                    height: representation.height,
                    frame_rate: representation
                        .frame_rate
                        .clone()
                        .or_else(|| adaptation_set.frame_rate.clone()),
                    is_iframe,
                }
            })
            .collect();

        let mut profiles: Vec<AbrProfile> = all
            .iter()
            .filter(|profile| Self::accepts(profile, config))
            .cloned()
            .collect();
        if profiles.is_empty() && !all.is_empty() {
            tracing::warn!(
                profiles = all.len(),
                "every profile was filtered out, ignoring resolution and bitrate limits"
            );
            profiles = all;
        }
        profiles.sort_by_key(|profile| profile.bandwidth);

        Self {
            profiles,
            default_bitrate,
        }
    }

    fn accepts(profile: &AbrProfile, config: &DashConfig) -> bool {
        if let Some((max_width, max_height)) = config.max_resolution {
            if profile.width.is_some_and(|w| w > max_width)
                || profile.height.is_some_and(|h| h > max_height)
            {
                return false;
            }
        }
        config.min_bitrate.is_none_or(|min| profile.bandwidth >= min)
            && config.max_bitrate.is_none_or(|max| profile.bandwidth <= max)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn profile(&self, index: usize) -> Option<&AbrProfile> {
        self.profiles.get(index)
    }

    pub fn profiles(&self) -> &[AbrProfile] {
        &self.profiles
    }

    pub fn default_bitrate(&self) -> u64 {
        self.default_bitrate
    }

    /// Profile playback starts with: the best one not above the default bitrate.
    pub fn desired_profile(&self) -> usize {
        self.profile_for_bandwidth(self.default_bitrate)
    }

    /// Highest profile whose bandwidth fits into `available` bits per second.
    pub fn profile_for_bandwidth(&self, available: u64) -> usize {
        self.profiles
            .iter()
            .rposition(|profile| profile.bandwidth <= available)
            .unwrap_or(0)
    }

    pub fn lower_profile(&self, index: usize) -> Option<usize> {
        index.checked_sub(1).filter(|&lower| lower < self.profiles.len())
    }

    pub fn is_lowest(&self, index: usize) -> bool {
        index == 0
    }

    pub fn index_of_representation(&self, representation_index: usize) -> Option<usize> {
        self.profiles
            .iter()
            .position(|profile| profile.representation_index == representation_index)
    }

    pub fn index_of_bandwidth(&self, bandwidth: u64) -> Option<usize> {
        self.profiles
            .iter()
            .position(|profile| profile.bandwidth == bandwidth)
    }

    pub fn representation_index(&self, index: usize) -> Option<usize> {
        self.profile(index).map(|profile| profile.representation_index)
    }
}
