//! Per-period track selection.
//!
//! Selection is a pure function of the period, the play rate, the preferences and the slot
//! carried over from the previous selection, so running it twice on the same snapshot yields
//! the same tracks.
mod abr;

pub use abr::{AbrProfile, AbrTable};

use serde::Serialize;

use crate::{
    config::DashConfig,
    manifest::{AdaptationSet, AudioCodec, MediaType, Period},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSelection {
    pub media_type: MediaType,
    pub adaptation_set_index: usize,
    /// `None` leaves the choice to the ABR table.
    pub representation_index: Option<usize>,
    pub language: Option<String>,
    pub audio_codec: Option<AudioCodec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Selection {
    pub tracks: Vec<TrackSelection>,
    /// The period offers an iframe-only adaptation set.
    pub iframe_available: bool,
    /// None of the preferred audio languages exist, another one was picked.
    pub audio_language_fallback: bool,
}

impl Selection {
    pub fn track(&self, media_type: MediaType) -> Option<&TrackSelection> {
        self.tracks.iter().find(|t| t.media_type == media_type)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn is_audio_only(&self) -> bool {
        self.track(MediaType::Audio).is_some()
            && self.track(MediaType::Video).is_none()
            && self.track(MediaType::Iframe).is_none()
    }
}

/// Video slot of the previous selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviousVideo {
    pub representation_index: usize,
    pub representation_count: usize,
}

/// Choose the tracks of `period` for playback at `rate`.
///
/// At normal rate one video, one audio and optionally one subtitle and one auxiliary audio
/// track are selected. Any other rate selects the iframe track alone.
pub fn select_tracks(
    period: &Period,
    rate: f64,
    config: &DashConfig,
    previous: Option<PreviousVideo>,
) -> Selection {
    let iframe = period
        .adaptation_sets
        .iter()
        .position(|set| set.is_content_type(MediaType::Video) && set.is_iframe_track());
    let mut selection = Selection {
        iframe_available: iframe.is_some(),
        ..Default::default()
    };

    if rate != 1. {
        if let Some(index) = iframe {
            tracing::info!(adaptation_set = index, "selected trick mode track");
            selection.tracks.push(TrackSelection {
                media_type: MediaType::Iframe,
                adaptation_set_index: index,
                representation_index: None,
                language: None,
                audio_codec: None,
            });
        } else {
            tracing::warn!(period_id = %period.id, rate, "no iframe track for trick play");
        }
        return selection;
    }

    if let Some(video) = select_video(period, previous) {
        selection.tracks.push(video);
    }

    let audio = select_audio(period, &config.preferred_languages, config, None);
    if let Some((track, fallback)) = &audio {
        selection.audio_language_fallback = *fallback;
        if *fallback {
            tracing::info!(
                preferred = ?config.preferred_languages,
                selected = ?track.language,
                "preferred audio language not available"
            );
        }
        selection.tracks.push(track.clone());
    }

    if let Some(subtitle) = select_subtitle(period, &config.preferred_text_languages) {
        selection.tracks.push(subtitle);
    }

    if let Some(language) = &config.aux_audio_language {
        let main = audio.as_ref().map(|(track, _)| track.adaptation_set_index);
        let aux = select_audio(period, std::slice::from_ref(language), config, main)
            .filter(|(_, fallback)| !fallback);
        if let Some((mut track, _)) = aux {
            track.media_type = MediaType::AuxAudio;
            selection.tracks.push(track);
        }
    }

    for track in &selection.tracks {
        tracing::debug!(
            media_type = %track.media_type,
            adaptation_set = track.adaptation_set_index,
            representation = ?track.representation_index,
            "selected track"
        );
    }
    selection
}

fn select_video(period: &Period, previous: Option<PreviousVideo>) -> Option<TrackSelection> {
    let (index, set) = period
        .adaptation_sets
        .iter()
        .enumerate()
        .find(|(_, set)| set.is_content_type(MediaType::Video) && !set.is_iframe_track())?;

    let representation_index = previous
        .filter(|previous| previous.representation_count == set.representations.len())
        .map(|previous| previous.representation_index);
    Some(TrackSelection {
        media_type: MediaType::Video,
        adaptation_set_index: index,
        representation_index,
        language: None,
        audio_codec: None,
    })
}

/// Rank of `set`'s language in `preferred`, `usize::MAX` when not listed.
fn language_rank(set: &AdaptationSet, preferred: &[String]) -> usize {
    set.lang
        .as_deref()
        .and_then(|lang| preferred.iter().position(|p| p == lang))
        .unwrap_or(usize::MAX)
}

/// Best audio set by language rank, then codec priority. The flag reports that no preferred
/// language matched.
fn select_audio(
    period: &Period,
    preferred: &[String],
    config: &DashConfig,
    exclude: Option<usize>,
) -> Option<(TrackSelection, bool)> {
    let mut best: Option<(usize, TrackSelection)> = None;
    let mut codec = AudioCodec::Unknown;

    for (index, set) in period.adaptation_sets.iter().enumerate() {
        if Some(index) == exclude || !set.is_content_type(MediaType::Audio) {
            continue;
        }
        let rank = language_rank(set, preferred);
        let mut candidate = match &best {
            Some((best_rank, _)) if rank > *best_rank => continue,
            Some((best_rank, _)) if rank == *best_rank => codec,
            _ => AudioCodec::Unknown,
        };

        if let Some(representation) =
            set.desired_codec_index(&mut candidate, config.disable_atmos, config.disable_ec3)
        {
            codec = candidate;
            best = Some((
                rank,
                TrackSelection {
                    media_type: MediaType::Audio,
                    adaptation_set_index: index,
                    representation_index: Some(representation),
                    language: set.lang.clone(),
                    audio_codec: Some(codec),
                },
            ));
        }
    }

    best.map(|(rank, track)| (track, rank == usize::MAX))
}

fn select_subtitle(period: &Period, preferred: &[String]) -> Option<TrackSelection> {
    if preferred.is_empty() {
        return None;
    }
    period
        .adaptation_sets
        .iter()
        .enumerate()
        .filter(|(_, set)| set.is_content_type(MediaType::Subtitle))
        .map(|(index, set)| (language_rank(set, preferred), index, set))
        .filter(|(rank, _, _)| *rank != usize::MAX)
        .min_by_key(|(rank, index, _)| (*rank, *index))
        .map(|(_, index, set)| TrackSelection {
            media_type: MediaType::Subtitle,
            adaptation_set_index: index,
            representation_index: Some(set.representations.len() / 2),
            language: set.lang.clone(),
            audio_codec: None,
        })
}
