use super::{FragmentCollector, PeriodEntry};
use crate::{
    cache::FragmentCache,
    cursor::TrackCursor,
    drm::DrmCollaborator,
    event::CollectorEvent,
    fetch::Fetcher,
    manifest::{AdaptationSet, Manifest, ManifestParser, MediaType, Period, SegmentAddressing},
    selector::{select_tracks, AbrTable, PreviousVideo, Selection},
    sink::MediaSink,
    walker::{skip_to_end, skip_to_offset, LiveEdge, SkipBias, WalkContext},
    IoriError, IoriResult,
};

/// Speeds offered when the period carries an iframe track.
const TRICK_PLAY_SPEEDS: [f64; 9] = [-64., -32., -16., -4., 1., 4., 16., 32., 64.];

pub(super) fn is_video_like(media_type: MediaType) -> bool {
    matches!(media_type, MediaType::Video | MediaType::Iframe)
}

/// Walker view of `track` in `period_index` of `manifest`.
///
/// The last period of a live presentation only ends where `Period@duration` says so; its
/// timeline keeps growing otherwise.
pub(super) fn walk_context<'a>(
    manifest: &'a Manifest,
    period_index: usize,
    track: &'a TrackCursor,
    rate: f64,
    live: Option<LiveEdge>,
) -> Option<WalkContext<'a>> {
    let period = manifest.period(period_index)?;
    let adaptation_set = period.adaptation_sets.get(track.adaptation_set_index)?;
    let representation = adaptation_set
        .representations
        .get(track.representation_index)?;
    let addressing = SegmentAddressing::resolve(period, adaptation_set, representation)?;

    let is_last_period = period_index + 1 == manifest.periods.len();
    let period_start = manifest.period_start(period_index);
    let period_end = if live.is_some() && is_last_period {
        period.duration.map(|duration| period_start + duration)
    } else {
        manifest.period_end(period_index)
    };

    Some(WalkContext {
        addressing,
        media_type: track.media_type,
        rate,
        period_start,
        period_end,
        live,
        is_last_period,
        index: track.index.as_ref(),
    })
}

/// Point the descriptor of `track` at its current representation.
pub(super) fn update_descriptor(
    track: &mut TrackCursor,
    manifest: &Manifest,
    period_index: usize,
    ignore_slash: bool,
) {
    let Some(period) = manifest.period(period_index) else {
        return;
    };
    let Some(adaptation_set) = period.adaptation_sets.get(track.adaptation_set_index) else {
        return;
    };
    let Some(representation) = adaptation_set
        .representations
        .get(track.representation_index)
    else {
        return;
    };

    let descriptor = &mut track.descriptor;
    descriptor.manifest_url = manifest.url.clone();
    descriptor.set_base_urls(
        manifest.base_url_chain(period, adaptation_set, representation),
        ignore_slash,
    );
    descriptor.representation_id = representation.id.clone();
    descriptor.bandwidth = representation.bandwidth;
}

fn languages(period: &Period, media_type: MediaType) -> Vec<String> {
    let mut languages: Vec<String> = Vec::new();
    for set in period
        .adaptation_sets
        .iter()
        .filter(|set| set.is_content_type(media_type))
    {
        if let Some(lang) = &set.lang {
            if !languages.contains(lang) {
                languages.push(lang.clone());
            }
        }
    }
    languages
}

impl<F, P, C, D, S> FragmentCollector<F, P, C, D, S>
where
    F: Fetcher,
    P: ManifestParser + Send + Sync + 'static,
    C: FragmentCache,
    D: DrmCollaborator,
    S: MediaSink,
{
    /// Select the tracks of the current period and place them at `offset` seconds into it.
    ///
    /// An infinite offset places the tracks on the last fragment of the period.
    pub(crate) async fn enter_period(&mut self, offset: f64, entry: PeriodEntry) -> IoriResult<()> {
        let manifest = self
            .active_manifest()
            .ok_or_else(|| IoriError::ManifestContent("no manifest loaded".to_string()))?;
        let period = manifest.period(self.period_index).ok_or_else(|| {
            IoriError::ManifestContent(format!("period {} does not exist", self.period_index))
        })?;

        let selection = select_tracks(period, self.rate, &self.config, None);
        if selection.is_empty() {
            return Err(IoriError::ManifestContent(format!(
                "no playable track in period {}",
                period.id
            )));
        }
        self.report_tracks(period, &selection);

        if entry != PeriodEntry::Tune {
            self.check_discontinuity(&manifest, &selection, entry == PeriodEntry::Ad)
                .await;
        }
        self.expected_video_time = None;
        self.trick_residual = 0.;
        self.audio_codec = selection
            .track(MediaType::Audio)
            .and_then(|track| track.audio_codec);
        self.adaptation_set_count = period.adaptation_sets.len();

        self.update_track_info(&manifest, &selection, true)?;
        self.seek_within_period(&manifest, offset);

        self.period_id = Some(period.id.clone());
        if self.playing_ad.is_none() {
            self.base_period_id = period.id.clone();
            self.base_period_offset = if offset.is_finite() {
                offset
            } else {
                manifest
                    .period_duration(self.period_index)
                    .unwrap_or_default()
            };
        }
        tracing::info!(
            period_id = %period.id,
            period_index = self.period_index,
            offset,
            ?entry,
            tracks = self.tracks.len(),
            "Entered period"
        );
        Ok(())
    }

    fn report_tracks(&mut self, period: &Period, selection: &Selection) {
        let languages = (
            languages(period, MediaType::Audio),
            languages(period, MediaType::Subtitle),
        );
        if self.reported_languages.as_ref() != Some(&languages) {
            self.emit(CollectorEvent::TracksChanged {
                audio_languages: languages.0.clone(),
                text_languages: languages.1.clone(),
            });
            self.reported_languages = Some(languages);
        }

        let speeds = if selection.iframe_available {
            TRICK_PLAY_SPEEDS.to_vec()
        } else {
            vec![1.]
        };
        if self.reported_speeds.as_ref() != Some(&speeds) {
            self.emit(CollectorEvent::SupportedSpeedsChanged {
                speeds: speeds.clone(),
            });
            self.reported_speeds = Some(speeds);
        }
    }

    /// Signal a discontinuity when the new period does not continue the timestamps or the audio
    /// codec of the previous one. Switches between ads and base content always do.
    async fn check_discontinuity(&mut self, manifest: &Manifest, selection: &Selection, forced: bool) {
        let Some(period) = manifest.period(self.period_index) else {
            return;
        };
        let first_segment = period.first_segment_start_time();
        let timing_changed = matches!(
            (self.expected_video_time, first_segment),
            (Some(expected), Some(first)) if expected != first
        );
        let codec = selection
            .track(MediaType::Audio)
            .and_then(|track| track.audio_codec);
        let codec_changed = self.audio_codec.is_some() && codec.is_some() && codec != self.audio_codec;
        if !(forced || timing_changed || codec_changed) {
            return;
        }

        tracing::info!(
            period_id = %period.id,
            expected = ?self.expected_video_time,
            first_segment = ?first_segment,
            from_codec = ?self.audio_codec,
            to_codec = ?codec,
            forced,
            "Discontinuity at period boundary"
        );
        for track in self.tracks.iter().filter(|track| track.enabled) {
            self.sink.signal_discontinuity(track.media_type).await;
            self.emit(CollectorEvent::Discontinuity {
                media_type: track.media_type,
            });
        }
        self.first_pts = match first_segment {
            Some(first) => first as f64 / period.timescale().max(1) as f64,
            None => manifest.period_start(self.period_index),
        };
    }

    /// Rebuild the cursors for `selection`.
    ///
    /// Cursors whose adaptation set survives keep their position unless `reset_timeline` is
    /// set; tracks missing from the selection are dropped.
    pub(super) fn update_track_info(
        &mut self,
        manifest: &Manifest,
        selection: &Selection,
        reset_timeline: bool,
    ) -> IoriResult<()> {
        let period = manifest.period(self.period_index).ok_or_else(|| {
            IoriError::ManifestContent(format!("period {} does not exist", self.period_index))
        })?;

        let mut tracks = Vec::with_capacity(selection.tracks.len());
        for selected in &selection.tracks {
            let Some(adaptation_set) = period.adaptation_sets.get(selected.adaptation_set_index)
            else {
                continue;
            };
            let mut track = match self
                .tracks
                .iter()
                .position(|t| t.media_type == selected.media_type)
            {
                Some(index) => self.tracks.swap_remove(index),
                None => TrackCursor::new(selected.media_type, manifest.url.clone()),
            };

            let representation_index = if is_video_like(selected.media_type) {
                let abr = AbrTable::build(
                    adaptation_set,
                    selected.media_type == MediaType::Iframe,
                    &self.config,
                );
                let profile = selected
                    .representation_index
                    .and_then(|index| abr.index_of_representation(index))
                    .unwrap_or_else(|| abr.desired_profile());
                let representation_index = abr.representation_index(profile).unwrap_or_default();
                tracing::debug!(
                    media_type = %selected.media_type,
                    profiles = abr.len(),
                    profile,
                    bandwidth = ?abr.profile(profile).map(|p| p.bandwidth),
                    "ABR table rebuilt"
                );
                self.profile = profile;
                self.abr = Some(abr);
                self.fragments_since_abr = 0;
                if selected.media_type == MediaType::Video {
                    self.previous_video = Some(PreviousVideo {
                        representation_index,
                        representation_count: adaptation_set.representations.len(),
                    });
                }
                representation_index
            } else {
                selected
                    .representation_index
                    .unwrap_or(adaptation_set.representations.len() / 2)
            };

            let same_set = track.enabled
                && match (&track.adaptation_set_id, &adaptation_set.id) {
                    (Some(old), Some(new)) => old == new,
                    _ => track.adaptation_set_index == selected.adaptation_set_index,
                };
            track.enabled = true;
            track.adaptation_set_index = selected.adaptation_set_index;
            track.adaptation_set_id = adaptation_set.id.clone();
            if reset_timeline || !same_set {
                track.reset();
                track.representation_index = representation_index;
                track.profile_changed = true;
            } else {
                track.change_representation(representation_index);
            }
            update_descriptor(
                &mut track,
                manifest,
                self.period_index,
                self.config.ignore_base_url_if_slash,
            );
            self.acquire_drm(track.media_type, adaptation_set, track.representation_index);
            tracks.push(track);
        }

        for dropped in &self.tracks {
            tracing::debug!(media_type = %dropped.media_type, "track disabled");
            self.drm_helpers.remove(&dropped.media_type);
        }
        self.tracks = tracks;
        Ok(())
    }

    fn acquire_drm(
        &mut self,
        media_type: MediaType,
        adaptation_set: &AdaptationSet,
        representation_index: usize,
    ) {
        if let Some(helper) =
            self.drm_sessions
                .acquire(&self.drm, media_type, adaptation_set, representation_index)
        {
            self.drm_helpers.insert(media_type, helper);
        }
    }

    /// Move every cursor `offset` seconds into the period. Video goes first so audio can align
    /// to the fragment video landed on.
    fn seek_within_period(&mut self, manifest: &Manifest, offset: f64) {
        let live = self.live_edge(manifest);
        let mut bias = SkipBias::default();

        for index in 0..self.tracks.len() {
            let state = {
                let track = &self.tracks[index];
                let Some(ctx) = walk_context(manifest, self.period_index, track, self.rate, live)
                else {
                    tracing::warn!(media_type = %track.media_type, "track can not be addressed");
                    continue;
                };
                let to_end = offset.is_infinite()
                    || (ctx.is_reverse()
                        && ctx.period_duration().is_some_and(|duration| offset >= duration));

                if to_end {
                    skip_to_end(&track.state, &ctx)
                } else if live.is_some()
                    && matches!(ctx.addressing, SegmentAddressing::Number { .. })
                {
                    // located against the live point by the walker
                    track.state.clone()
                } else {
                    let skipped = skip_to_offset(&track.state, &ctx, offset, bias);
                    if is_video_like(track.media_type) {
                        bias.video_first_pts = skipped.first_pts;
                        bias.video_list_start = match ctx.addressing {
                            SegmentAddressing::List { list, .. } if list.is_custom() => {
                                list.segment_urls.first().and_then(|entry| entry.start)
                            }
                            _ => None,
                        };
                        if let Some(pts) = skipped.first_pts {
                            self.first_pts = pts;
                        }
                    }
                    skipped.state
                }
            };
            self.tracks[index].commit(state);
        }
    }

    /// Switch the track at `track_index` to `profile` of the ABR table, keeping its position.
    pub(super) fn switch_profile(&mut self, manifest: &Manifest, track_index: usize, profile: usize) {
        let Some(target) = self
            .abr
            .as_ref()
            .and_then(|abr| abr.profile(profile))
            .cloned()
        else {
            return;
        };
        let Some(track) = self.tracks.get_mut(track_index) else {
            return;
        };
        let from = self.profile;
        self.profile = profile;
        if track.representation_index == target.representation_index {
            return;
        }

        track.change_representation(target.representation_index);
        update_descriptor(
            track,
            manifest,
            self.period_index,
            self.config.ignore_base_url_if_slash,
        );
        let media_type = track.media_type;
        let adaptation_set_index = track.adaptation_set_index;
        tracing::info!(
            %media_type,
            from,
            to = profile,
            bandwidth = target.bandwidth,
            "Profile changed"
        );

        if let Some(adaptation_set) = manifest.adaptation_set(self.period_index, adaptation_set_index)
        {
            if media_type == MediaType::Video {
                self.previous_video = Some(PreviousVideo {
                    representation_index: target.representation_index,
                    representation_count: adaptation_set.representations.len(),
                });
            }
            self.acquire_drm(media_type, adaptation_set, target.representation_index);
        }
        self.emit(CollectorEvent::ProfileChanged {
            bandwidth: target.bandwidth,
            width: target.width,
            height: target.height,
        });
    }

    /// Find the active period in a refreshed manifest and move the cursors onto it.
    pub(super) async fn follow_refreshed_period(&mut self, manifest: &Manifest) -> IoriResult<()> {
        let Some(period_id) = self.period_id.clone() else {
            return Ok(());
        };

        let Some(index) = manifest.period_index_by_id(&period_id) else {
            let index = self.period_index.min(manifest.periods.len().saturating_sub(1));
            tracing::warn!(
                %period_id,
                period_index = index,
                "Active period left the manifest"
            );
            self.period_index = index;
            return self.enter_period(0., PeriodEntry::Transition).await;
        };
        self.period_index = index;
        let Some(period) = manifest.period(index) else {
            return Ok(());
        };

        let reshuffled = period.adaptation_sets.len() != self.adaptation_set_count
            || self.tracks.iter().any(|track| {
                period
                    .adaptation_sets
                    .get(track.adaptation_set_index)
                    .is_none_or(|set| set.id != track.adaptation_set_id)
            });
        if reshuffled {
            tracing::info!(
                %period_id,
                from = self.adaptation_set_count,
                to = period.adaptation_sets.len(),
                "Adaptation sets changed, selecting tracks again"
            );
            self.adaptation_set_count = period.adaptation_sets.len();
            let selection = select_tracks(period, self.rate, &self.config, self.previous_video);
            if selection.is_empty() {
                return Err(IoriError::ManifestContent(format!(
                    "no playable track in period {period_id}"
                )));
            }
            self.report_tracks(period, &selection);
            self.update_track_info(manifest, &selection, false)?;
        } else {
            let ignore_slash = self.config.ignore_base_url_if_slash;
            for track in &mut self.tracks {
                update_descriptor(track, manifest, index, ignore_slash);
            }
        }

        // explicit timelines may have grown or slid, resume them from the high-water mark
        let live = self.live_edge(manifest);
        let relocate: Vec<bool> = self
            .tracks
            .iter()
            .map(|track| {
                walk_context(manifest, index, track, self.rate, live).is_some_and(|ctx| {
                    matches!(
                        ctx.addressing,
                        SegmentAddressing::Timeline { .. } | SegmentAddressing::List { .. }
                    )
                })
            })
            .collect();
        for (track, relocate) in self.tracks.iter_mut().zip(relocate) {
            if relocate {
                track.state.relocate();
            }
        }
        Ok(())
    }
}
