use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::Semaphore;
use url::Url;

use super::{track::is_video_like, track::walk_context, FragmentCollector};
use crate::{
    cache::{CacheKind, FragmentCache},
    cdai::AdEvent,
    cursor::CursorState,
    drm::DrmCollaborator,
    fetch::{FetchResponse, Fetcher},
    manifest::{Manifest, ManifestParser, MediaType, SegmentAddressing},
    sidx::SegmentIndex,
    sink::MediaSink,
    util::range::ByteRange,
    walker::{self, skip_to_offset, SkipBias, Step},
    IoriError, IoriResult,
};

/// How often a full sink is polled.
const SINK_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How often placement is checked while an ad break waits for base content.
const AD_CATCHUP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Result of one scheduling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Fragments were fetched.
    Progress,
    /// Nothing can be fetched before this delay passed.
    Wait(Duration),
    /// Every track reached the end of the period.
    PeriodEnded,
    /// Every track passed the end position.
    EndReached,
    Stopped,
}

#[derive(Debug, Clone)]
struct Request {
    url: Url,
    range: Option<ByteRange>,
}

impl Request {
    /// Byte ranges of one file are cached separately.
    fn cache_key(url: &Url, range: Option<ByteRange>) -> Url {
        let mut key = url.clone();
        if let Some(range) = range {
            key.set_fragment(Some(&range.to_http_range()));
        }
        key
    }
}

#[derive(Debug)]
struct IndexPlan {
    track: usize,
    media_type: MediaType,
    request: Request,
}

#[derive(Debug)]
struct FragmentPlan {
    track: usize,
    media_type: MediaType,
    init: Option<Request>,
    media: Request,
    next: CursorState,
    /// Start relative to the period start, in seconds.
    start: f64,
    duration: f64,
    time: u64,
    timescale: u64,
}

#[derive(Debug)]
enum Plan {
    Index(IndexPlan),
    Fragment(FragmentPlan),
}

enum Planned {
    Fetch(Plan),
    Wait(Duration),
    Idle,
}

struct FragmentBytes {
    init: Option<Bytes>,
    media: FetchResponse,
}

enum Completed {
    Index(IndexPlan, IoriResult<Bytes>),
    Fragment(FragmentPlan, IoriResult<FragmentBytes>),
}

/// Video rampdown is worth a try for these statuses and for timeouts.
fn is_rampdown_error(error: &IoriError) -> bool {
    match error {
        IoriError::FragmentDownload { status, .. } => matches!(status, 404 | 500 | 502 | 503),
        IoriError::NetworkTransient(_) => true,
        _ => false,
    }
}

impl<F, P, C, D, S> FragmentCollector<F, P, C, D, S>
where
    F: Fetcher,
    P: ManifestParser + Send + Sync + 'static,
    C: FragmentCache,
    D: DrmCollaborator,
    S: MediaSink,
{
    /// Fetch the next fragment of every active track.
    ///
    /// Fetches run in parallel and are joined before any cursor moves, so an interrupted tick
    /// leaves every cursor on the fragment it was about to fetch.
    pub async fn tick(&mut self) -> IoriResult<TickOutcome> {
        if self.cancel.is_cancelled() {
            return Ok(TickOutcome::Stopped);
        }

        if self.ad_state.is_waiting() {
            self.evaluate_ads(AdEvent::BaseOffsetChange).await?;
            if self.ad_state.is_waiting() {
                if self.live {
                    return Ok(TickOutcome::Wait(AD_CATCHUP_POLL_INTERVAL));
                }
                // a static manifest never places any further
                tracing::warn!("Ad break can not be placed, resuming base content");
                self.resume_base_in_place().await?;
            }
        }

        let manifest = self
            .active_manifest()
            .ok_or_else(|| IoriError::ManifestContent("collector is not tuned".to_string()))?;

        let mut plans = Vec::new();
        let mut wait: Option<Duration> = None;
        for index in 0..self.tracks.len() {
            match self.plan_track(&manifest, index)? {
                Planned::Fetch(plan) => plans.push(plan),
                Planned::Wait(delay) => wait = Some(wait.map_or(delay, |w| w.min(delay))),
                Planned::Idle => {}
            }
        }

        if plans.is_empty() {
            if let Some(delay) = wait {
                return Ok(TickOutcome::Wait(delay));
            }
            return Ok(if self.end_time_reached() {
                TickOutcome::EndReached
            } else {
                TickOutcome::PeriodEnded
            });
        }

        let permits = Semaphore::new(self.config.max_parallel_fetches.max(1));
        let completed = {
            let fetches = join_all(plans.into_iter().map(|plan| self.execute(plan, &permits)));
            tokio::select! {
                _ = self.cancel.cancelled() => None,
                completed = fetches => Some(completed),
            }
        };
        let Some(completed) = completed else {
            tracing::info!("Downloads disabled during fetch, cursors left in place");
            return Ok(TickOutcome::Stopped);
        };

        let mut ad_event = None;
        for completed in completed {
            let event = match completed {
                Completed::Index(plan, result) => {
                    self.on_index(plan, result)?;
                    None
                }
                Completed::Fragment(plan, Ok(bytes)) => {
                    self.on_fragment(&manifest, plan, bytes).await?
                }
                Completed::Fragment(plan, Err(error)) => {
                    self.on_fragment_failed(&manifest, plan, error)?
                }
            };
            // ad failures and ends outrank offset updates
            if let Some(event) = event {
                if ad_event.is_none() || ad_event == Some(AdEvent::BaseOffsetChange) {
                    ad_event = Some(event);
                }
            }
        }
        if let Some(event) = ad_event {
            self.evaluate_ads(event).await?;
        }

        Ok(if self.end_time_reached() {
            TickOutcome::EndReached
        } else {
            TickOutcome::Progress
        })
    }

    fn end_time_reached(&self) -> bool {
        self.tracks.iter().any(|t| t.enabled && t.end_time_reached)
            && !self.tracks.iter().any(|t| t.is_active())
    }

    /// Turn the walker's next step for one track into something to fetch.
    fn plan_track(&mut self, manifest: &Manifest, index: usize) -> IoriResult<Planned> {
        let live = self.live_edge(manifest);
        let track = &self.tracks[index];
        if !track.is_active() {
            return Ok(Planned::Idle);
        }
        if !self.sink.buffer_available(track.media_type) {
            tracing::trace!(media_type = %track.media_type, "sink is full");
            return Ok(Planned::Wait(SINK_POLL_INTERVAL));
        }

        let Some(ctx) = walk_context(manifest, self.period_index, track, self.rate, live) else {
            tracing::warn!(
                media_type = %track.media_type,
                representation = track.representation_index,
                "representation can not be addressed, disabling track"
            );
            self.tracks[index].state.eos = true;
            return Ok(Planned::Idle);
        };

        let media_type = track.media_type;
        let timescale = ctx.addressing.timescale();
        let init = ctx
            .addressing
            .initialization()
            .map(|(pattern, range)| (pattern.unwrap_or_default().to_string(), range))
            .or_else(|| match ctx.addressing {
                // init data sits in front of the index box
                SegmentAddressing::Indexed { index_range, .. } if index_range.offset > 0 => {
                    Some((String::new(), Some(ByteRange::inclusive(0, index_range.offset - 1))))
                }
                _ => None,
            });

        let (next, media, range, number, time, start, duration, bitrate) =
            match walker::step(&track.state, &ctx) {
                Step::EndOfPeriod => {
                    tracing::debug!(%media_type, "end of period");
                    self.tracks[index].state.eos = true;
                    return Ok(Planned::Idle);
                }
                Step::NotYetAvailable { retry_after } => {
                    tracing::trace!(%media_type, ?retry_after, "fragment not yet available");
                    return Ok(Planned::Wait(retry_after));
                }
                Step::NeedIndex { range } => {
                    let url = track.descriptor.resolve("")?;
                    tracing::debug!(%media_type, %url, range = %range.to_http_range(), "loading segment index");
                    return Ok(Planned::Fetch(Plan::Index(IndexPlan {
                        track: index,
                        media_type,
                        request: Request {
                            url,
                            range: Some(range),
                        },
                    })));
                }
                Step::Fragment { next, fragment } => (
                    next,
                    fragment.media.unwrap_or_default().to_string(),
                    fragment.range,
                    fragment.number,
                    fragment.time,
                    fragment.start,
                    fragment.duration,
                    fragment.bitrate,
                ),
            };

        // custom lists name the bitrate each fragment was encoded at
        if let Some(bitrate) = bitrate.filter(|_| is_video_like(media_type)) {
            let profile = self
                .abr
                .as_ref()
                .and_then(|abr| abr.index_of_bandwidth(bitrate));
            if let Some(profile) = profile.filter(|&p| p != self.profile) {
                self.switch_profile(manifest, index, profile);
            }
        }

        let track = &mut self.tracks[index];
        track.descriptor.number = number;
        track.descriptor.time = time;
        let media = Request {
            url: track.descriptor.resolve(&media)?,
            range,
        };
        let init = match init {
            Some((pattern, range)) => {
                let url = track.descriptor.resolve(&pattern)?;
                (track.last_init_url.as_ref() != Some(&url)).then_some(Request { url, range })
            }
            None => None,
        };

        tracing::trace!(
            %media_type,
            url = %media.url,
            number,
            time,
            start,
            duration,
            init = init.is_some(),
            "planned fragment"
        );
        Ok(Planned::Fetch(Plan::Fragment(FragmentPlan {
            track: index,
            media_type,
            init,
            media,
            next,
            start,
            duration,
            time,
            timescale,
        })))
    }

    async fn fetch_cached(&self, request: &Request, kind: CacheKind) -> IoriResult<Bytes> {
        let key = Request::cache_key(&request.url, request.range);
        if let Some(entry) = self.cache.lookup(&key).await {
            return Ok(entry.body);
        }

        let response = self.fetcher.fetch(&request.url, request.range).await?;
        let effective_key = Request::cache_key(&response.effective_url, request.range);
        if let Err(e) = self
            .cache
            .store(&key, response.body.clone(), &effective_key, self.live, kind)
            .await
        {
            tracing::warn!(url = %request.url, error = %e, "failed to cache");
        }
        Ok(response.body)
    }

    async fn execute(&self, plan: Plan, permits: &Semaphore) -> Completed {
        let _permit = permits.acquire().await;
        match plan {
            Plan::Index(plan) => {
                let result = self
                    .fetch_cached(&plan.request, CacheKind::Media(plan.media_type))
                    .await;
                Completed::Index(plan, result)
            }
            Plan::Fragment(plan) => {
                let result = async {
                    let init = match &plan.init {
                        Some(request) => Some(
                            self.fetch_cached(request, CacheKind::Media(plan.media_type))
                                .await?,
                        ),
                        None => None,
                    };
                    let media = self
                        .fetcher
                        .fetch(&plan.media.url, plan.media.range)
                        .await?;
                    Ok::<_, IoriError>(FragmentBytes { init, media })
                }
                .await;
                Completed::Fragment(plan, result)
            }
        }
    }

    fn on_index(&mut self, plan: IndexPlan, result: IoriResult<Bytes>) -> IoriResult<()> {
        let parsed = result.and_then(|body| SegmentIndex::parse(&body));
        let max_fail_count = self.config.max_segment_fail_count;
        let track = &mut self.tracks[plan.track];
        match parsed {
            Ok(index) => {
                tracing::debug!(
                    media_type = %plan.media_type,
                    references = index.len(),
                    "segment index loaded"
                );
                track.index = Some(index);
                track.fail_count = 0;
                Ok(())
            }
            Err(e) => {
                track.fail_count += 1;
                tracing::warn!(
                    media_type = %plan.media_type,
                    url = %plan.request.url,
                    fail_count = track.fail_count,
                    error = %e,
                    "segment index download failed"
                );
                if track.fail_count > max_fail_count {
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    async fn on_fragment(
        &mut self,
        manifest: &Manifest,
        plan: FragmentPlan,
        bytes: FragmentBytes,
    ) -> IoriResult<Option<AdEvent>> {
        let position = manifest.period_offset(self.period_index) + plan.start;
        if let Some(init) = bytes.init {
            self.sink.push(plan.media_type, init, position, 0.).await?;
            self.tracks[plan.track].last_init_url = plan.init.as_ref().map(|r| r.url.clone());
        }
        let throughput = bytes.media.throughput();
        self.sink
            .push(plan.media_type, bytes.media.body, position, plan.duration)
            .await?;
        tracing::debug!(
            media_type = %plan.media_type,
            url = %plan.media.url,
            position,
            duration = plan.duration,
            throughput = ?throughput,
            "fragment delivered"
        );

        let eos = plan.next.eos;
        let end_position = self.end_position.filter(|_| !self.is_reverse());
        let track = &mut self.tracks[plan.track];
        track.commit(plan.next.clone());
        track.fail_count = 0;
        track.rampdown_count = 0;
        track.profile_changed = false;
        if end_position.is_some_and(|end| position + plan.duration >= end) {
            tracing::info!(media_type = %plan.media_type, position, "end position reached");
            track.end_time_reached = true;
        }

        if is_video_like(plan.media_type) {
            self.after_video_fragment(manifest, &plan, throughput, eos);
        }
        if plan.track == 0 {
            return Ok(self
                .advance_ad_position(manifest, plan.start, plan.duration)
                .await);
        }
        Ok(None)
    }

    fn after_video_fragment(
        &mut self,
        manifest: &Manifest,
        plan: &FragmentPlan,
        throughput: Option<u64>,
        eos: bool,
    ) {
        if throughput.is_some() {
            self.last_throughput = throughput;
        }
        self.expected_video_time = (!self.is_reverse())
            .then(|| plan.time + (plan.duration * plan.timescale as f64).round() as u64);

        if self.rate == 1. {
            self.fragments_since_abr += 1;
            if self.fragments_since_abr < self.config.abr_check_interval.max(1) {
                return;
            }
            self.fragments_since_abr = 0;
            let desired = match (&self.abr, self.last_throughput) {
                (Some(abr), Some(throughput)) => abr.profile_for_bandwidth(throughput),
                _ => return,
            };
            if desired != self.profile {
                tracing::debug!(
                    throughput = ?self.last_throughput,
                    from = self.profile,
                    to = desired,
                    "ABR profile switch"
                );
                self.switch_profile(manifest, plan.track, desired);
            }
        } else if !eos {
            self.pace_trick_play(manifest, plan.track);
        }
    }

    /// Skip the content between two iframes so playback advances `rate` seconds per second at
    /// the configured iframe rate.
    fn pace_trick_play(&mut self, manifest: &Manifest, track_index: usize) {
        let skip = trick_play_skip(self.trick_residual, self.rate, self.config.trick_play_fps);
        let live = self.live_edge(manifest);
        let skipped = {
            let track = &self.tracks[track_index];
            let Some(ctx) = walk_context(manifest, self.period_index, track, self.rate, live)
            else {
                return;
            };
            skip_to_offset(&track.state, &ctx, skip, SkipBias::default())
        };
        tracing::trace!(
            rate = self.rate,
            skip,
            residual = skipped.residual,
            "trick play pacing"
        );
        self.trick_residual = skipped.residual;
        self.tracks[track_index].commit(skipped.state);
    }

    fn on_fragment_failed(
        &mut self,
        manifest: &Manifest,
        plan: FragmentPlan,
        error: IoriError,
    ) -> IoriResult<Option<AdEvent>> {
        let reverse = self.is_reverse();
        let max_fail_count = self.config.max_segment_fail_count;
        let rampdown_limit = self.config.rampdown_limit;
        let lower = self.abr.as_ref().and_then(|abr| abr.lower_profile(self.profile));
        let in_ad = self.playing_ad.is_some();

        let track = &mut self.tracks[plan.track];
        track.fail_count += 1;
        tracing::warn!(
            media_type = %plan.media_type,
            url = %plan.media.url,
            fail_count = track.fail_count,
            error = %error,
            "fragment download failed"
        );

        if track.fail_count > max_fail_count {
            if in_ad {
                tracing::error!("Ad fragments keep failing, abandoning the ad");
                return Ok(Some(AdEvent::AdFailed));
            }
            return Err(match error {
                e @ IoriError::FragmentDownload { .. } => e,
                _ => IoriError::FragmentDownload {
                    url: plan.media.url.to_string(),
                    status: 0,
                },
            });
        }

        let rampdown = is_video_like(plan.media_type)
            && is_rampdown_error(&error)
            && rampdown_limit.is_none_or(|limit| track.rampdown_count < limit);
        match lower.filter(|_| rampdown) {
            Some(lower) => {
                // forward retries the same position, reverse moves on
                if reverse {
                    track.commit(plan.next);
                }
                track.rampdown_count += 1;
                tracing::info!(
                    rampdown_count = track.rampdown_count,
                    number = track.descriptor.number,
                    "Rampdown"
                );
                self.switch_profile(manifest, plan.track, lower);
            }
            None => track.commit(plan.next),
        }
        Ok(None)
    }
}

/// Seconds to skip before the next iframe.
///
/// The residual left by the previous skip is used up first. Once it is exhausted, or points
/// against the play direction, a fresh `rate / fps` seconds is due.
fn trick_play_skip(residual: f64, rate: f64, fps: u32) -> f64 {
    if (rate > 0. && residual <= 0.) || (rate < 0. && residual >= 0.) {
        rate / fps.max(1) as f64
    } else {
        residual
    }
}
