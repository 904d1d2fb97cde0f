//! The fetcher loop.
//!
//! [`FragmentCollector`] owns the manifest, the track cursors and the ad state. Every scheduling
//! tick asks the walker for the next fragment of each active track, fetches the fragments in
//! parallel, and only then commits the cursors and hands the bytes to the sink. Between ticks
//! the loop refreshes live manifests and moves across period boundaries.
mod ads;
mod tick;
mod track;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use url::Url;

pub use tick::TickOutcome;

use crate::{
    cache::{CacheKind, FragmentCache},
    cdai::{AdEvent, AdState, CdaiHandle},
    clock::Clock,
    config::DashConfig,
    cursor::TrackCursor,
    culling::CullingTracker,
    drm::{DrmCollaborator, DrmHelper, DrmSessionTracker},
    error::ErrorKind,
    event::CollectorEvent,
    fetch::Fetcher,
    manifest::{AudioCodec, Manifest, ManifestParser, MediaType},
    refresh::{minimum_update_interval, refresh_delay},
    selector::{AbrTable, PreviousVideo},
    sink::MediaSink,
    walker::LiveEdge,
    IoriError, IoriResult,
};

/// How the tracks arrive in a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeriodEntry {
    /// Tune or seek.
    Tune,
    /// Playback ran into the neighbouring period.
    Transition,
    /// Switch between base content and an ad.
    Ad,
}

#[derive(Debug, Clone)]
pub(crate) struct PlayingAd {
    pub break_id: String,
    pub ad_index: usize,
    pub manifest: Arc<Manifest>,
}

/// Drives one presentation from tune to end of stream.
///
/// ```no_run
/// # async fn run() -> iori_dash::IoriResult<()> {
/// use iori_dash::{
///     DashConfig, DashMpdParser, FragmentCollector, HttpFetcher, KeySystemDrm, MemoryCache,
///     MemorySink,
/// };
///
/// let (mut collector, mut events) = FragmentCollector::new(
///     "https://example.com/manifest.mpd".parse()?,
///     DashConfig::default(),
///     HttpFetcher::default(),
///     DashMpdParser,
///     MemoryCache::default(),
///     KeySystemDrm::default(),
///     MemorySink::new(),
/// );
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         tracing::info!(?event, "collector event");
///     }
/// });
/// collector.init(0.).await?;
/// collector.run().await
/// # }
/// ```
pub struct FragmentCollector<F, P, C, D, S> {
    config: DashConfig,
    manifest_url: Url,
    fetcher: Arc<F>,
    parser: Arc<P>,
    cache: C,
    drm: D,
    drm_sessions: DrmSessionTracker,
    drm_helpers: HashMap<MediaType, DrmHelper>,
    sink: S,
    events: UnboundedSender<CollectorEvent>,
    cancel: CancellationToken,

    /// Base manifest. Ad manifests live in `playing_ad`.
    manifest: Option<Arc<Manifest>>,
    clock: Clock,
    culling: CullingTracker,
    last_refresh: Instant,
    live: bool,

    rate: f64,
    end_position: Option<f64>,

    period_index: usize,
    period_id: Option<String>,
    adaptation_set_count: usize,
    tracks: Vec<TrackCursor>,
    abr: Option<AbrTable>,
    profile: usize,
    previous_video: Option<PreviousVideo>,
    fragments_since_abr: u32,
    last_throughput: Option<u64>,
    trick_residual: f64,
    /// Start of the next video fragment in timescale units, for discontinuity checks.
    expected_video_time: Option<u64>,
    audio_codec: Option<AudioCodec>,
    first_pts: f64,
    reported_languages: Option<(Vec<String>, Vec<String>)>,
    reported_speeds: Option<Vec<f64>>,
    reported_metadata: HashSet<(String, String)>,

    cdai: CdaiHandle<F, P>,
    ad_state: AdState,
    playing_ad: Option<PlayingAd>,
    base_period_id: String,
    /// Position inside the base period in seconds, tracked while ads play too.
    base_period_offset: f64,
}

impl<F, P, C, D, S> FragmentCollector<F, P, C, D, S>
where
    F: Fetcher,
    P: ManifestParser + Send + Sync + 'static,
    C: FragmentCache,
    D: DrmCollaborator,
    S: MediaSink,
{
    pub fn new(
        manifest_url: Url,
        config: DashConfig,
        fetcher: F,
        parser: P,
        cache: C,
        drm: D,
        sink: S,
    ) -> (Self, UnboundedReceiver<CollectorEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let fetcher = Arc::new(fetcher);
        let parser = Arc::new(parser);
        let cdai = CdaiHandle::new(fetcher.clone(), parser.clone(), events.clone());

        let collector = Self {
            config,
            manifest_url,
            fetcher,
            parser,
            cache,
            drm,
            drm_sessions: DrmSessionTracker::new(),
            drm_helpers: HashMap::new(),
            sink,
            events,
            cancel: CancellationToken::new(),

            manifest: None,
            clock: Clock::new(),
            culling: CullingTracker::new(),
            last_refresh: Instant::now(),
            live: false,

            rate: 1.,
            end_position: None,

            period_index: 0,
            period_id: None,
            adaptation_set_count: 0,
            tracks: Vec::new(),
            abr: None,
            profile: 0,
            previous_video: None,
            fragments_since_abr: 0,
            last_throughput: None,
            trick_residual: 0.,
            expected_video_time: None,
            audio_codec: None,
            first_pts: 0.,
            reported_languages: None,
            reported_speeds: None,
            reported_metadata: HashSet::new(),

            cdai,
            ad_state: AdState::default(),
            playing_ad: None,
            base_period_id: String::new(),
            base_period_offset: 0.,
        };
        (collector, receiver)
    }

    /// Cancelling the token stops the loop and interrupts every wait.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Entry point for the embedder to announce ads.
    pub fn cdai(&self) -> &CdaiHandle<F, P> {
        &self.cdai
    }

    /// Play rate used by the next [`init`](Self::init).
    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Stop delivering fragments once this presentation position, in seconds, is reached.
    pub fn set_end_position(&mut self, end_position: Option<f64>) {
        self.end_position = end_position;
    }

    pub fn tracks(&self) -> &[TrackCursor] {
        &self.tracks
    }

    pub fn track(&self, media_type: MediaType) -> Option<&TrackCursor> {
        self.tracks.iter().find(|t| t.media_type == media_type)
    }

    pub fn ad_state(&self) -> &AdState {
        &self.ad_state
    }

    pub fn drm_helper(&self, media_type: MediaType) -> Option<&DrmHelper> {
        self.drm_helpers.get(&media_type)
    }

    pub fn culled_seconds(&self) -> f64 {
        self.culling.total()
    }

    pub fn manifest(&self) -> Option<&Arc<Manifest>> {
        self.manifest.as_ref()
    }

    pub fn period_index(&self) -> usize {
        self.period_index
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Current position in the ABR table.
    pub fn profile(&self) -> usize {
        self.profile
    }

    pub fn abr(&self) -> Option<&AbrTable> {
        self.abr.as_ref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Presentation time of the first video fragment after the last tune or discontinuity.
    pub fn first_pts(&self) -> f64 {
        self.first_pts
    }

    /// Manifest the tracks are currently walking: the playing ad's, or the base manifest.
    fn active_manifest(&self) -> Option<Arc<Manifest>> {
        match &self.playing_ad {
            Some(ad) => Some(ad.manifest.clone()),
            None => self.manifest.clone(),
        }
    }

    fn is_reverse(&self) -> bool {
        self.rate < 0.
    }

    fn emit(&self, event: CollectorEvent) {
        _ = self.events.send(event);
    }

    fn report_error(&self, error: &IoriError) {
        tracing::error!(kind = ?error.kind(), "{error}");
        self.emit(CollectorEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    /// Seconds since `availabilityStartTime` on the synced clock, for dynamic manifests.
    fn live_now(&self, manifest: &Manifest) -> Option<f64> {
        manifest
            .availability_start_time()
            .map(|origin| self.clock.seconds_since(origin))
    }

    fn live_edge(&self, manifest: &Manifest) -> Option<LiveEdge> {
        self.live_now(manifest).map(|now| LiveEdge {
            now,
            offset: self.config.live_offset(),
        })
    }

    async fn load_manifest(&self, use_cache: bool) -> IoriResult<Manifest> {
        if use_cache {
            if let Some(entry) = self.cache.lookup(&self.manifest_url).await {
                match self.parser.parse(&entry.body, &entry.effective_url) {
                    Ok(manifest) if !manifest.is_live() => {
                        tracing::debug!(url = %self.manifest_url, "using cached manifest");
                        return Ok(manifest);
                    }
                    Ok(_) => tracing::debug!("cached manifest is live, downloading again"),
                    Err(e) => tracing::warn!(error = %e, "cached manifest is unreadable"),
                }
            }
        }

        let timeout = self.config.manifest_timeout();
        let response = tokio::time::timeout(timeout, self.fetcher.fetch(&self.manifest_url, None))
            .await
            .map_err(|_| {
                IoriError::NetworkTransient(format!(
                    "manifest download timed out after {}ms",
                    timeout.as_millis()
                ))
            })??;
        tracing::debug!(
            url = %response.effective_url,
            bytes = response.body.len(),
            elapsed_milliseconds = response.elapsed.as_millis() as u64,
            "manifest downloaded"
        );

        let manifest = self.parser.parse(&response.body, &response.effective_url)?;
        if let Err(e) = self
            .cache
            .store(
                &self.manifest_url,
                response.body,
                &response.effective_url,
                manifest.is_live(),
                CacheKind::Manifest,
            )
            .await
        {
            tracing::warn!(error = %e, "failed to cache manifest");
        }
        Ok(manifest)
    }

    /// Tune to `seek_position` seconds. Live presentations start at the live point instead.
    ///
    /// Failures are reported as [`CollectorEvent::Error`] and returned.
    pub async fn init(&mut self, seek_position: f64) -> IoriResult<()> {
        let result = self.tune(seek_position).await;
        if let Err(e) = &result {
            self.report_error(e);
        }
        result
    }

    async fn tune(&mut self, seek_position: f64) -> IoriResult<()> {
        let manifest = self.load_manifest(true).await?;
        self.live = manifest.is_live();
        if self.live {
            if let Err(e) = self
                .clock
                .sync(&manifest.utc_timing, self.fetcher.as_ref())
                .await
            {
                tracing::warn!(error = %e, "Clock sync failed, using local time");
            }
        }

        if manifest.periods.is_empty() {
            return Err(IoriError::ManifestContent(
                "manifest has no period".to_string(),
            ));
        }
        let duration = manifest.duration();
        if !self.live && duration <= 0. {
            return Err(IoriError::ManifestContent(format!(
                "presentation duration is {duration}s"
            )));
        }

        let now = self.live_now(&manifest);
        self.culling.update(&manifest, now);
        let manifest = Arc::new(manifest);
        self.manifest = Some(manifest.clone());
        self.last_refresh = Instant::now();
        self.register_periods(&manifest).await;
        self.report_timed_metadata(&manifest).await;

        let position = if self.live {
            let position = (duration - self.config.live_offset()).max(0.);
            tracing::info!(
                duration,
                live_offset = self.config.live_offset(),
                position,
                "Tuning to the live point"
            );
            position
        } else if (0. ..=duration).contains(&seek_position) {
            seek_position
        } else {
            return Err(IoriError::SeekRange {
                position: seek_position,
                duration,
            });
        };

        self.period_index = if self.live {
            manifest.periods.len() - 1
        } else {
            manifest.period_index_at(position)
        };
        let offset = (position - manifest.period_offset(self.period_index)).max(0.);
        tracing::info!(
            period_index = self.period_index,
            period_id = %manifest.periods[self.period_index].id,
            offset,
            rate = self.rate,
            "Tune"
        );

        self.ad_state = AdState::default();
        self.playing_ad = None;
        self.tracks.clear();
        self.abr = None;
        self.previous_video = None;
        self.drm_sessions.reset();
        self.drm_helpers.clear();
        self.enter_period(offset, PeriodEntry::Tune).await?;

        self.emit(CollectorEvent::DurationChanged {
            duration,
            culled_seconds: self.culling.total(),
        });
        self.evaluate_ads(AdEvent::Init).await
    }

    /// Move to the next period in play direction.
    ///
    /// Returns `false` at either end of the presentation.
    pub async fn next_period(&mut self) -> IoriResult<bool> {
        if let Some(ad) = self.playing_ad.clone() {
            let next = if self.is_reverse() {
                self.period_index.checked_sub(1)
            } else {
                Some(self.period_index + 1).filter(|&i| i < ad.manifest.periods.len())
            };
            if let Some(index) = next {
                self.period_index = index;
                let offset = if self.is_reverse() { f64::INFINITY } else { 0. };
                self.enter_period(offset, PeriodEntry::Transition).await?;
                return Ok(true);
            }

            tracing::info!(break_id = %ad.break_id, ad_index = ad.ad_index, "Ad content exhausted");
            self.evaluate_ads(AdEvent::AdFinished).await?;
            if !self.ad_state.is_in_adbreak() && self.playing_ad.is_some() {
                self.resume_base_in_place().await?;
            }
            return Ok(true);
        }

        let Some(manifest) = self.manifest.clone() else {
            return Ok(false);
        };
        let next = if self.is_reverse() {
            self.period_index.checked_sub(1)
        } else {
            Some(self.period_index + 1).filter(|&i| i < manifest.periods.len())
        };
        let Some(index) = next else {
            return Ok(false);
        };

        tracing::info!(
            from = self.period_index,
            to = index,
            period_id = %manifest.periods[index].id,
            "Period transition"
        );
        self.period_index = index;
        let offset = if self.is_reverse() { f64::INFINITY } else { 0. };
        self.enter_period(offset, PeriodEntry::Transition).await?;
        self.evaluate_ads(AdEvent::PeriodChange).await?;
        Ok(true)
    }

    /// Download the manifest again and move the cursors onto it.
    ///
    /// Transient download failures keep the previous manifest; the next cycle retries.
    pub async fn refresh_manifest(&mut self) -> IoriResult<()> {
        self.last_refresh = Instant::now();
        let manifest = match self.load_manifest(false).await {
            Ok(manifest) => manifest,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::NetworkTransient | ErrorKind::FragmentDownload
                ) =>
            {
                tracing::warn!(error = %e, "Manifest refresh failed, keeping the previous manifest");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if manifest.periods.is_empty() {
            tracing::warn!("Refreshed manifest has no period, keeping the previous manifest");
            return Ok(());
        }

        let culled = self.culling.update(&manifest, self.live_now(&manifest));
        if culled > 0. {
            self.emit(CollectorEvent::DurationChanged {
                duration: manifest.duration(),
                culled_seconds: self.culling.total(),
            });
        }

        let was_live = self.live;
        self.live = manifest.is_live();
        if was_live && !self.live {
            tracing::info!("Manifest turned static, playing until the end of the presentation");
        }

        {
            let ids: Vec<String> = manifest.periods.iter().map(|p| p.id.clone()).collect();
            let mut cdai = self.cdai.object().lock().await;
            for id in &ids {
                cdai.insert_period(id);
            }
            cdai.prune_period_maps(&ids);
            cdai.place_ads(&manifest);
        }

        let manifest = Arc::new(manifest);
        self.report_timed_metadata(&manifest).await;
        self.manifest = Some(manifest.clone());
        tracing::debug!(
            periods = manifest.periods.len(),
            culled_seconds = self.culling.total(),
            "manifest refreshed"
        );

        // ad tracks walk their own manifest
        if self.playing_ad.is_some() {
            return Ok(());
        }
        self.follow_refreshed_period(&manifest).await
    }

    fn refresh_interval(&self) -> Duration {
        let Some(manifest) = &self.manifest else {
            return self.config.min_refresh_interval();
        };
        refresh_delay(
            minimum_update_interval(manifest, &self.config),
            self.buffered(),
            Duration::ZERO,
            &self.config,
        )
    }

    fn until_refresh(&self) -> Duration {
        self.refresh_interval()
            .saturating_sub(self.last_refresh.elapsed())
    }

    /// Content published but not yet fetched by the leading track.
    fn buffered(&self) -> Duration {
        let (Some(manifest), Some(track)) = (&self.manifest, self.tracks.first()) else {
            return Duration::ZERO;
        };
        if self.playing_ad.is_some() {
            return Duration::ZERO;
        }
        let period_start = manifest.period_start(self.period_index);
        let available = manifest
            .period(self.period_index)
            .and_then(|p| p.duration)
            .or_else(|| self.live_now(manifest).map(|now| now - period_start))
            .unwrap_or_default();
        Duration::try_from_secs_f64((available - track.state.fragment_time).max(0.))
            .unwrap_or_default()
    }

    /// Wait for `delay` unless cancelled first. Returns `false` on cancellation.
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Collect fragments until the end of the presentation, the end position or cancellation.
    ///
    /// A fatal error is reported as [`CollectorEvent::Error`] and returned.
    pub async fn run(&mut self) -> IoriResult<()> {
        let result = self.collect().await;
        if let Err(e) = &result {
            self.report_error(e);
        }
        result
    }

    async fn collect(&mut self) -> IoriResult<()> {
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Downloads disabled, stopping collector");
                return Ok(());
            }
            if self.live && self.last_refresh.elapsed() >= self.refresh_interval() {
                self.refresh_manifest().await?;
            }

            match self.tick().await? {
                TickOutcome::Progress => {}
                TickOutcome::Wait(delay) => {
                    let delay = if self.live {
                        delay.min(self.until_refresh())
                    } else {
                        delay
                    };
                    if !self.sleep(delay).await {
                        return Ok(());
                    }
                }
                TickOutcome::PeriodEnded => {
                    if self.next_period().await? {
                        continue;
                    }
                    if self.live {
                        // the next period shows up with a refresh
                        if !self.sleep(self.until_refresh()).await {
                            return Ok(());
                        }
                        continue;
                    }
                    tracing::info!("Reached the end of the presentation");
                    self.emit(CollectorEvent::EndOfStream);
                    return Ok(());
                }
                TickOutcome::EndReached => {
                    tracing::info!(end_position = ?self.end_position, "Reached the end position");
                    self.emit(CollectorEvent::EndTimeReached);
                    return Ok(());
                }
                TickOutcome::Stopped => return Ok(()),
            }
        }
    }
}
