use super::{FragmentCollector, PeriodEntry, PlayingAd};
use crate::{
    cache::FragmentCache,
    cdai::{AdAction, AdContext, AdEvent},
    drm::DrmCollaborator,
    event::CollectorEvent,
    fetch::Fetcher,
    manifest::{Manifest, ManifestParser},
    sink::MediaSink,
    IoriError, IoriResult,
};

/// Event streams with this scheme prefix announce ad breaks.
const SCTE35_SCHEME_PREFIX: &str = "urn:scte:scte35";

/// Id of the base period in front of `period_id`.
fn period_before(manifest: &Manifest, period_id: &str) -> Option<String> {
    let index = manifest.period_index_by_id(period_id)?;
    index
        .checked_sub(1)
        .and_then(|previous| manifest.period(previous))
        .map(|period| period.id.clone())
}

impl<F, P, C, D, S> FragmentCollector<F, P, C, D, S>
where
    F: Fetcher,
    P: ManifestParser + Send + Sync + 'static,
    C: FragmentCache,
    D: DrmCollaborator,
    S: MediaSink,
{
    /// Run `event` through the ad state machine and apply what it asks for.
    ///
    /// An ad that can not be switched to is reported back to the machine as failed, which moves
    /// on to the next ad or back to base content.
    pub(super) async fn evaluate_ads(&mut self, event: AdEvent) -> IoriResult<()> {
        let mut pending = Some(event);
        while let Some(event) = pending.take() {
            let Some(base) = self.manifest.clone() else {
                return Ok(());
            };

            let transition = {
                let mut cdai = self.cdai.object().lock().await;
                if !cdai.has_ad_breaks() && !self.ad_state.is_in_adbreak() {
                    return Ok(());
                }
                cdai.place_ads(&base);
                let ctx = AdContext {
                    rate: self.rate,
                    base_period_id: self.base_period_id.clone(),
                    base_period_offset: self.base_period_offset,
                    previous_period_id: period_before(&base, &self.base_period_id),
                };
                self.ad_state.on_event(event, &ctx, &mut cdai)
            };

            for action in transition.actions {
                match action {
                    AdAction::Notify(event) => self.emit(event),
                    AdAction::PlayAd {
                        break_id,
                        ad_index,
                        offset,
                    } => {
                        if let Err(e) = self.play_ad(break_id, ad_index, offset).await {
                            tracing::error!(error = %e, "Failed to switch to the ad");
                            pending = Some(AdEvent::AdFailed);
                            break;
                        }
                    }
                    AdAction::ResumeBase { period_id, offset } => {
                        self.resume_base(&period_id, offset).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn play_ad(&mut self, break_id: String, ad_index: usize, offset: f64) -> IoriResult<()> {
        let manifest = self
            .cdai
            .object()
            .lock()
            .await
            .ad(&break_id, ad_index)
            .and_then(|ad| ad.manifest.clone())
            .ok_or_else(|| {
                IoriError::ManifestContent(format!(
                    "ad {ad_index} of break {break_id} has no manifest"
                ))
            })?;

        let period_index = manifest.period_index_at(offset);
        let period_offset = (offset - manifest.period_offset(period_index)).max(0.);
        tracing::info!(
            %break_id,
            ad_index,
            offset,
            url = %manifest.url,
            "Playing ad"
        );
        self.playing_ad = Some(PlayingAd {
            break_id,
            ad_index,
            manifest,
        });
        self.period_index = period_index;
        self.enter_period(period_offset, PeriodEntry::Ad).await
    }

    /// Switch back to the base manifest at `offset` seconds into `period_id`.
    pub(super) async fn resume_base(&mut self, period_id: &str, offset: f64) -> IoriResult<()> {
        let Some(base) = self.manifest.clone() else {
            return Ok(());
        };
        let index = base
            .period_index_by_id(period_id)
            .or_else(|| {
                tracing::warn!(%period_id, "Resume period left the manifest");
                base.period_index_by_id(&self.base_period_id)
            })
            .unwrap_or_default();

        tracing::info!(%period_id, period_index = index, offset, "Resuming base content");
        self.playing_ad = None;
        self.period_index = index;
        self.enter_period(offset, PeriodEntry::Ad).await
    }

    /// Give up on the break and continue the base content where it was left.
    pub(super) async fn resume_base_in_place(&mut self) -> IoriResult<()> {
        self.ad_state = Default::default();
        if self.playing_ad.is_none() {
            return Ok(());
        }
        let period_id = self.base_period_id.clone();
        self.resume_base(&period_id, self.base_period_offset).await
    }

    /// Record that the leading track delivered a fragment at `start` seconds into the period.
    ///
    /// Outside ads this is the base position itself. While an ad plays the base position keeps
    /// moving by the delivered duration, rolling over into the following base period.
    pub(super) async fn advance_ad_position(
        &mut self,
        manifest: &Manifest,
        start: f64,
        duration: f64,
    ) -> Option<AdEvent> {
        let Some(ad) = self.playing_ad.clone() else {
            self.base_period_offset = if self.is_reverse() {
                start
            } else {
                start + duration
            };
            return Some(AdEvent::BaseOffsetChange);
        };

        self.advance_base_offset(if self.is_reverse() { -duration } else { duration });
        let fragment_time = manifest.period_offset(self.period_index) + start + duration;
        let terminated = self
            .cdai
            .object()
            .lock()
            .await
            .check_for_ad_terminate(&ad.break_id, ad.ad_index, fragment_time);
        if terminated {
            tracing::info!(
                break_id = %ad.break_id,
                ad_index = ad.ad_index,
                fragment_time,
                "Ad reached its reserved duration"
            );
            return Some(AdEvent::AdFinished);
        }
        None
    }

    fn advance_base_offset(&mut self, delta: f64) {
        let Some(base) = self.manifest.clone() else {
            return;
        };
        self.base_period_offset += delta;
        let Some(index) = base.period_index_by_id(&self.base_period_id) else {
            return;
        };

        if delta >= 0. {
            let Some(duration) = base.period_duration(index) else {
                return;
            };
            if self.base_period_offset >= duration {
                if let Some(next) = base.period(index + 1) {
                    self.base_period_offset -= duration;
                    self.base_period_id = next.id.clone();
                }
            }
        } else if self.base_period_offset < 0. && index > 0 {
            if let Some(previous) = base.period(index - 1) {
                self.base_period_offset += base.period_duration(index - 1).unwrap_or_default();
                self.base_period_id = previous.id.clone();
            }
        }
    }

    pub(super) async fn register_periods(&self, manifest: &Manifest) {
        let mut cdai = self.cdai.object().lock().await;
        for period in &manifest.periods {
            cdai.insert_period(&period.id);
        }
    }

    /// Report every event of the manifest's event streams once.
    ///
    /// SCTE-35 events additionally reserve an ad break keyed by their period id. Breaks always
    /// start at the beginning of that period: the event's own start only reaches the embedder
    /// through [`CollectorEvent::TimedMetadata`], and later events of a period that already has
    /// a break do not reserve another one.
    pub(super) async fn report_timed_metadata(&mut self, manifest: &Manifest) {
        for (index, period) in manifest.periods.iter().enumerate() {
            let period_start = manifest.period_start(index);
            for stream in &period.event_streams {
                let timescale = stream.timescale.max(1) as f64;
                for event in &stream.events {
                    let id = event
                        .id
                        .clone()
                        .unwrap_or_else(|| event.presentation_time.to_string());
                    if !self
                        .reported_metadata
                        .insert((stream.scheme_id_uri.clone(), id.clone()))
                    {
                        continue;
                    }

                    let start_ms =
                        ((period_start + event.presentation_time as f64 / timescale) * 1000.) as u64;
                    let duration_ms = event
                        .duration
                        .map(|d| (d as f64 / timescale * 1000.) as u64)
                        .unwrap_or_default();
                    tracing::info!(
                        scheme = %stream.scheme_id_uri,
                        %id,
                        period_id = %period.id,
                        start_ms,
                        duration_ms,
                        "Timed metadata"
                    );
                    self.emit(CollectorEvent::TimedMetadata {
                        scheme: stream.scheme_id_uri.clone(),
                        id,
                        start_ms,
                        duration_ms,
                        payload: event.message_data.clone(),
                    });

                    if stream.scheme_id_uri.starts_with(SCTE35_SCHEME_PREFIX) && duration_ms > 0 {
                        if event.presentation_time > 0 {
                            tracing::debug!(
                                period_id = %period.id,
                                start_ms,
                                period_start_ms = (period_start * 1000.) as u64,
                                "SCTE-35 splice inside the period, break placed at the period start"
                            );
                        }
                        _ = self
                            .cdai
                            .set_alternate_contents(&period.id, "", "", start_ms, duration_ms)
                            .await;
                    }
                }
            }
        }
    }
}
