use super::{AdOnPeriod, CdaiObject, PeriodAds, OFFSET_ALIGN_FACTOR};
use crate::manifest::Manifest;

/// Result of [`CdaiObject::check_for_ad_start`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdLookup {
    /// Break covering the position, `None` outside breaks or once the break is over.
    pub break_id: Option<String>,
    /// Ad at the position and the offset into it, in seconds.
    pub ad: Option<(usize, f64)>,
}

fn period_content_ms(manifest: &Manifest, period: usize) -> u64 {
    manifest
        .period_duration(period)
        .map(|d| (d * 1000.) as u64)
        .unwrap_or_default()
}

fn align(offset_ms: u64) -> u64 {
    offset_ms - offset_ms % OFFSET_ALIGN_FACTOR
}

impl CdaiObject {
    /// Map the ads of the break being placed onto the base periods of `manifest`.
    ///
    /// Live breaks grow with every refresh, so placement continues where the previous call
    /// stopped: the open period keeps receiving content until the next period appears.
    pub fn place_ads(&mut self, manifest: &Manifest) {
        let Some(mut placement) = self.placement.take() else {
            return;
        };
        let Some(ad_break) = self.ad_breaks.get_mut(&placement.break_id) else {
            self.placement = self.next_placement.take();
            return;
        };

        if !ad_break.adjust_end_period_offset {
            let mut open_found = false;
            for (index, period) in manifest.periods.iter().enumerate() {
                if ad_break.adjust_end_period_offset {
                    break;
                }

                if placement.open_period_id == period.id {
                    open_found = true;
                } else if open_found {
                    if period_content_ms(manifest, index) == 0 {
                        // empty periods may show up early
                        continue;
                    }
                    self.period_map
                        .entry(placement.open_period_id.clone())
                        .or_default()
                        .filled = true;
                    placement.open_period_id = period.id.clone();
                    placement.accounted_ms = 0;
                } else {
                    continue;
                }

                let total = period_content_ms(manifest, index);
                let mut delta = total.saturating_sub(placement.accounted_ms);
                placement.accounted_ms = total;

                let period_ads = self.period_map.entry(period.id.clone()).or_default();
                if period_ads.ad_break_id.is_none() {
                    period_ads.ad_break_id = Some(placement.break_id.clone());
                    period_ads.offset_to_ad.insert(
                        0,
                        AdOnPeriod {
                            ad_index: placement.ad_index,
                            ad_start_offset_ms: placement.ad_next_offset_ms,
                        },
                    );
                }
                period_ads.duration_ms += delta;

                let ad_count = ad_break.ads.len();
                while delta > 0 {
                    let Some(ad) = ad_break.ads.get_mut(placement.ad_index) else {
                        break;
                    };
                    if ad.base_period_id.is_none() {
                        let offset = period_ads.duration_ms - delta;
                        ad.base_period_id = Some(period.id.clone());
                        ad.base_period_offset_ms = offset;
                        period_ads.offset_to_ad.insert(
                            align(offset),
                            AdOnPeriod {
                                ad_index: placement.ad_index,
                                ad_start_offset_ms: 0,
                            },
                        );
                    }

                    let remaining = ad.duration_ms.saturating_sub(placement.ad_next_offset_ms);
                    if delta < remaining {
                        placement.ad_next_offset_ms += delta;
                        delta = 0;
                    } else if placement.ad_index + 1 < ad_count || delta >= OFFSET_ALIGN_FACTOR {
                        // the last ad needs some room behind it to fall back to the base content
                        ad.placed = true;
                        delta -= remaining;
                        placement.ad_index += 1;
                        placement.ad_next_offset_ms = 0;
                        if placement.ad_index >= ad_count {
                            ad_break.end_period_id = Some(period.id.clone());
                            ad_break.end_period_offset_ms = period_ads.duration_ms - delta;
                            ad_break.adjust_end_period_offset = true;
                            break;
                        }
                    } else {
                        // wait for more content
                        break;
                    }
                }
            }
        }

        if ad_break.adjust_end_period_offset {
            let end_period_id = ad_break.end_period_id.clone().unwrap_or_default();
            match manifest.period_index_by_id(&end_period_id) {
                None => {
                    tracing::warn!(period_id = %end_period_id, "Couldn't adjust offset, end period not found");
                    ad_break.adjust_end_period_offset = false;
                }
                Some(_) if ad_break.end_period_offset_ms < 2 * OFFSET_ALIGN_FACTOR => {
                    // ads end right after the period start: resume at the period start
                    ad_break.adjust_end_period_offset = false;
                    ad_break.end_period_offset_ms = 0;
                    self.period_map.insert(end_period_id, PeriodAds::default());
                }
                Some(index) => {
                    let period_duration = period_content_ms(manifest, index);
                    let diff = period_duration as i64 - ad_break.end_period_offset_ms as i64;
                    if diff < OFFSET_ALIGN_FACTOR as i64 {
                        if let Some(next) = manifest.period(index + 1) {
                            tracing::info!(
                                diff,
                                period_duration,
                                period_id = %next.id,
                                "Close to period end, aligning to next period"
                            );
                            ad_break.adjust_end_period_offset = false;
                            ad_break.end_period_offset_ms = 0;
                            ad_break.end_period_id = Some(next.id.clone());
                            self.period_map.insert(next.id.clone(), PeriodAds::default());
                        } else {
                            tracing::info!(
                                diff,
                                period_duration,
                                "Close to period end, but next period not available, waiting"
                            );
                        }
                    } else {
                        ad_break.adjust_end_period_offset = false;
                    }
                }
            }

            if !ad_break.adjust_end_period_offset {
                tracing::info!(
                    break_id = %placement.break_id,
                    duration = ad_break.ads_duration_ms,
                    end_period_id = ?ad_break.end_period_id,
                    end_period_offset = ad_break.end_period_offset_ms,
                    ads = ad_break.ads.len(),
                    "Placement done"
                );
                self.placement = self.next_placement.take();
                return;
            }
        }

        self.placement = Some(placement);
    }

    /// Ad covering `offset` seconds of base period `period_id`.
    ///
    /// Normal rate playback only matches ad starts on the alignment grid. Discrete positions
    /// (tune, seek, trick-play) resolve to the ad covering the offset and the offset into it.
    pub fn check_for_ad_start(
        &self,
        rate: f64,
        init: bool,
        period_id: &str,
        offset: f64,
    ) -> AdLookup {
        let mut lookup = AdLookup::default();
        let Some(period_ads) = self.period_map.get(period_id) else {
            return lookup;
        };
        let Some(break_id) = &period_ads.ad_break_id else {
            return lookup;
        };
        let Some(ad_break) = self.ad_breaks.get(break_id) else {
            return lookup;
        };
        lookup.break_id = Some(break_id.clone());

        let key = (offset.max(0.) * 1000.) as u64;
        let seamless = !init && rate == 1.;
        if seamless {
            let floor = align(key);
            let found = period_ads
                .offset_to_ad
                .get(&floor)
                .or_else(|| period_ads.offset_to_ad.get(&(floor + OFFSET_ALIGN_FACTOR)));
            if let Some(on_period) = found.filter(|a| a.ad_start_offset_ms == 0) {
                lookup.ad = Some((on_period.ad_index, 0.));
            }
        } else {
            let end = if ad_break.end_period_id.as_deref() == Some(period_id) {
                ad_break.end_period_offset_ms
            } else {
                period_ads.duration_ms
            };
            if key <= end {
                lookup.ad = period_ads
                    .offset_to_ad
                    .range(..=key)
                    .next_back()
                    .map(|(&start, on_period)| {
                        (on_period.ad_index, (key - start) as f64 / 1000.)
                    });
            }
        }

        if rate >= 1.
            && lookup.ad.is_none()
            && ad_break.end_period_id.as_deref() == Some(period_id)
            && key >= ad_break.end_period_offset_ms
        {
            // the break is over
            lookup.break_id = None;
        }
        lookup
    }

    /// Whether the ad playing in `break_id` ran past its reserved duration.
    pub fn check_for_ad_terminate(&self, break_id: &str, ad_index: usize, fragment_time: f64) -> bool {
        self.ad(break_id, ad_index).is_some_and(|ad| {
            (fragment_time.max(0.) * 1000.) as u64 >= ad.duration_ms + OFFSET_ALIGN_FACTOR
        })
    }

    /// Forget breaks and periods which left the manifest.
    ///
    /// The break being placed and the break being played are kept.
    pub fn prune_period_maps(&mut self, period_ids: &[String]) {
        let pending = self.placement.as_ref().map(|p| p.break_id.clone());
        let playing = self.playing_break_id.clone();
        self.ad_breaks.retain(|break_id, _| {
            let keep = pending.as_ref() == Some(break_id)
                || playing.as_ref() == Some(break_id)
                || period_ids.contains(break_id);
            if !keep {
                tracing::info!(%break_id, "Removing ad break");
            }
            keep
        });
        self.period_map
            .retain(|period_id, _| period_ids.contains(period_id));
    }
}
