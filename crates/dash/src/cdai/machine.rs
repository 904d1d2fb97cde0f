use super::CdaiObject;
use crate::event::CollectorEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdEvent {
    /// Tune or seek.
    Init,
    BaseOffsetChange,
    /// The playing ad ran out of content.
    AdFinished,
    AdFailed,
    PeriodChange,
}

/// Where playback stands relative to ad breaks.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AdState {
    #[default]
    OutsideAdbreak,
    /// Inside a break, base content plays.
    InAdbreakAdNotPlaying { break_id: String },
    InAdbreakAdPlaying { break_id: String, ad_index: usize },
    /// An ad finished, base content is tracked until placement confirms the next step.
    InAdbreakWaitToCatchup { break_id: String, next_ad: Option<usize> },
    InAdbreakAdReadyToPlay { break_id: String, ad_index: usize },
}

/// Base content position the machine is evaluated at.
#[derive(Debug, Clone, PartialEq)]
pub struct AdContext {
    pub rate: f64,
    pub base_period_id: String,
    /// Offset into the base period, in seconds.
    pub base_period_offset: f64,
    /// Id of the base period before the break, used to resume reverse playback.
    pub previous_period_id: Option<String>,
}

/// Side effects of a transition, applied by the collector.
#[derive(Debug, Clone, PartialEq)]
pub enum AdAction {
    Notify(CollectorEvent),
    /// Switch the tracks to the ad's manifest.
    PlayAd {
        break_id: String,
        ad_index: usize,
        offset: f64,
    },
    /// Switch back to the base manifest.
    ResumeBase { period_id: String, offset: f64 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    /// States passed through, the last one is current.
    pub states: Vec<AdState>,
    pub actions: Vec<AdAction>,
}

impl AdState {
    pub fn is_in_adbreak(&self) -> bool {
        !matches!(self, Self::OutsideAdbreak)
    }

    pub fn is_ad_playing(&self) -> bool {
        matches!(self, Self::InAdbreakAdPlaying { .. })
    }

    /// Fragment delivery is suspended while waiting for placement.
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::InAdbreakWaitToCatchup { .. })
    }

    /// Run `event` through the machine.
    ///
    /// Transient states (waiting for placement, ad ready) are evaluated right away, so the
    /// returned transition ends in a state that waits for the next external event.
    pub fn on_event(
        &mut self,
        event: AdEvent,
        ctx: &AdContext,
        cdai: &mut CdaiObject,
    ) -> Transition {
        let mut transition = Transition::default();
        let mut next = self.step(event, ctx, cdai, &mut transition.actions);
        while let Some(state) = next {
            let old = std::mem::replace(self, state);
            tracing::info!(from = ?old, to = ?self, ?event, "Ad state changed");
            transition.states.push(self.clone());
            next = match self {
                Self::InAdbreakWaitToCatchup { .. } | Self::InAdbreakAdReadyToPlay { .. } => {
                    self.step(AdEvent::BaseOffsetChange, ctx, cdai, &mut transition.actions)
                }
                _ => None,
            };
        }

        cdai.playing_break_id = match self {
            Self::OutsideAdbreak => None,
            Self::InAdbreakAdNotPlaying { break_id }
            | Self::InAdbreakAdPlaying { break_id, .. }
            | Self::InAdbreakWaitToCatchup { break_id, .. }
            | Self::InAdbreakAdReadyToPlay { break_id, .. } => Some(break_id.clone()),
        };
        transition
    }

    fn step(
        &self,
        event: AdEvent,
        ctx: &AdContext,
        cdai: &mut CdaiObject,
        actions: &mut Vec<AdAction>,
    ) -> Option<AdState> {
        match self {
            Self::OutsideAdbreak => match event {
                AdEvent::Init | AdEvent::BaseOffsetChange | AdEvent::PeriodChange => {
                    let lookup = cdai.check_for_ad_start(
                        ctx.rate,
                        event == AdEvent::Init,
                        &ctx.base_period_id,
                        ctx.base_period_offset,
                    );
                    let break_id = lookup.break_id?;
                    // breaks are only entered where an ad is anchored
                    let (ad_index, offset) = lookup.ad?;
                    let position_ms = cdai
                        .ad_break(&break_id)
                        .map(|b| b.ad_position_ms(ad_index))
                        .unwrap_or_default();
                    actions.push(AdAction::Notify(CollectorEvent::AdReservationStart {
                        break_id: break_id.clone(),
                        position_ms,
                    }));
                    Some(start_ad(cdai, break_id, ad_index, offset, actions))
                }
                _ => None,
            },

            Self::InAdbreakAdNotPlaying { break_id } => match event {
                AdEvent::Init | AdEvent::BaseOffsetChange | AdEvent::PeriodChange => {
                    let lookup = cdai.check_for_ad_start(
                        ctx.rate,
                        event == AdEvent::Init,
                        &ctx.base_period_id,
                        ctx.base_period_offset,
                    );
                    match lookup.break_id {
                        Some(found) if &found == break_id => {
                            let (ad_index, offset) = lookup.ad?;
                            Some(start_ad(cdai, found, ad_index, offset, actions))
                        }
                        _ => {
                            end_reservation(cdai, break_id, actions);
                            Some(Self::OutsideAdbreak)
                        }
                    }
                }
                _ => None,
            },

            Self::InAdbreakAdPlaying { break_id, ad_index } => match event {
                AdEvent::AdFinished | AdEvent::AdFailed => {
                    let ad_index = *ad_index;
                    if event == AdEvent::AdFailed {
                        cdai.invalidate(break_id, ad_index);
                        notify_placement(cdai, break_id, ad_index, Placement::Error, actions);
                    }
                    notify_placement(cdai, break_id, ad_index, Placement::End, actions);
                    Some(Self::InAdbreakWaitToCatchup {
                        break_id: break_id.clone(),
                        next_ad: next_ad(ad_index, ctx.rate),
                    })
                }
                _ => None,
            },

            Self::InAdbreakWaitToCatchup { break_id, next_ad } => {
                let ad_break = cdai.ad_break(break_id)?;
                match next_ad.filter(|&i| i < ad_break.ads.len()) {
                    Some(ad_index) => {
                        // the next ad is mapped once the previous one is completely placed
                        let previous = if ctx.rate < 0. {
                            ad_index + 1
                        } else {
                            ad_index.checked_sub(1)?
                        };
                        if ad_break.ads.get(previous).is_some_and(|ad| !ad.placed) {
                            return None;
                        }
                        Some(Self::InAdbreakAdReadyToPlay {
                            break_id: break_id.clone(),
                            ad_index,
                        })
                    }
                    None if ctx.rate < 0. => {
                        let period_id = ctx.previous_period_id.clone()?;
                        end_reservation(cdai, break_id, actions);
                        // resume at the end of the period before the break
                        actions.push(AdAction::ResumeBase {
                            period_id,
                            offset: f64::INFINITY,
                        });
                        Some(Self::OutsideAdbreak)
                    }
                    None => {
                        if !ad_break.is_placed() {
                            return None;
                        }
                        let period_id = ad_break.end_period_id.clone()?;
                        let offset = ad_break.end_period_offset_ms as f64 / 1000.;
                        end_reservation(cdai, break_id, actions);
                        actions.push(AdAction::ResumeBase { period_id, offset });
                        Some(Self::OutsideAdbreak)
                    }
                }
            }

            Self::InAdbreakAdReadyToPlay { break_id, ad_index } => {
                if event == AdEvent::AdFailed
                    || cdai.ad(break_id, *ad_index).is_none_or(|ad| ad.invalid)
                {
                    if event == AdEvent::AdFailed {
                        cdai.invalidate(break_id, *ad_index);
                    }
                    return Some(Self::InAdbreakWaitToCatchup {
                        break_id: break_id.clone(),
                        next_ad: next_ad(*ad_index, ctx.rate),
                    });
                }
                Some(start_ad(cdai, break_id.clone(), *ad_index, 0., actions))
            }
        }
    }
}

fn next_ad(ad_index: usize, rate: f64) -> Option<usize> {
    if rate < 0. {
        ad_index.checked_sub(1)
    } else {
        Some(ad_index + 1)
    }
}

fn start_ad(
    cdai: &CdaiObject,
    break_id: String,
    ad_index: usize,
    offset: f64,
    actions: &mut Vec<AdAction>,
) -> AdState {
    match cdai.ad(&break_id, ad_index) {
        Some(ad) if !ad.invalid => {
            notify_placement(cdai, &break_id, ad_index, Placement::Start, actions);
            actions.push(AdAction::PlayAd {
                break_id: break_id.clone(),
                ad_index,
                offset,
            });
            AdState::InAdbreakAdPlaying { break_id, ad_index }
        }
        _ => {
            tracing::warn!(%break_id, ad_index, "Ad is invalid, skipping");
            AdState::InAdbreakAdNotPlaying { break_id }
        }
    }
}

fn end_reservation(cdai: &CdaiObject, break_id: &str, actions: &mut Vec<AdAction>) {
    let position_ms = cdai
        .ad_break(break_id)
        .map(|b| b.ads_duration_ms)
        .unwrap_or_default();
    actions.push(AdAction::Notify(CollectorEvent::AdReservationEnd {
        break_id: break_id.to_string(),
        position_ms,
    }));
}

enum Placement {
    Start,
    End,
    Error,
}

fn notify_placement(
    cdai: &CdaiObject,
    break_id: &str,
    ad_index: usize,
    placement: Placement,
    actions: &mut Vec<AdAction>,
) {
    let Some(ad_break) = cdai.ad_break(break_id) else {
        return;
    };
    let Some(ad) = ad_break.ads.get(ad_index) else {
        return;
    };
    let ad_id = ad.ad_id.clone();
    let position_ms = ad_break.ad_position_ms(ad_index);
    let duration_ms = ad.duration_ms;
    actions.push(AdAction::Notify(match placement {
        Placement::Start => CollectorEvent::AdPlacementStart {
            ad_id,
            position_ms,
            duration_ms,
        },
        Placement::End => CollectorEvent::AdPlacementEnd {
            ad_id,
            position_ms,
            duration_ms,
        },
        Placement::Error => CollectorEvent::AdPlacementError {
            ad_id,
            position_ms,
            duration_ms,
        },
    }));
}
