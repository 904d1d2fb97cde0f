//! Client-side ad insertion.
//!
//! Ads are announced against an ad break, which is identified by the id of the base period the
//! break starts at. [`CdaiObject`] keeps the breaks, maps them onto the base periods as the
//! manifest grows ([`CdaiObject::place_ads`]) and answers whether a base position is covered
//! by an ad. [`AdState`] drives playback through a break.
mod machine;
mod placement;

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use url::Url;

pub use machine::{AdAction, AdContext, AdEvent, AdState, Transition};
pub use placement::AdLookup;

use crate::{
    event::CollectorEvent,
    fetch::Fetcher,
    manifest::{Manifest, ManifestParser},
    IoriResult,
};

/// Ad durations drift slightly from what the base timeline reserves. Offsets are aligned to
/// this many milliseconds when ads are matched against the base content.
pub const OFFSET_ALIGN_FACTOR: u64 = 2000;

#[derive(Debug, Clone)]
pub struct AdNode {
    /// Failed to play once, never retried.
    pub invalid: bool,
    /// Completely mapped onto base periods.
    pub placed: bool,
    pub ad_id: String,
    pub url: Url,
    pub duration_ms: u64,
    pub base_period_id: Option<String>,
    pub base_period_offset_ms: u64,
    pub manifest: Option<Arc<Manifest>>,
}

#[derive(Debug, Clone, Default)]
pub struct AdBreak {
    pub break_duration_ms: u64,
    pub ads: Vec<AdNode>,
    /// Base period playback resumes at once the break is over.
    pub end_period_id: Option<String>,
    pub end_period_offset_ms: u64,
    /// Sum of the accepted ad durations.
    pub ads_duration_ms: u64,
    /// All ads are placed, the resume point still has to be aligned.
    pub(crate) adjust_end_period_offset: bool,
}

impl AdBreak {
    /// Offset of `ad_index` inside the break.
    pub fn ad_position_ms(&self, ad_index: usize) -> u64 {
        self.ads
            .iter()
            .take(ad_index)
            .map(|ad| ad.duration_ms)
            .sum()
    }

    pub fn is_placed(&self) -> bool {
        self.end_period_id.is_some() && !self.adjust_end_period_offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdOnPeriod {
    pub ad_index: usize,
    /// Where in the ad this period starts, in milliseconds.
    pub ad_start_offset_ms: u64,
}

/// Ads mapped onto one base period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodAds {
    pub filled: bool,
    pub ad_break_id: Option<String>,
    pub duration_ms: u64,
    /// Period offset (aligned) to the ad starting there.
    pub offset_to_ad: BTreeMap<u64, AdOnPeriod>,
}

/// Progress of mapping the ads of one break onto base periods.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Placement {
    pub(crate) break_id: String,
    /// Period of the break still receiving content.
    pub(crate) open_period_id: String,
    /// Content of the open period already accounted for.
    pub(crate) accounted_ms: u64,
    pub(crate) ad_index: usize,
    pub(crate) ad_next_offset_ms: u64,
}

impl Placement {
    fn new(break_id: &str) -> Self {
        Self {
            break_id: break_id.to_string(),
            open_period_id: break_id.to_string(),
            accounted_ms: 0,
            ad_index: 0,
            ad_next_offset_ms: 0,
        }
    }
}

/// Ad manifest to fetch for a break.
#[derive(Debug, Clone, PartialEq)]
pub struct AdRequest {
    pub period_id: String,
    pub ad_id: String,
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlternateContent {
    /// Break registered without an ad yet.
    Placeholder,
    Fetch(AdRequest),
    Rejected(CollectorEvent),
}

#[derive(Debug, Default)]
pub struct CdaiObject {
    pub(crate) ad_breaks: HashMap<String, AdBreak>,
    pub(crate) period_map: HashMap<String, PeriodAds>,
    pub(crate) placement: Option<Placement>,
    /// Placement of a break whose first ad arrived while another break was being placed.
    pub(crate) next_placement: Option<Placement>,
    pub(crate) playing_break_id: Option<String>,
}

impl CdaiObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ad_break(&self, break_id: &str) -> Option<&AdBreak> {
        self.ad_breaks.get(break_id)
    }

    pub fn ad(&self, break_id: &str, ad_index: usize) -> Option<&AdNode> {
        self.ad_breaks.get(break_id)?.ads.get(ad_index)
    }

    pub fn period_ads(&self, period_id: &str) -> Option<&PeriodAds> {
        self.period_map.get(period_id)
    }

    pub fn is_period_in_ad_break(&self, period_id: &str) -> bool {
        self.period_map
            .get(period_id)
            .is_some_and(|p| p.ad_break_id.is_some())
    }

    pub fn has_ad_breaks(&self) -> bool {
        !self.ad_breaks.is_empty()
    }

    /// Track a base period so ads can be mapped onto it.
    pub fn insert_period(&mut self, period_id: &str) {
        self.period_map.entry(period_id.to_string()).or_default();
    }

    pub(crate) fn invalidate(&mut self, break_id: &str, ad_index: usize) {
        if let Some(ad) = self
            .ad_breaks
            .get_mut(break_id)
            .and_then(|b| b.ads.get_mut(ad_index))
        {
            tracing::warn!(ad_id = %ad.ad_id, "Marking ad as invalid");
            ad.invalid = true;
        }
    }

    /// Register an alternate content for the break starting at `period_id`.
    ///
    /// An empty `ad_id` or `url` only reserves the break.
    pub fn set_alternate_contents(
        &mut self,
        period_id: &str,
        ad_id: &str,
        url: &str,
        start_ms: u64,
        break_duration_ms: u64,
    ) -> AlternateContent {
        if ad_id.is_empty() || url.is_empty() {
            if !self.ad_breaks.contains_key(period_id) {
                tracing::info!(period_id, start_ms, break_duration_ms, "Ad break placeholder");
                self.ad_breaks.insert(
                    period_id.to_string(),
                    AdBreak {
                        break_duration_ms,
                        ..Default::default()
                    },
                );
                self.period_map
                    .entry(period_id.to_string())
                    .or_default()
                    .ad_break_id = Some(period_id.to_string());
            }
            return AlternateContent::Placeholder;
        }

        let rejected = || {
            AlternateContent::Rejected(CollectorEvent::AdResolved {
                ad_id: ad_id.to_string(),
                resolved: false,
                start_ms: 0,
                duration_ms: 0,
            })
        };
        let Some(ad_break) = self.ad_breaks.get(period_id) else {
            tracing::warn!(period_id, ad_id, "Ad break does not exist, rejecting the ad");
            return rejected();
        };
        if ad_break.break_duration_ms <= ad_break.ads_duration_ms {
            tracing::warn!(period_id, ad_id, "No more space left in the ad break, rejecting the ad");
            return rejected();
        }
        match Url::parse(url) {
            Ok(url) => AlternateContent::Fetch(AdRequest {
                period_id: period_id.to_string(),
                ad_id: ad_id.to_string(),
                url,
            }),
            Err(e) => {
                tracing::warn!(ad_id, error = %e, "Invalid ad url");
                rejected()
            }
        }
    }

    /// Attach a fetched ad manifest to its break. `None` means the ad could not be fetched.
    pub fn add_ad(&mut self, request: AdRequest, manifest: Option<Manifest>) -> CollectorEvent {
        let AdRequest {
            period_id,
            ad_id,
            url,
        } = request;
        let failed = |ad_id: String| CollectorEvent::AdResolved {
            ad_id,
            resolved: false,
            start_ms: 0,
            duration_ms: 0,
        };

        let Some(manifest) = manifest.filter(|m| !m.periods.is_empty()) else {
            tracing::error!(%url, "Failed to get ad manifest");
            return failed(ad_id);
        };
        let Some(ad_break) = self.ad_breaks.get_mut(&period_id) else {
            tracing::warn!(period_id, "Ad break not existing. Dropping the ad.");
            return failed(ad_id);
        };

        let mut duration_ms = (manifest.duration() * 1000.) as u64;
        let start_ms = ad_break.ads_duration_ms;
        let available = ad_break.break_duration_ms.saturating_sub(start_ms);
        if available < duration_ms {
            tracing::warn!(
                available,
                duration_ms,
                "Ad break's available space is less than the ad's duration. Trimming the ad."
            );
            duration_ms = available;
        }
        ad_break.ads_duration_ms += duration_ms;

        let mut base_period_id = None;
        if ad_break.ads.is_empty() {
            if let Some(period) = self.period_map.get_mut(&period_id) {
                period.offset_to_ad.insert(
                    0,
                    AdOnPeriod {
                        ad_index: 0,
                        ad_start_offset_ms: 0,
                    },
                );
            }
            if self.placement.is_none() {
                self.placement = Some(Placement::new(&period_id));
                base_period_id = Some(period_id.clone());
            } else {
                self.next_placement = Some(Placement::new(&period_id));
            }
        }

        tracing::info!(%ad_id, %url, duration_ms, "New ad successfully added");
        ad_break.ads.push(AdNode {
            invalid: false,
            placed: false,
            ad_id: ad_id.clone(),
            url,
            duration_ms,
            base_period_id,
            base_period_offset_ms: 0,
            manifest: Some(Arc::new(manifest)),
        });

        CollectorEvent::AdResolved {
            ad_id,
            resolved: true,
            start_ms,
            duration_ms,
        }
    }
}

/// Shared access to a [`CdaiObject`] for the embedder and the collector.
///
/// Ad manifests are fetched on a background task, the result is reported as
/// [`CollectorEvent::AdResolved`].
pub struct CdaiHandle<F, P> {
    object: Arc<Mutex<CdaiObject>>,
    fetcher: Arc<F>,
    parser: Arc<P>,
    events: mpsc::UnboundedSender<CollectorEvent>,
}

impl<F, P> Clone for CdaiHandle<F, P> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
            fetcher: self.fetcher.clone(),
            parser: self.parser.clone(),
            events: self.events.clone(),
        }
    }
}

impl<F, P> CdaiHandle<F, P>
where
    F: Fetcher,
    P: ManifestParser + Send + Sync + 'static,
{
    pub fn new(
        fetcher: Arc<F>,
        parser: Arc<P>,
        events: mpsc::UnboundedSender<CollectorEvent>,
    ) -> Self {
        Self {
            object: Arc::new(Mutex::new(CdaiObject::new())),
            fetcher,
            parser,
            events,
        }
    }

    pub fn object(&self) -> &Arc<Mutex<CdaiObject>> {
        &self.object
    }

    /// Register an ad, or a break placeholder when `ad_id` is empty.
    ///
    /// Returns the task fulfilling the ad, if one was started.
    pub async fn set_alternate_contents(
        &self,
        period_id: &str,
        ad_id: &str,
        url: &str,
        start_ms: u64,
        break_duration_ms: u64,
    ) -> Option<JoinHandle<()>> {
        let outcome = self.object.lock().await.set_alternate_contents(
            period_id,
            ad_id,
            url,
            start_ms,
            break_duration_ms,
        );

        match outcome {
            AlternateContent::Placeholder => None,
            AlternateContent::Rejected(event) => {
                let _ = self.events.send(event);
                None
            }
            AlternateContent::Fetch(request) => {
                let handle = self.clone();
                Some(tokio::spawn(async move {
                    let manifest = match handle.fetch_ad(&request.url).await {
                        Ok(manifest) => Some(manifest),
                        Err(e) => {
                            tracing::error!(ad_id = %request.ad_id, error = %e, "Ad manifest fetch failed");
                            None
                        }
                    };
                    let event = handle.object.lock().await.add_ad(request, manifest);
                    let _ = handle.events.send(event);
                }))
            }
        }
    }

    async fn fetch_ad(&self, url: &Url) -> IoriResult<Manifest> {
        let response = self.fetcher.fetch(url, None).await?;
        self.parser.parse(&response.body, &response.effective_url)
    }
}
