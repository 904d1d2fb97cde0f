//! Owned view over a parsed MPD.
//!
//! The structure mirrors the MPD hierarchy Period -> AdaptationSet -> Representation. Lookups
//! return `Option` at the first missing level so callers never walk a half-valid tree.
//!
//! All presentation times are expressed in seconds as `f64`; sample-timeline values stay in
//! timescale units.
mod addressing;
mod media;
mod parse;

use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

pub use addressing::{
    AddressingFields, BaseFields, Initialization, ListFields, MergedTemplate, SegmentAddressing,
    SegmentUrl, TemplateFields, TimelineEntry,
};
pub use media::{AudioCodec, MediaType, TRICKMODE_SCHEME};
pub use parse::{DashMpdParser, ManifestParser};

/// There exist two types of DASH presentations, indicated by MPD@type.
#[derive(Debug, Clone, PartialEq)]
pub enum Presentation {
    /// Any media segment may be presented at any time.
    Static,
    /// The MPD timeline is mapped to wall clock time. The zero point of the MPD timeline is
    /// `MPD@availabilityStartTime`.
    Dynamic {
        availability_start_time: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtcTiming {
    pub scheme_id_uri: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Location the manifest was fetched from (after redirects).
    pub url: Url,
    pub presentation: Presentation,
    pub media_presentation_duration: Option<f64>,
    pub minimum_update_period: Option<Duration>,
    pub time_shift_buffer_depth: Option<f64>,
    pub suggested_presentation_delay: Option<f64>,
    pub base_urls: Vec<String>,
    pub utc_timing: Vec<UtcTiming>,
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Period {
    pub id: String,
    /// Explicit `Period@start`.
    pub start: Option<f64>,
    /// Explicit `Period@duration`.
    pub duration: Option<f64>,
    pub base_urls: Vec<String>,
    pub addressing: AddressingFields,
    pub adaptation_sets: Vec<AdaptationSet>,
    pub event_streams: Vec<EventStream>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdaptationSet {
    pub id: Option<String>,
    pub content_type: Option<String>,
    pub mime_type: Option<String>,
    pub lang: Option<String>,
    pub codecs: Option<String>,
    pub frame_rate: Option<String>,
    pub roles: Vec<String>,
    pub essential_properties: Vec<Descriptor>,
    /// `ContentComponent@contentType` values.
    pub content_components: Vec<String>,
    pub content_protection: Vec<ProtectionDescriptor>,
    pub base_urls: Vec<String>,
    pub addressing: AddressingFields,
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Representation {
    pub id: String,
    pub bandwidth: u64,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub frame_rate: Option<String>,
    pub codecs: Option<String>,
    pub mime_type: Option<String>,
    pub base_urls: Vec<String>,
    pub addressing: AddressingFields,
    pub content_protection: Vec<ProtectionDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Descriptor {
    pub scheme_id_uri: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ProtectionDescriptor {
    pub scheme_id_uri: String,
    pub value: Option<String>,
    pub default_kid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventStream {
    pub scheme_id_uri: String,
    pub value: Option<String>,
    pub timescale: u64,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub id: Option<String>,
    pub presentation_time: u64,
    pub duration: Option<u64>,
    pub message_data: Option<String>,
}

impl Manifest {
    pub fn is_live(&self) -> bool {
        matches!(self.presentation, Presentation::Dynamic { .. })
    }

    pub fn availability_start_time(&self) -> Option<DateTime<Utc>> {
        match self.presentation {
            Presentation::Dynamic {
                availability_start_time,
            } => Some(availability_start_time),
            Presentation::Static => None,
        }
    }

    pub fn period(&self, period: usize) -> Option<&Period> {
        self.periods.get(period)
    }

    pub fn adaptation_set(&self, period: usize, adaptation_set: usize) -> Option<&AdaptationSet> {
        self.period(period)?.adaptation_sets.get(adaptation_set)
    }

    pub fn representation(
        &self,
        period: usize,
        adaptation_set: usize,
        representation: usize,
    ) -> Option<&Representation> {
        self.adaptation_set(period, adaptation_set)?
            .representations
            .get(representation)
    }

    pub fn period_index_by_id(&self, id: &str) -> Option<usize> {
        self.periods.iter().position(|p| p.id == id)
    }

    /// Start of a period in seconds on the MPD timeline.
    ///
    /// Either `Period@start`, or the end of the previous period. The first period starts at 0 when
    /// nothing is declared.
    pub fn period_start(&self, period: usize) -> f64 {
        let mut start = 0.;
        for (index, p) in self.periods.iter().enumerate().take(period + 1) {
            if let Some(explicit) = p.start {
                start = explicit;
            } else if index > 0 {
                start += self.period_duration(index - 1).unwrap_or_default();
            }
        }
        start
    }

    /// Duration of a period in seconds.
    ///
    /// `Period@duration`, otherwise the distance to the next period start, otherwise (last
    /// period) the remainder of `mediaPresentationDuration`, otherwise the length of the
    /// period's own segment timeline.
    pub fn period_duration(&self, period: usize) -> Option<f64> {
        let p = self.period(period)?;
        if let Some(duration) = p.duration {
            return Some(duration);
        }
        if let Some(next_start) = self.period(period + 1).and_then(|next| next.start) {
            return Some(next_start - self.period_start(period));
        }
        if period + 1 == self.periods.len() {
            if let Some(total) = self.media_presentation_duration {
                return Some(total - self.period_start(period));
            }
        }
        self.duration_from_representation(period)
    }

    pub fn period_end(&self, period: usize) -> Option<f64> {
        self.period_duration(period)
            .map(|duration| self.period_start(period) + duration)
    }

    /// Sum of `(r + 1) * d / timescale` over the timeline of the first representation of
    /// the period that carries one.
    pub fn duration_from_representation(&self, period: usize) -> Option<f64> {
        let p = self.period(period)?;
        p.adaptation_sets.iter().find_map(|adaptation_set| {
            let representation = adaptation_set.representations.first()?;
            match SegmentAddressing::resolve(p, adaptation_set, representation)? {
                SegmentAddressing::Timeline { template, entries } => {
                    let ticks: u64 = entries
                        .iter()
                        .map(|e| e.d * (e.r.max(0) as u64 + 1))
                        .sum();
                    Some(ticks as f64 / template.timescale as f64)
                }
                SegmentAddressing::List { list, timescale } => {
                    let ticks: u64 = list
                        .segment_urls
                        .iter()
                        .map(|u| u.duration.or(list.duration).unwrap_or_default())
                        .sum();
                    Some(ticks as f64 / timescale as f64)
                }
                _ => None,
            }
        })
    }

    /// Total duration of the presentation in seconds.
    pub fn duration(&self) -> f64 {
        if let Some(duration) = self.media_presentation_duration {
            return duration;
        }
        let sum: Option<f64> = (0..self.periods.len())
            .map(|index| self.period_duration(index))
            .sum();
        sum.unwrap_or_else(|| {
            (0..self.periods.len())
                .filter_map(|index| self.duration_from_representation(index))
                .sum()
        })
    }

    /// Index of the period covering `position` seconds, clamped to the last period.
    pub fn period_index_at(&self, position: f64) -> usize {
        let mut offset = 0.;
        for index in 0..self.periods.len() {
            let duration = self.period_duration(index).unwrap_or(f64::INFINITY);
            if position < offset + duration {
                return index;
            }
            offset += duration;
        }
        self.periods.len().saturating_sub(1)
    }

    /// Offset of the period start relative to the presentation start, as used for seeking.
    pub fn period_offset(&self, period: usize) -> f64 {
        (0..period)
            .map(|index| self.period_duration(index).unwrap_or_default())
            .sum()
    }

    /// Whether any period advertises an event stream.
    pub fn has_event_streams(&self) -> bool {
        self.periods.iter().any(|p| !p.event_streams.is_empty())
    }

    /// Base URLs from the outermost to the innermost level, excluding the manifest URL itself.
    pub(crate) fn base_url_chain<'a>(
        &'a self,
        period: &'a Period,
        adaptation_set: &'a AdaptationSet,
        representation: &'a Representation,
    ) -> [Option<&'a str>; 4] {
        [
            self.base_urls.first().map(String::as_str),
            period.base_urls.first().map(String::as_str),
            adaptation_set.base_urls.first().map(String::as_str),
            representation.base_urls.first().map(String::as_str),
        ]
    }
}

impl Period {
    /// First segment start time, in timescale units, of the first representation carrying a
    /// timeline; used to detect discontinuities at period boundaries.
    pub fn first_segment_start_time(&self) -> Option<u64> {
        self.adaptation_sets.iter().find_map(|adaptation_set| {
            let representation = adaptation_set.representations.first()?;
            match SegmentAddressing::resolve(self, adaptation_set, representation)? {
                SegmentAddressing::Timeline { entries, .. } => {
                    entries.first().map(|e| e.t.unwrap_or_default())
                }
                _ => None,
            }
        })
    }

    /// Timescale of the first representation, 1 when unknown.
    pub fn timescale(&self) -> u64 {
        self.adaptation_sets
            .iter()
            .find_map(|adaptation_set| {
                let representation = adaptation_set.representations.first()?;
                SegmentAddressing::resolve(self, adaptation_set, representation)
                    .map(|addressing| addressing.timescale())
            })
            .unwrap_or(1)
    }
}

impl AdaptationSet {
    /// Codec string of a representation, falling back to the adaptation set.
    pub fn codecs_of<'a>(&'a self, representation: &'a Representation) -> Option<&'a str> {
        representation
            .codecs
            .as_deref()
            .or(self.codecs.as_deref())
    }

    pub fn is_protected(&self) -> bool {
        !self.content_protection.is_empty()
            || self
                .representations
                .iter()
                .any(|r| !r.content_protection.is_empty())
    }
}
