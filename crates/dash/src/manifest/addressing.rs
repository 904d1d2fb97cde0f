use super::{AdaptationSet, Period, Representation};
use crate::util::range::ByteRange;

/// Segment addressing elements declared on one level of the MPD hierarchy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressingFields {
    pub template: Option<TemplateFields>,
    pub list: Option<ListFields>,
    pub base: Option<BaseFields>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateFields {
    pub media: Option<String>,
    pub initialization: Option<String>,
    pub timescale: Option<u64>,
    /// Fragment duration in timescale units.
    pub duration: Option<f64>,
    pub start_number: Option<u64>,
    pub presentation_time_offset: Option<u64>,
    pub timeline: Option<Vec<TimelineEntry>>,
}

/// One `S` element of a `SegmentTimeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    pub t: Option<u64>,
    pub d: u64,
    /// Negative values (open-ended repeat) are treated as 0.
    pub r: i64,
}

impl TimelineEntry {
    pub fn new(t: Option<u64>, d: u64, r: i64) -> Self {
        Self { t, d, r }
    }

    pub fn repeat(&self) -> u64 {
        self.r.max(0) as u64
    }

    /// Duration covered by this entry including its repeats.
    pub fn span(&self) -> u64 {
        self.d * (self.repeat() + 1)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Initialization {
    pub source_url: Option<String>,
    pub range: Option<ByteRange>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseFields {
    pub timescale: Option<u64>,
    pub presentation_time_offset: Option<u64>,
    pub index_range: Option<ByteRange>,
    pub initialization: Option<Initialization>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFields {
    pub timescale: Option<u64>,
    pub duration: Option<u64>,
    pub start_number: Option<u64>,
    pub initialization: Option<Initialization>,
    pub segment_urls: Vec<SegmentUrl>,
}

impl ListFields {
    /// A custom list carries absolute start times on its entries. These lists are produced when
    /// a live recording is converted into an on-demand asset.
    pub fn is_custom(&self) -> bool {
        self.segment_urls
            .first()
            .is_some_and(|entry| entry.start.is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentUrl {
    pub media: Option<String>,
    pub media_range: Option<ByteRange>,
    /// Custom list `s` attribute.
    pub start: Option<u64>,
    /// Custom list `d` attribute.
    pub duration: Option<u64>,
    /// Custom list `bitrate` attribute.
    pub bitrate: Option<u64>,
}

/// `SegmentTemplate` attributes merged across levels, innermost first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergedTemplate<'a> {
    pub media: Option<&'a str>,
    pub initialization: Option<&'a str>,
    pub timescale: u64,
    /// Fragment duration in timescale units, 0 when not declared.
    pub duration: f64,
    pub start_number: u64,
    pub presentation_time_offset: u64,
}

impl<'a> MergedTemplate<'a> {
    /// Merge `layers` where earlier layers override later ones per attribute.
    ///
    /// A timescale of 0 or 1 counts as unset and is looked up on the next layer.
    pub fn merge(layers: &[Option<&'a TemplateFields>]) -> Option<Self> {
        let layers: Vec<&TemplateFields> = layers.iter().flatten().copied().collect();
        if layers.is_empty() {
            return None;
        }

        let timescale = layers
            .iter()
            .filter_map(|l| l.timescale)
            .find(|&timescale| timescale > 1)
            .unwrap_or(1);

        Some(Self {
            media: layers.iter().find_map(|l| l.media.as_deref()),
            initialization: layers.iter().find_map(|l| l.initialization.as_deref()),
            timescale,
            duration: layers.iter().find_map(|l| l.duration).unwrap_or_default(),
            start_number: layers.iter().find_map(|l| l.start_number).unwrap_or(1),
            presentation_time_offset: layers
                .iter()
                .find_map(|l| l.presentation_time_offset)
                .unwrap_or_default(),
        })
    }

    /// Fragment duration in seconds.
    pub fn fragment_duration(&self) -> f64 {
        self.duration / self.timescale as f64
    }
}

/// The addressing mode a representation is walked with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentAddressing<'a> {
    Timeline {
        template: MergedTemplate<'a>,
        entries: &'a [TimelineEntry],
    },
    Number {
        template: MergedTemplate<'a>,
    },
    Indexed {
        index_range: ByteRange,
        initialization: Option<&'a Initialization>,
        timescale: u64,
        presentation_time_offset: u64,
    },
    List {
        list: &'a ListFields,
        timescale: u64,
    },
}

impl<'a> SegmentAddressing<'a> {
    /// Picks the addressing mode of `representation`.
    ///
    /// `SegmentTemplate` takes precedence over `SegmentBase`, which takes precedence over
    /// `SegmentList`. Returns `None` when the representation can not be addressed.
    pub fn resolve(
        period: &'a Period,
        adaptation_set: &'a AdaptationSet,
        representation: &'a Representation,
    ) -> Option<Self> {
        let levels = [
            &representation.addressing,
            &adaptation_set.addressing,
            &period.addressing,
        ];

        let templates = levels.map(|l| l.template.as_ref());
        if let Some(template) = MergedTemplate::merge(&templates) {
            let timeline = templates
                .iter()
                .flatten()
                .find_map(|t| t.timeline.as_deref())
                .filter(|entries| !entries.is_empty());
            if let Some(entries) = timeline {
                return Some(Self::Timeline { template, entries });
            }
            if template.media.is_some() {
                return Some(Self::Number { template });
            }
        }

        if let Some(base) = levels.iter().find_map(|l| l.base.as_ref()) {
            if let Some(index_range) = base.index_range {
                return Some(Self::Indexed {
                    index_range,
                    initialization: base.initialization.as_ref(),
                    timescale: base.timescale.filter(|&t| t > 0).unwrap_or(1),
                    presentation_time_offset: base.presentation_time_offset.unwrap_or_default(),
                });
            }
        }

        levels
            .iter()
            .find_map(|l| l.list.as_ref())
            .map(|list| Self::List {
                list,
                timescale: list.timescale.filter(|&t| t > 0).unwrap_or(1),
            })
    }

    pub fn timescale(&self) -> u64 {
        match self {
            Self::Timeline { template, .. } | Self::Number { template } => template.timescale,
            Self::Indexed { timescale, .. } | Self::List { timescale, .. } => *timescale,
        }
    }

    /// Pattern or location of the initialization fragment.
    pub fn initialization(&self) -> Option<(Option<&'a str>, Option<ByteRange>)> {
        match self {
            Self::Timeline { template, .. } | Self::Number { template } => {
                template.initialization.map(|pattern| (Some(pattern), None))
            }
            Self::Indexed { initialization, .. } => {
                initialization.map(|init| (init.source_url.as_deref(), init.range))
            }
            Self::List { list, .. } => list
                .initialization
                .as_ref()
                .map(|init| (init.source_url.as_deref(), init.range)),
        }
    }

    pub fn media(&self) -> Option<&'a str> {
        match self {
            Self::Timeline { template, .. } | Self::Number { template } => template.media,
            _ => None,
        }
    }

    pub fn presentation_time_offset(&self) -> u64 {
        match self {
            Self::Timeline { template, .. } | Self::Number { template } => {
                template.presentation_time_offset
            }
            Self::Indexed {
                presentation_time_offset,
                ..
            } => *presentation_time_offset,
            Self::List { .. } => 0,
        }
    }
}
