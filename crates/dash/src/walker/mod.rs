//! Fragment-by-fragment walk over the segment addressing of one representation.
//!
//! [`step`] is a pure function of the cursor and the addressing view: it never touches the
//! network. Whatever it needs from outside (a segment index, the wall clock) is passed in
//! through [`WalkContext`], and the state it returns is only committed by the caller once the
//! fragment has been fetched successfully.
mod indexed;
mod list;
mod number;
mod skip;
mod timeline;

use std::time::Duration;

pub use skip::{skip_to_end, skip_to_offset, SkipBias, Skipped};

use crate::{
    cursor::CursorState,
    manifest::{MediaType, SegmentAddressing},
    sidx::SegmentIndex,
    util::range::ByteRange,
};

/// Fragment duration assumed when a template declares none.
pub const DEFAULT_FRAGMENT_DURATION: f64 = 2.;

/// A video high-water mark this far ahead of the timeline means the timeline was restarted.
pub const START_TIME_RESET_THRESHOLD: u64 = 4_000_000_000;

/// Live clock as seen by the walker, in seconds on the MPD timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveEdge {
    pub now: f64,
    /// Distance from the edge playback starts at.
    pub offset: f64,
}

impl LiveEdge {
    pub fn live_point(&self) -> f64 {
        self.now - self.offset
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WalkContext<'a> {
    pub addressing: SegmentAddressing<'a>,
    pub media_type: MediaType,
    pub rate: f64,
    /// Period start in seconds on the MPD timeline.
    pub period_start: f64,
    pub period_end: Option<f64>,
    /// `None` for static presentations.
    pub live: Option<LiveEdge>,
    /// Live timelines that run out of entries in the last period wait for a refresh.
    pub is_last_period: bool,
    pub index: Option<&'a SegmentIndex>,
}

impl<'a> WalkContext<'a> {
    pub fn new(addressing: SegmentAddressing<'a>, media_type: MediaType) -> Self {
        Self {
            addressing,
            media_type,
            rate: 1.,
            period_start: 0.,
            period_end: None,
            live: None,
            is_last_period: true,
            index: None,
        }
    }

    pub fn is_reverse(&self) -> bool {
        self.rate < 0.
    }

    pub(crate) fn period_duration(&self) -> Option<f64> {
        self.period_end.map(|end| end - self.period_start)
    }
}

/// What to fetch for the fragment at the cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentIntent<'a> {
    /// Media pattern or segment URL. `None` addresses the base URL itself.
    pub media: Option<&'a str>,
    pub range: Option<ByteRange>,
    pub number: u64,
    /// Value of `$Time$`, in timescale units.
    pub time: u64,
    /// Start relative to the period start, in seconds.
    pub start: f64,
    pub duration: f64,
    /// Bitrate a custom segment list asks for.
    pub bitrate: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step<'a> {
    Fragment {
        next: CursorState,
        fragment: FragmentIntent<'a>,
    },
    /// The segment index has to be fetched before the walk can continue.
    NeedIndex { range: ByteRange },
    /// The next fragment is not published yet.
    NotYetAvailable { retry_after: Duration },
    EndOfPeriod,
}

/// Compute the next fragment of the track at `state`.
pub fn step<'a>(state: &CursorState, ctx: &WalkContext<'a>) -> Step<'a> {
    if state.eos {
        return Step::EndOfPeriod;
    }
    match ctx.addressing {
        SegmentAddressing::Timeline { template, entries } => {
            timeline::step(state, ctx, &template, entries)
        }
        SegmentAddressing::Number { template } => number::step(state, ctx, &template),
        SegmentAddressing::Indexed { index_range, .. } => indexed::step(state, ctx, index_range),
        SegmentAddressing::List { list, timescale } => list::step(state, ctx, list, timescale),
    }
}

pub(crate) fn retry_after(seconds: f64) -> Duration {
    Duration::from_secs_f64(seconds.clamp(0.1, 10.))
}
