use url::Url;

use crate::{manifest::MediaType, sidx::SegmentIndex, template::FragmentDescriptor};

/// Walk position of one track inside the active period.
///
/// Values of this type are never mutated in place by the walker: a step returns the state to
/// commit once the fragment it produced has been fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorState {
    /// Whether the position has been resolved against the current segment addressing. Cleared
    /// on a fresh tune and after a live refresh so the walker relocates from the high-water mark.
    pub located: bool,
    /// Entry of the segment timeline.
    pub timeline_index: usize,
    /// Position inside the repeat run of the current timeline entry.
    pub repeat: u64,
    /// Position inside a segment list or segment index.
    pub fragment_index: usize,
    pub number: u64,
    /// Number mode fragment start in seconds on the MPD timeline.
    pub number_time: f64,
    /// Start time of the last fragment handed out, in timescale units.
    pub last_segment_time: Option<u64>,
    pub last_segment_number: u64,
    /// Track-local playback position in seconds relative to the period start.
    pub fragment_time: f64,
    pub eos: bool,
}

impl CursorState {
    /// Keep the high-water marks but force the walker to relocate against a refreshed timeline.
    pub fn relocate(&mut self) {
        self.located = false;
        self.eos = false;
    }
}

/// Scheduling state of one active track.
#[derive(Debug, Clone)]
pub struct TrackCursor {
    pub media_type: MediaType,
    pub enabled: bool,
    pub adaptation_set_index: usize,
    /// Identity of the selected adaptation set, used to detect reshuffles across refreshes.
    pub adaptation_set_id: Option<String>,
    pub representation_index: usize,
    /// Set when the representation changed and the init fragment has to be pushed again.
    pub profile_changed: bool,
    pub descriptor: FragmentDescriptor,
    pub state: CursorState,
    /// Segment index of the current representation, loaded on demand.
    pub index: Option<SegmentIndex>,
    /// Last init fragment handed to the sink.
    pub last_init_url: Option<Url>,
    pub fail_count: u32,
    pub rampdown_count: u32,
    pub end_time_reached: bool,
}

impl TrackCursor {
    pub fn new(media_type: MediaType, manifest_url: Url) -> Self {
        Self {
            media_type,
            enabled: false,
            adaptation_set_index: 0,
            adaptation_set_id: None,
            representation_index: 0,
            profile_changed: true,
            descriptor: FragmentDescriptor::new(manifest_url),
            state: CursorState::default(),
            index: None,
            last_init_url: None,
            fail_count: 0,
            rampdown_count: 0,
            end_time_reached: false,
        }
    }

    /// Start over in a new period or representation.
    pub fn reset(&mut self) {
        self.state = CursorState::default();
        self.index = None;
        self.last_init_url = None;
        self.end_time_reached = false;
    }

    /// Switch to another representation of the same adaptation set, keeping the position.
    pub fn change_representation(&mut self, representation_index: usize) {
        if self.representation_index != representation_index {
            self.representation_index = representation_index;
            self.profile_changed = true;
            self.index = None;
        }
    }

    pub fn commit(&mut self, next: CursorState) {
        self.state = next;
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.state.eos && !self.end_time_reached
    }
}
