use super::{FragmentIntent, Step, WalkContext};
use crate::{cursor::CursorState, sidx::SegmentIndex, util::range::ByteRange};

/// Start of subsegment `index` relative to the first one, in seconds.
pub(super) fn start_of(index: &SegmentIndex, position: usize) -> f64 {
    (0..position).filter_map(|i| index.duration(i)).sum()
}

pub(super) fn step<'a>(
    state: &CursorState,
    ctx: &WalkContext<'a>,
    index_range: ByteRange,
) -> Step<'a> {
    let Some(index) = ctx.index else {
        return Step::NeedIndex { range: index_range };
    };

    let mut state = state.clone();
    if !state.located {
        state.fragment_index = if ctx.is_reverse() {
            index.len().saturating_sub(1)
        } else {
            0
        };
        state.located = true;
    }

    let position = state.fragment_index;
    let (Some(range), Some(duration)) = (
        index.byte_range(position, index_range.offset),
        index.duration(position),
    ) else {
        return Step::EndOfPeriod;
    };

    let start = start_of(index, position);
    let fragment = FragmentIntent {
        media: None,
        range: Some(range),
        number: position as u64,
        time: index.earliest_presentation_time
            + index.references[..position]
                .iter()
                .map(|r| r.subsegment_duration as u64)
                .sum::<u64>(),
        start,
        duration,
        bitrate: None,
    };

    let mut next = state;
    if ctx.is_reverse() {
        next.fragment_time = start;
        match position.checked_sub(1) {
            Some(previous) => next.fragment_index = previous,
            None => next.eos = true,
        }
    } else {
        next.fragment_time = start + duration;
        next.fragment_index += 1;
    }
    Step::Fragment { next, fragment }
}
