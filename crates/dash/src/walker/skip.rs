use super::{indexed, list, number, timeline, WalkContext};
use crate::{
    cursor::CursorState,
    manifest::{ListFields, MediaType, MergedTemplate, SegmentAddressing, TimelineEntry},
    sidx::SegmentIndex,
};

/// Alignment hints taken from the video track of the same period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SkipBias {
    /// Presentation time of the first video fragment in seconds, once resolved.
    pub video_first_pts: Option<f64>,
    /// `s` of the first video entry of a custom segment list.
    pub video_list_start: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub state: CursorState,
    /// Part of the offset smaller than one fragment, in seconds.
    pub residual: f64,
    /// Presentation time of the fragment a video track landed on.
    pub first_pts: Option<f64>,
}

/// Move the cursor by whole fragments until less than one fragment of `offset` remains.
///
/// A cursor that was never located starts from the first fragment of the period, so an offset
/// of 0 always lands there.
pub fn skip_to_offset(
    state: &CursorState,
    ctx: &WalkContext,
    offset: f64,
    bias: SkipBias,
) -> Skipped {
    let mut state = state.clone();
    state.eos = false;
    let (residual, first_pts) = match ctx.addressing {
        SegmentAddressing::Timeline { template, entries } => {
            skip_timeline(&mut state, ctx, &template, entries, offset, bias)
        }
        SegmentAddressing::Number { template } => {
            (skip_number(&mut state, ctx, &template, offset), None)
        }
        SegmentAddressing::List { list, timescale } => {
            (skip_list(&mut state, ctx, list, timescale, offset, bias), None)
        }
        SegmentAddressing::Indexed { .. } => match ctx.index {
            Some(index) => (skip_indexed(&mut state, index, offset), None),
            // nothing to skip over until the index has been loaded
            None => (offset, None),
        },
    };

    tracing::debug!(
        media_type = %ctx.media_type,
        offset,
        residual,
        fragment_time = state.fragment_time,
        "skipped fragments"
    );
    Skipped {
        state,
        residual,
        first_pts,
    }
}

fn skip_timeline(
    state: &mut CursorState,
    ctx: &WalkContext,
    template: &MergedTemplate,
    entries: &[TimelineEntry],
    mut skip: f64,
    bias: SkipBias,
) -> (f64, Option<f64>) {
    let starts = timeline::entry_starts(entries);
    let timescale = template.timescale as f64;
    if !state.located {
        state.timeline_index = 0;
        state.repeat = 0;
        state.number = template.start_number;
        state.located = true;
    }

    let mut first_pts = None;
    loop {
        let Some((time, d)) = timeline::fragment_at(state, entries, &starts) else {
            state.eos = true;
            break;
        };
        let duration = d as f64 / timescale;

        // Stop audio on the fragment that ends about one fragment after the video start.
        let mut skip_allowed = true;
        if ctx.media_type == MediaType::Audio {
            if let Some(video_pts) = bias.video_first_pts {
                let next_pts = (time + d) as f64 / timescale;
                let diff = next_pts - video_pts;
                if diff > 0. && diff >= duration / 2. && diff <= duration * 1.5 {
                    skip_allowed = false;
                }
            }
        }

        if skip >= duration && skip_allowed {
            skip -= duration;
            timeline::advance(state, entries);
        } else if -skip >= duration && timeline::retreat(state, entries) {
            skip += duration;
        } else {
            if ctx.media_type == MediaType::Video {
                first_pts = Some(time as f64 / timescale);
            }
            state.fragment_time = timeline::seconds(template, time);
            state.last_segment_time = time.checked_sub(1);
            break;
        }
    }
    (skip, first_pts)
}

fn skip_number(
    state: &mut CursorState,
    ctx: &WalkContext,
    template: &MergedTemplate,
    skip: f64,
) -> f64 {
    if !state.located {
        number::place(state, ctx, template, 0);
    }
    let duration = number::fragment_duration(template);
    let steps = (skip.abs() / duration).floor();

    let moved = if skip >= 0. {
        state.number += steps as u64;
        state.number_time += steps * duration;
        steps
    } else {
        let available = state.number.saturating_sub(template.start_number) as f64;
        let steps = steps.min(available);
        state.number -= steps as u64;
        state.number_time -= steps * duration;
        -steps
    };
    state.fragment_time = state.number_time - ctx.period_start;
    skip - moved * duration
}

fn skip_list(
    state: &mut CursorState,
    ctx: &WalkContext,
    list: &ListFields,
    timescale: u64,
    mut skip: f64,
    bias: SkipBias,
) -> f64 {
    let timescale = timescale as f64;
    if !state.located {
        state.fragment_index = 0;
        state.located = true;
    }

    let first_start = list::entry_start(list, 0);
    if list.is_custom() && ctx.media_type == MediaType::Audio {
        if let Some(video_start) = bias.video_list_start.filter(|&v| first_start > v) {
            skip -= (first_start - video_start) as f64 / timescale;
        }
    }

    loop {
        let Some(entry) = list.segment_urls.get(state.fragment_index) else {
            state.eos = true;
            break;
        };
        let duration = list::entry_duration(list, entry) as f64 / timescale;
        if duration <= 0. {
            break;
        }
        if skip >= duration {
            skip -= duration;
            state.fragment_index += 1;
        } else if -skip >= duration && state.fragment_index > 0 {
            skip += duration;
            state.fragment_index -= 1;
        } else {
            break;
        }
    }

    let time = list::entry_start(list, state.fragment_index);
    state.fragment_time = time.saturating_sub(first_start) as f64 / timescale;
    state.last_segment_time = time.checked_sub(1);
    skip
}

fn skip_indexed(state: &mut CursorState, index: &SegmentIndex, mut skip: f64) -> f64 {
    if !state.located {
        state.fragment_index = 0;
        state.located = true;
    }
    loop {
        let Some(duration) = index.duration(state.fragment_index) else {
            state.eos = true;
            break;
        };
        if skip >= duration && duration > 0. {
            skip -= duration;
            state.fragment_index += 1;
        } else if -skip >= duration && state.fragment_index > 0 {
            skip += duration;
            state.fragment_index -= 1;
        } else {
            break;
        }
    }
    state.fragment_time = indexed::start_of(index, state.fragment_index);
    skip
}

/// Place the cursor on the last fragment of the period, for reverse playback from its end.
pub fn skip_to_end(state: &CursorState, ctx: &WalkContext) -> CursorState {
    let mut state = state.clone();
    state.eos = false;
    match ctx.addressing {
        SegmentAddressing::Timeline { template, entries } => {
            let total: u64 = entries.iter().map(|e| e.repeat() + 1).sum();
            state.timeline_index = entries.len().saturating_sub(1);
            state.repeat = entries.last().map(TimelineEntry::repeat).unwrap_or_default();
            state.number = template.start_number + total.saturating_sub(1);
            let starts = timeline::entry_starts(entries);
            if let Some((time, _)) = timeline::fragment_at(&state, entries, &starts) {
                state.fragment_time = timeline::seconds(&template, time);
            }
        }
        SegmentAddressing::Number { template } => {
            let count = number::fragment_count(ctx, &template).unwrap_or(1);
            number::place(&mut state, ctx, &template, count.saturating_sub(1));
            state.fragment_time = state.number_time - ctx.period_start;
        }
        SegmentAddressing::List { list, timescale } => {
            state.fragment_index = list.segment_urls.len().saturating_sub(1);
            let time = list::entry_start(list, state.fragment_index);
            state.fragment_time =
                time.saturating_sub(list::entry_start(list, 0)) as f64 / timescale as f64;
        }
        SegmentAddressing::Indexed { .. } => {
            if let Some(index) = ctx.index {
                state.fragment_index = index.len().saturating_sub(1);
                state.fragment_time = indexed::start_of(index, state.fragment_index);
            }
        }
    }
    state.located = true;
    state
}
