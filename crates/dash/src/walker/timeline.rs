use super::{retry_after, FragmentIntent, Step, WalkContext, START_TIME_RESET_THRESHOLD};
use crate::{
    cursor::CursorState,
    manifest::{MediaType, MergedTemplate, TimelineEntry},
};

/// Start time of every entry. Entries without `t` follow their predecessor.
pub(super) fn entry_starts(entries: &[TimelineEntry]) -> Vec<u64> {
    let mut next = 0;
    entries
        .iter()
        .map(|entry| {
            let start = entry.t.unwrap_or(next);
            next = start + entry.span();
            start
        })
        .collect()
}

/// Place the cursor on the first fragment whose range ends after `target`.
pub(super) fn locate(
    state: &mut CursorState,
    template: &MergedTemplate,
    entries: &[TimelineEntry],
    starts: &[u64],
    target: u64,
) {
    let mut number = template.start_number;
    for (index, (entry, &start)) in entries.iter().zip(starts).enumerate() {
        if target < start + entry.span() {
            let repeat = if target > start && entry.d > 0 {
                ((target - start) / entry.d).min(entry.repeat())
            } else {
                0
            };
            state.timeline_index = index;
            state.repeat = repeat;
            state.number = number + repeat;
            state.located = true;
            return;
        }
        number += entry.repeat() + 1;
    }

    // target lies behind the timeline: park on the last fragment
    let last = entries.len().saturating_sub(1);
    let repeat = entries.last().map(TimelineEntry::repeat).unwrap_or_default();
    state.timeline_index = last;
    state.repeat = repeat;
    state.number = number.saturating_sub(1);
    state.located = true;
}

pub(super) fn fragment_at(
    state: &CursorState,
    entries: &[TimelineEntry],
    starts: &[u64],
) -> Option<(u64, u64)> {
    let entry = entries.get(state.timeline_index)?;
    Some((starts[state.timeline_index] + state.repeat * entry.d, entry.d))
}

pub(super) fn advance(state: &mut CursorState, entries: &[TimelineEntry]) {
    state.number += 1;
    state.repeat += 1;
    if entries
        .get(state.timeline_index)
        .is_none_or(|entry| state.repeat > entry.repeat())
    {
        state.repeat = 0;
        state.timeline_index += 1;
    }
}

/// Returns `false` when the cursor already sits on the first fragment.
pub(super) fn retreat(state: &mut CursorState, entries: &[TimelineEntry]) -> bool {
    if state.repeat > 0 {
        state.repeat -= 1;
    } else if state.timeline_index > 0 {
        state.timeline_index -= 1;
        state.repeat = entries[state.timeline_index].repeat();
    } else {
        return false;
    }
    state.number = state.number.saturating_sub(1);
    true
}

pub(super) fn seconds(template: &MergedTemplate, ticks: u64) -> f64 {
    ticks.saturating_sub(template.presentation_time_offset) as f64 / template.timescale as f64
}

pub(super) fn step<'a>(
    state: &CursorState,
    ctx: &WalkContext<'a>,
    template: &MergedTemplate<'a>,
    entries: &'a [TimelineEntry],
) -> Step<'a> {
    let starts = entry_starts(entries);
    let mut state = state.clone();

    if !state.located {
        let target = state
            .last_segment_time
            .unwrap_or(template.presentation_time_offset);
        locate(&mut state, template, entries, &starts, target);
        tracing::trace!(
            media_type = %ctx.media_type,
            target,
            timeline_index = state.timeline_index,
            repeat = state.repeat,
            "located timeline position"
        );
    }

    loop {
        let Some((time, d)) = fragment_at(&state, entries, &starts) else {
            return out_of_entries(ctx, template, entries);
        };

        let fresh = state.last_segment_time.is_none_or(|last| time > last);
        if fresh || ctx.is_reverse() {
            let duration = d as f64 / template.timescale as f64;
            let start = seconds(template, time);
            let fragment = FragmentIntent {
                media: template.media,
                range: None,
                number: state.number,
                time,
                start,
                duration,
                bitrate: None,
            };

            let mut next = state;
            next.last_segment_time = Some(time);
            next.last_segment_number = fragment.number;
            if ctx.is_reverse() {
                next.fragment_time = start;
                if !retreat(&mut next, entries) {
                    next.eos = true;
                }
            } else {
                next.fragment_time = start + duration;
                advance(&mut next, entries);
            }
            return Step::Fragment { next, fragment };
        }

        let last = state.last_segment_time.unwrap_or_default();
        if ctx.media_type == MediaType::Video && last - time > START_TIME_RESET_THRESHOLD {
            tracing::warn!(
                last_segment_time = last,
                start_time = time,
                "timeline restarted, resetting high-water mark"
            );
            state.last_segment_time = time.checked_sub(1);
            continue;
        }

        // already delivered
        advance(&mut state, entries);
    }
}

fn out_of_entries<'a>(
    ctx: &WalkContext<'a>,
    template: &MergedTemplate<'a>,
    entries: &[TimelineEntry],
) -> Step<'a> {
    if ctx.live.is_some() && ctx.is_last_period && !ctx.is_reverse() {
        let duration = entries
            .last()
            .map(|entry| entry.d as f64 / template.timescale as f64)
            .unwrap_or(super::DEFAULT_FRAGMENT_DURATION);
        return Step::NotYetAvailable {
            retry_after: retry_after(duration),
        };
    }
    Step::EndOfPeriod
}
