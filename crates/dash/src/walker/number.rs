use super::{retry_after, FragmentIntent, Step, WalkContext, DEFAULT_FRAGMENT_DURATION};
use crate::{cursor::CursorState, manifest::MergedTemplate};

// Fragment boundaries are compared in floating point seconds.
const EPSILON: f64 = 1e-6;

pub(super) fn fragment_duration(template: &MergedTemplate) -> f64 {
    let duration = template.fragment_duration();
    if duration > 0. {
        duration
    } else {
        DEFAULT_FRAGMENT_DURATION
    }
}

/// Number of fragments in a bounded period.
pub(super) fn fragment_count(ctx: &WalkContext, template: &MergedTemplate) -> Option<u64> {
    let duration = ctx.period_duration()?;
    Some(((duration / fragment_duration(template)) - EPSILON).ceil().max(1.) as u64)
}

/// Place the cursor on fragment `offset` of the period.
pub(super) fn place(
    state: &mut CursorState,
    ctx: &WalkContext,
    template: &MergedTemplate,
    offset: u64,
) {
    state.number = template.start_number + offset;
    state.number_time = ctx.period_start + offset as f64 * fragment_duration(template);
    state.located = true;
}

fn locate(state: &mut CursorState, ctx: &WalkContext, template: &MergedTemplate) {
    let offset = match ctx.live {
        Some(live) => {
            let since_start = live.live_point() - ctx.period_start;
            (since_start / fragment_duration(template)).floor().max(0.) as u64
        }
        None if ctx.is_reverse() => fragment_count(ctx, template)
            .unwrap_or(1)
            .saturating_sub(1),
        None => 0,
    };
    place(state, ctx, template, offset);
    tracing::debug!(
        media_type = %ctx.media_type,
        number = state.number,
        number_time = state.number_time,
        "located number position"
    );
}

pub(super) fn step<'a>(
    state: &CursorState,
    ctx: &WalkContext<'a>,
    template: &MergedTemplate<'a>,
) -> Step<'a> {
    let mut state = state.clone();
    if !state.located {
        locate(&mut state, ctx, template);
    }

    let duration = fragment_duration(template);
    if ctx
        .period_end
        .is_some_and(|end| state.number_time >= end - EPSILON)
    {
        return Step::EndOfPeriod;
    }
    if state.number_time < ctx.period_start - EPSILON {
        return Step::EndOfPeriod;
    }
    if let Some(live) = ctx.live {
        let available_at = state.number_time + duration;
        if available_at > live.now {
            return Step::NotYetAvailable {
                retry_after: retry_after(available_at - live.now),
            };
        }
    }

    let offset = state.number.saturating_sub(template.start_number);
    let fragment = FragmentIntent {
        media: template.media,
        range: None,
        number: state.number,
        time: (offset as f64 * template.duration) as u64 + template.presentation_time_offset,
        start: state.number_time - ctx.period_start,
        duration,
        bitrate: None,
    };

    let mut next = state;
    next.last_segment_number = fragment.number;
    if ctx.is_reverse() {
        next.fragment_time = fragment.start;
        if next.number <= template.start_number {
            next.eos = true;
        } else {
            next.number -= 1;
            next.number_time -= duration;
        }
    } else {
        next.fragment_time = fragment.start + duration;
        next.number += 1;
        next.number_time += duration;
    }
    Step::Fragment { next, fragment }
}
