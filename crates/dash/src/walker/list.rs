use super::{FragmentIntent, Step, WalkContext, START_TIME_RESET_THRESHOLD};
use crate::{
    cursor::CursorState,
    manifest::{ListFields, MediaType, SegmentUrl},
};

/// Start time of an entry in timescale units.
pub(super) fn entry_start(list: &ListFields, position: usize) -> u64 {
    match list.segment_urls.get(position).and_then(|entry| entry.start) {
        Some(start) => start,
        None => position as u64 * list.duration.unwrap_or_default(),
    }
}

pub(super) fn entry_duration(list: &ListFields, entry: &SegmentUrl) -> u64 {
    entry.duration.or(list.duration).unwrap_or_default()
}

/// First entry of a custom list that starts after `last`.
fn first_after(list: &ListFields, last: u64) -> usize {
    list.segment_urls
        .partition_point(|entry| entry.start.unwrap_or_default() <= last)
}

pub(super) fn step<'a>(
    state: &CursorState,
    ctx: &WalkContext<'a>,
    list: &'a ListFields,
    timescale: u64,
) -> Step<'a> {
    let custom = list.is_custom();
    let first_start = entry_start(list, 0);
    let mut state = state.clone();

    if !state.located {
        state.fragment_index = match state.last_segment_time {
            Some(last) if custom && !ctx.is_reverse() => first_after(list, last),
            _ if ctx.is_reverse() => list.segment_urls.len().saturating_sub(1),
            _ => 0,
        };
        state.located = true;
    }

    loop {
        let position = state.fragment_index;
        let Some(entry) = list.segment_urls.get(position) else {
            return Step::EndOfPeriod;
        };
        let time = entry_start(list, position);

        if custom && !ctx.is_reverse() {
            if let Some(last) = state.last_segment_time.filter(|&last| time <= last) {
                if ctx.media_type == MediaType::Video && last - time > START_TIME_RESET_THRESHOLD {
                    tracing::warn!(
                        last_segment_time = last,
                        start_time = time,
                        "segment list restarted, resetting high-water mark"
                    );
                    state.last_segment_time = time.checked_sub(1);
                } else {
                    state.fragment_index = first_after(list, last).max(position + 1);
                }
                continue;
            }
        }

        let duration = entry_duration(list, entry) as f64 / timescale as f64;
        let start = time.saturating_sub(first_start) as f64 / timescale as f64;
        let fragment = FragmentIntent {
            media: entry.media.as_deref(),
            range: entry.media_range,
            number: list.start_number.unwrap_or(1) + position as u64,
            time,
            start,
            duration,
            bitrate: entry.bitrate,
        };

        let mut next = state;
        next.last_segment_time = Some(time);
        next.last_segment_number = fragment.number;
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
        return Step::Fragment { next, fragment };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        manifest::SegmentAddressing,
        util::range::ByteRange,
        walker::{step, tests::walk_all},
    };

    fn plain_list() -> ListFields {
        ListFields {
            timescale: Some(1000),
            duration: Some(4000),
            segment_urls: (0..3)
                .map(|i| SegmentUrl {
                    media: Some(format!("seg-{i}.m4s")),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn custom_list(starts: &[u64]) -> ListFields {
        ListFields {
            timescale: Some(1000),
            segment_urls: starts
                .iter()
                .map(|&s| SegmentUrl {
                    media: Some(format!("live-{s}.m4s")),
                    start: Some(s),
                    duration: Some(2000),
                    bitrate: Some(if s < 4000 { 800_000 } else { 1_600_000 }),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn context(list: &ListFields, media_type: MediaType) -> WalkContext<'_> {
        WalkContext::new(
            SegmentAddressing::List {
                list,
                timescale: 1000,
            },
            media_type,
        )
    }

    #[test]
    fn test_plain_list_walk() {
        let list = plain_list();
        let ctx = context(&list, MediaType::Audio);

        let (state, fragments) = walk_all(CursorState::default(), &ctx);
        let media: Vec<&str> = fragments.iter().filter_map(|f| f.media).collect();
        assert_eq!(media, vec!["seg-0.m4s", "seg-1.m4s", "seg-2.m4s"]);
        assert_eq!(fragments[1].start, 4.);
        assert_eq!(state.fragment_time, 12.);
    }

    #[test]
    fn test_media_range_entries() {
        let mut list = plain_list();
        for (i, entry) in list.segment_urls.iter_mut().enumerate() {
            entry.media = None;
            entry.media_range = Some(ByteRange::new(i as u64 * 100, Some(100)));
        }
        let ctx = context(&list, MediaType::Audio);

        let (_, fragments) = walk_all(CursorState::default(), &ctx);
        assert!(fragments.iter().all(|f| f.media.is_none()));
        assert_eq!(fragments[2].range, Some(ByteRange::new(200, Some(100))));
    }

    #[test]
    fn test_custom_list_resumes_after_high_water_mark() {
        let list = custom_list(&[0, 2000, 4000, 6000, 8000]);
        let ctx = context(&list, MediaType::Video);
        let state = CursorState {
            last_segment_time: Some(4000),
            ..Default::default()
        };

        let (_, fragments) = walk_all(state, &ctx);
        let times: Vec<u64> = fragments.iter().map(|f| f.time).collect();
        assert_eq!(times, vec![6000, 8000]);
        assert_eq!(fragments[0].bitrate, Some(1_600_000));
    }

    #[test]
    fn test_custom_list_skips_delivered_entries() {
        let list = custom_list(&[0, 2000, 4000]);
        let ctx = context(&list, MediaType::Audio);
        let state = CursorState {
            located: true,
            fragment_index: 0,
            last_segment_time: Some(2000),
            ..Default::default()
        };
        match step(&state, &ctx) {
            Step::Fragment { fragment, next } => {
                assert_eq!(fragment.time, 4000);
                assert_eq!(next.fragment_index, 3);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_custom_list_reverse() {
        let list = custom_list(&[0, 2000, 4000]);
        let ctx = WalkContext {
            rate: -4.,
            ..context(&list, MediaType::Video)
        };
        let (state, fragments) = walk_all(CursorState::default(), &ctx);
        let times: Vec<u64> = fragments.iter().map(|f| f.time).collect();
        assert_eq!(times, vec![4000, 2000, 0]);
        assert!(state.eos);
    }
}
