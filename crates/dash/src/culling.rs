use crate::{
    manifest::{Manifest, SegmentAddressing},
    walker::DEFAULT_FRAGMENT_DURATION,
};

#[derive(Debug, Clone, PartialEq)]
struct PeriodSnapshot {
    id: String,
    duration: f64,
    first_segment_start: Option<u64>,
    timescale: u64,
}

/// Tracks how much content disappeared from the front of a live timeline between refreshes.
#[derive(Debug, Clone, Default)]
pub struct CullingTracker {
    periods: Vec<PeriodSnapshot>,
    /// First custom list entry start, in seconds.
    list_start: Option<f64>,
    /// Start of the first number-mode segment still in the window, in seconds.
    number_start: Option<f64>,
    total: f64,
}

impl CullingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds culled since the tracker was created.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Record a new manifest snapshot and return the seconds culled since the previous one.
    ///
    /// `now` is the live clock, in seconds since `availabilityStartTime`. Number-mode
    /// presentations have no explicit timeline and derive the window start from it.
    pub fn update(&mut self, manifest: &Manifest, now: Option<f64>) -> f64 {
        let culled = match first_addressing(manifest) {
            Some(SegmentAddressing::List { list, timescale }) if list.is_custom() => {
                let start = list
                    .segment_urls
                    .first()
                    .and_then(|entry| entry.start)
                    .map(|s| s as f64 / timescale as f64);
                diff(&mut self.list_start, start)
            }
            Some(SegmentAddressing::Number { template }) => {
                let start = now.map(|now| {
                    number_window_start(manifest, now, template.fragment_duration())
                });
                diff(&mut self.number_start, start)
            }
            _ => self.update_periods(manifest),
        };

        if culled > 0. {
            tracing::info!(culled, "Culled seconds");
            self.total += culled;
        }
        culled
    }

    fn update_periods(&mut self, manifest: &Manifest) -> f64 {
        let current: Vec<PeriodSnapshot> = manifest
            .periods
            .iter()
            .enumerate()
            .map(|(index, period)| PeriodSnapshot {
                id: period.id.clone(),
                duration: manifest.period_duration(index).unwrap_or_default(),
                first_segment_start: period.first_segment_start_time(),
                timescale: period.timescale(),
            })
            .collect();

        let mut culled = 0.;
        if let Some(first) = current.first() {
            for previous in &self.periods {
                if previous.id == first.id {
                    if let (Some(before), Some(after)) =
                        (previous.first_segment_start, first.first_segment_start)
                    {
                        culled += after.saturating_sub(before) as f64 / first.timescale as f64;
                    }
                    break;
                }
                tracing::info!(
                    period_id = %previous.id,
                    duration = previous.duration,
                    "Period seems to have got culled"
                );
                culled += previous.duration;
            }
        }

        self.periods = current;
        culled
    }
}

fn diff(previous: &mut Option<f64>, current: Option<f64>) -> f64 {
    let culled = match (*previous, current) {
        (Some(before), Some(after)) => (after - before).max(0.),
        _ => 0.,
    };
    if current.is_some() {
        *previous = current;
    }
    culled
}

fn first_addressing(manifest: &Manifest) -> Option<SegmentAddressing<'_>> {
    let period = manifest.periods.first()?;
    period.adaptation_sets.iter().find_map(|adaptation_set| {
        let representation = adaptation_set.representations.first()?;
        SegmentAddressing::resolve(period, adaptation_set, representation)
    })
}

/// Start of the earliest segment of the first period still inside the time shift buffer.
fn number_window_start(manifest: &Manifest, now: f64, fragment_duration: f64) -> f64 {
    let fragment_duration = if fragment_duration > 0. {
        fragment_duration
    } else {
        DEFAULT_FRAGMENT_DURATION
    };
    let period_start = manifest.period_start(0);
    let window = manifest.time_shift_buffer_depth.unwrap_or(0.);
    let elapsed = (now - window - period_start).max(0.);
    period_start + (elapsed / fragment_duration).floor() * fragment_duration
}
