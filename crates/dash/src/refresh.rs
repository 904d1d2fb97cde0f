use std::time::Duration;

use crate::{config::DashConfig, manifest::Manifest};

/// Base interval between live manifest updates.
///
/// `minimumUpdatePeriod` when declared, the configured default otherwise. Event streams carry
/// ad signalling, so their presence caps the interval at the default.
pub fn minimum_update_interval(manifest: &Manifest, config: &DashConfig) -> Duration {
    let default = config.default_update_interval();
    let declared = manifest.minimum_update_period.unwrap_or(default);
    if manifest.has_event_streams() {
        declared.min(default)
    } else {
        declared
    }
}

/// Delay before the next manifest update once the fetcher has nothing left to download.
///
/// `buffered` is the playable content ahead of the play position and `since_last` the time
/// already spent since the previous update.
pub fn refresh_delay(
    min_update: Duration,
    buffered: Duration,
    since_last: Duration,
    config: &DashConfig,
) -> Duration {
    let floor = config.min_refresh_interval();
    let ceiling = config.max_refresh_interval();

    let delay = if buffered > min_update * 2 {
        min_update.mul_f64(1.5)
    } else if buffered > min_update {
        min_update / 2
    } else if buffered > ceiling * 2 {
        ceiling
    } else if buffered.is_zero() {
        floor
    } else {
        tracing::debug!(
            buffered_milliseconds = buffered.as_millis() as u64,
            "Buffer is running low, refreshing manifest soon"
        );
        buffered / 3
    };

    delay.min(ceiling).saturating_sub(since_last).max(floor)
}
