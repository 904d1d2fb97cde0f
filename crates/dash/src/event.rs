use serde::Serialize;

use crate::{error::ErrorKind, manifest::MediaType};

/// Notifications sent to the embedder while a presentation is collected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectorEvent {
    AdReservationStart {
        break_id: String,
        /// Position inside the break, in milliseconds.
        position_ms: u64,
    },
    AdReservationEnd {
        break_id: String,
        position_ms: u64,
    },
    AdPlacementStart {
        ad_id: String,
        position_ms: u64,
        duration_ms: u64,
    },
    AdPlacementEnd {
        ad_id: String,
        position_ms: u64,
        duration_ms: u64,
    },
    AdPlacementError {
        ad_id: String,
        position_ms: u64,
        duration_ms: u64,
    },
    /// Outcome of an alternate content request.
    AdResolved {
        ad_id: String,
        resolved: bool,
        start_ms: u64,
        duration_ms: u64,
    },
    TimedMetadata {
        scheme: String,
        id: String,
        start_ms: u64,
        duration_ms: u64,
        payload: Option<String>,
    },
    Discontinuity {
        media_type: MediaType,
    },
    /// The playable window changed after a manifest update.
    DurationChanged {
        duration: f64,
        culled_seconds: f64,
    },
    TracksChanged {
        audio_languages: Vec<String>,
        text_languages: Vec<String>,
    },
    SupportedSpeedsChanged {
        speeds: Vec<f64>,
    },
    ProfileChanged {
        bandwidth: u64,
        width: Option<u64>,
        height: Option<u64>,
    },
    EndTimeReached,
    EndOfStream,
    Error {
        kind: ErrorKind,
        message: String,
    },
}
