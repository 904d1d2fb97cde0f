use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::DATE;

use crate::{fetch::Fetcher, manifest::UtcTiming, IoriError, IoriResult};

const HTTP_XSDATE: &str = "urn:mpeg:dash:utc:http-xsdate:2014";
const HTTP_ISO: &str = "urn:mpeg:dash:utc:http-iso:2014";
const HTTP_HEAD: &str = "urn:mpeg:dash:utc:http-head:2014";
const DIRECT: &str = "urn:mpeg:dash:utc:direct:2014";
const HTTP_NTP: &str = "urn:mpeg:dash:utc:http-ntp:2014";
const NTP: &str = "urn:mpeg:dash:utc:ntp:2014";

/// Wall clock aligned with the packager's clock through `UTCTiming`.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    /// How much time the local clock is behind the remote clock
    offset: TimeDelta,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }

    pub fn offset(&self) -> TimeDelta {
        self.offset
    }

    /// Seconds elapsed on the synced clock since `origin`.
    pub fn seconds_since(&self, origin: DateTime<Utc>) -> f64 {
        (self.now() - origin).num_milliseconds() as f64 / 1000.
    }

    fn set_time(
        &mut self,
        remote_now: DateTime<Utc>,
        before_request: DateTime<Utc>,
        after_request: DateTime<Utc>,
    ) {
        // The remote clock was read half way through the round trip.
        let rtt = after_request - before_request;
        let server_now = remote_now + rtt / 2;
        self.offset = server_now - after_request;
        tracing::info!(
            offset_milliseconds = %self.offset.num_milliseconds(),
            "Clock time set to {}, offset calculated",
            remote_now
        );
    }

    /// Try each timing element in order until one succeeds. Without any element the local
    /// clock is used as is.
    pub async fn sync(&mut self, timing: &[UtcTiming], fetcher: &impl Fetcher) -> IoriResult<()> {
        if timing.is_empty() {
            tracing::warn!("No UTCTiming elements found in MPD, using local time.");
            self.offset = TimeDelta::zero();
            return Ok(());
        }

        let mut last_error = None;
        for timing in timing {
            tracing::debug!(
                scheme = %timing.scheme_id_uri,
                value = %timing.value.as_deref().unwrap_or(""),
                "Attempting to sync time with scheme"
            );
            let before_request = Utc::now();
            match remote_time(timing, fetcher).await {
                Ok((remote_now, over_network)) => {
                    let after_request = if over_network {
                        Utc::now()
                    } else {
                        before_request
                    };
                    self.set_time(remote_now, before_request, after_request);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(scheme = %timing.scheme_id_uri, error = %e, "time sync failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            IoriError::InvalidTimingSchema("All supported time sync methods failed".to_string())
        }))
    }
}

/// Remote time announced by `timing`, and whether it was read over the network.
async fn remote_time(
    timing: &UtcTiming,
    fetcher: &impl Fetcher,
) -> IoriResult<(DateTime<Utc>, bool)> {
    let value = || {
        timing.value.as_deref().ok_or_else(|| {
            IoriError::InvalidTimingSchema(format!("Missing value for {}", timing.scheme_id_uri))
        })
    };

    match timing.scheme_id_uri.as_str() {
        HTTP_XSDATE | HTTP_ISO => {
            let url = url::Url::parse(value()?)?;
            let response = fetcher.fetch(&url, None).await?;
            let text = String::from_utf8_lossy(&response.body);
            Ok((parse_iso8601_response(text.trim())?, true))
        }
        HTTP_HEAD => {
            let url = url::Url::parse(value()?)?;
            let response = fetcher.fetch(&url, None).await?;
            let date = response
                .headers
                .get(DATE)
                .ok_or_else(|| IoriError::DateTimeParsing("Missing Date header".to_string()))?
                .to_str()
                .map_err(|_| IoriError::DateTimeParsing("Invalid Date header string".to_string()))?;
            Ok((DateTime::parse_from_rfc2822(date)?.with_timezone(&Utc), true))
        }
        DIRECT => Ok((parse_iso8601_response(value()?)?, false)),
        HTTP_NTP | NTP => Err(IoriError::InvalidTimingSchema(format!(
            "Unsupported scheme: {}",
            timing.scheme_id_uri
        ))),
        others => Err(IoriError::InvalidTimingSchema(others.into())),
    }
}

fn parse_iso8601_response(response_text: &str) -> IoriResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(response_text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Allow Z suffix for UTC, which is not strictly RFC3339 but used by xsdate
            DateTime::parse_from_str(response_text, "%Y-%m-%dT%H:%M:%SZ")
                .map(|dt| dt.with_timezone(&Utc))
        })?)
}
