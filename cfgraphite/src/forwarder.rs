//! Incremental forwarding of analytics periods to the metrics sink.
//!
//! The Cloudflare dashboard reports overlapping windows of aggregated
//! counters on every poll. This module remembers the end of the last period
//! it forwarded -- the watermark -- and on each payload forwards only the
//! periods that end strictly after it, so a sample is delivered at most once
//! per watermark step.
//!
//! ## Metrics
//!
//! `decode_failure`: Payloads that could not be decoded; the cycle is skipped
//! `periods_forwarded`: Periods that exceeded the watermark
//! `samples_forwarded`: Samples successfully handed to the sink
//! `sink_write_failure`: Samples the sink refused
//!

use metrics::counter;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, warn};

use crate::sink::{MetricSample, Sink};

/// Namespace prefix for every emitted metric key.
const NAMESPACE: &str = "stats.cloudflare";

/// The parts we want from Cloudflare's dashboard response. Anything else in
/// the payload is ignored.
#[derive(Debug, Deserialize)]
struct Response {
    result: DashboardResult,
}

#[derive(Debug, Deserialize)]
struct DashboardResult {
    #[serde(default)]
    timeseries: Vec<Timeserie>,
}

#[derive(Debug, Deserialize)]
struct Timeserie {
    #[serde(with = "time::serde::rfc3339")]
    since: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    until: OffsetDateTime,
    #[serde(default)]
    requests: Requests,
}

#[derive(Debug, Default, Deserialize)]
struct Requests {
    #[serde(default)]
    http_status: FxHashMap<String, u64>,
}

/// Outcome of a single forwarding pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Periods present in the decoded payload.
    pub periods_seen: u64,
    /// Periods that ended after the watermark and were forwarded.
    pub periods_forwarded: u64,
    /// Samples successfully handed to the sink.
    pub samples_emitted: u64,
    /// Samples the sink refused.
    pub samples_failed: u64,
}

/// Replace dots with underscores so the sink does not split the domain into
/// hierarchy components.
#[must_use]
pub fn normalize_domain(domain: &str) -> String {
    domain.replace('.', "_")
}

/// The incremental forwarder.
///
/// Owns the watermark for its lifetime; a fresh instance starts at the
/// earliest representable instant and so forwards everything it first sees.
#[derive(Debug)]
pub struct Forwarder<S> {
    sink: S,
    domain: String,
    watermark: OffsetDateTime,
}

impl<S> Forwarder<S>
where
    S: Sink,
{
    /// Create a new [`Forwarder`] instance emitting through `sink` under
    /// `zone_domain`, which is normalized here.
    pub fn new(sink: S, zone_domain: &str) -> Self {
        Self {
            sink,
            domain: normalize_domain(zone_domain),
            watermark: PrimitiveDateTime::MIN.assume_utc(),
        }
    }

    /// The current forwarding cutoff: end of the most recently forwarded
    /// period. Non-decreasing across calls to [`Forwarder::forward`].
    #[must_use]
    pub fn watermark(&self) -> OffsetDateTime {
        self.watermark
    }

    /// Decode one payload and forward its previously-unseen periods.
    ///
    /// An undecodable payload counts as zero periods and leaves the watermark
    /// untouched. Sink failures are reported per sample and do not abort the
    /// remaining emissions. The watermark advances to the maximum period end
    /// among qualifying periods, after the full evaluation pass.
    pub async fn forward(&mut self, payload: &[u8]) -> Summary {
        let mut summary = Summary::default();

        let response: Response = match serde_json::from_slice(payload) {
            Ok(response) => response,
            Err(err) => {
                warn!("failed to decode analytics payload: {err}");
                counter!("decode_failure").increment(1);
                return summary;
            }
        };

        let periods = response.result.timeseries;
        summary.periods_seen = periods.len() as u64;

        let (qualifying, max_until) = select_periods(self.watermark, &periods);
        for period in qualifying {
            debug!(
                since = %period.since,
                until = %period.until,
                "forwarding period"
            );
            summary.periods_forwarded += 1;
            let timestamp = period.until.unix_timestamp();
            for (name, count) in &period.requests.http_status {
                let sample = MetricSample {
                    key: format!("{NAMESPACE}.{domain}.{name}", domain = self.domain),
                    value: *count,
                    timestamp,
                };
                match self.sink.emit(&sample).await {
                    Ok(()) => summary.samples_emitted += 1,
                    Err(err) => {
                        warn!(key = %sample.key, "failed to emit sample: {err}");
                        counter!("sink_write_failure").increment(1);
                        summary.samples_failed += 1;
                    }
                }
            }
        }

        if let Some(max_until) = max_until {
            self.watermark = max_until;
        }

        counter!("periods_forwarded").increment(summary.periods_forwarded);
        counter!("samples_forwarded").increment(summary.samples_emitted);
        summary
    }
}

/// Pick out the periods that end strictly after the watermark, in source
/// order, together with the maximum `until` among them.
///
/// The maximum is tracked explicitly rather than taken from the last
/// qualifying period so that a source returning periods out of chronological
/// order cannot move the watermark backwards within one batch.
fn select_periods(
    watermark: OffsetDateTime,
    periods: &[Timeserie],
) -> (Vec<&Timeserie>, Option<OffsetDateTime>) {
    let mut qualifying = Vec::new();
    let mut max_until = None;
    for period in periods {
        if period.until > watermark {
            max_until = Some(max_until.map_or(period.until, |m: OffsetDateTime| m.max(period.until)));
            qualifying.push(period);
        }
    }
    (qualifying, max_until)
}
