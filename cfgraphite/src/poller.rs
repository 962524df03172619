//! The fixed-interval polling loop.
//!
//! Fetch, forward, sleep, repeat. The sleep starts after the forward
//! completes, so total cycle time is processing time plus the interval; the
//! loop does not correct for drift. A cycle that fails to fetch is an empty
//! cycle and the next tick is the retry.
//!
//! ## Metrics
//!
//! `fetch_failure`: Cycles whose analytics fetch failed
//!

use std::time::Duration;

use metrics::counter;
use tracing::{debug, error, info, warn};

use crate::{fetcher::Fetch, forwarder::Forwarder, sink::Sink};

#[derive(Debug, Clone, Copy, thiserror::Error)]
/// Errors produced by [`Poller`].
pub enum Error {
    /// Polling loop completed unexpectedly.
    #[error("unexpected shutdown")]
    EarlyShutdown,
}

/// The polling loop.
///
/// Owns the timer and drives the forwarder, one cycle per tick, until the
/// shutdown signal is received.
#[derive(Debug)]
pub struct Poller<F, S> {
    fetcher: F,
    forwarder: Forwarder<S>,
    interval: Duration,
    shutdown: cfgraphite_signal::Watcher,
}

impl<F, S> Poller<F, S>
where
    F: Fetch,
    S: Sink,
{
    /// Create a new [`Poller`] instance.
    pub fn new(
        fetcher: F,
        forwarder: Forwarder<S>,
        interval: Duration,
        shutdown: cfgraphite_signal::Watcher,
    ) -> Self {
        Self {
            fetcher,
            forwarder,
            interval,
            shutdown,
        }
    }

    /// Run this [`Poller`] to completion or until a shutdown signal is
    /// received.
    ///
    /// Shutdown interrupts the sleep and abandons any in-flight cycle; the
    /// watermark only advances inside a completed forwarding pass, so
    /// cancellation cannot corrupt it.
    ///
    /// # Errors
    ///
    /// Function will return an error if the inner loop -- which has no exit
    /// of its own -- ever completes.
    pub async fn spin(self) -> Result<(), Error> {
        let Self {
            fetcher,
            mut forwarder,
            interval,
            shutdown,
        } = self;

        info!(
            interval_seconds = interval.as_secs(),
            "poller running"
        );

        let server = async move {
            loop {
                match fetcher.fetch().await {
                    Ok(payload) => {
                        let summary = forwarder.forward(&payload).await;
                        debug!(
                            periods_seen = summary.periods_seen,
                            periods_forwarded = summary.periods_forwarded,
                            samples_emitted = summary.samples_emitted,
                            samples_failed = summary.samples_failed,
                            "cycle complete"
                        );
                    }
                    Err(err) => {
                        warn!("failed to fetch analytics payload: {err}");
                        counter!("fetch_failure").increment(1);
                    }
                }
                tokio::time::sleep(interval).await;
            }
        };

        tokio::select! {
            _res = server => {
                error!("server shutdown unexpectedly");
                Err(Error::EarlyShutdown)
            }
            () = shutdown.recv() => {
                info!("shutdown signal received");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use bytes::Bytes;

    use super::*;
    use crate::{fetcher, sink::test_support::RecordingSink};

    #[derive(Debug, Clone)]
    struct StaticFetcher {
        payload: Bytes,
        calls: Arc<AtomicUsize>,
    }

    impl Fetch for StaticFetcher {
        async fn fetch(&self) -> Result<Bytes, fetcher::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.payload.clone())
        }
    }

    #[derive(Debug, Clone)]
    struct FailingFetcher {
        calls: Arc<AtomicUsize>,
    }

    impl Fetch for FailingFetcher {
        async fn fetch(&self) -> Result<Bytes, fetcher::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(fetcher::Error::Status {
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            })
        }
    }

    fn dashboard_payload() -> Bytes {
        Bytes::from_static(
            br#"{
                "result": {
                    "timeseries": [{
                        "since": "2023-11-14T21:50:00Z",
                        "until": "2023-11-14T22:00:00Z",
                        "requests": { "http_status": { "200": 10, "404": 2 } }
                    }]
                }
            }"#,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let (watcher, broadcaster) = cfgraphite_signal::signal();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = StaticFetcher {
            payload: dashboard_payload(),
            calls: Arc::clone(&calls),
        };
        let sink = RecordingSink::default();
        let poller = Poller::new(
            fetcher,
            Forwarder::new(sink.clone(), "example.com"),
            Duration::from_millis(10),
            watcher,
        );

        let handle = tokio::spawn(poller.spin());
        tokio::time::sleep(Duration::from_millis(55)).await;
        broadcaster.signal();

        let res = handle.await.expect("poller task");
        assert!(res.is_ok());

        // Several cycles ran but the single period was forwarded exactly
        // once.
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(sink.samples().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_does_not_stop_the_loop() {
        let (watcher, broadcaster) = cfgraphite_signal::signal();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = FailingFetcher {
            calls: Arc::clone(&calls),
        };
        let sink = RecordingSink::default();
        let poller = Poller::new(
            fetcher,
            Forwarder::new(sink.clone(), "example.com"),
            Duration::from_millis(10),
            watcher,
        );

        let handle = tokio::spawn(poller.spin());
        tokio::time::sleep(Duration::from_millis(35)).await;
        broadcaster.signal();

        let res = handle.await.expect("poller task");
        assert!(res.is_ok());

        // The loop kept polling through the failures and emitted nothing.
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(sink.samples().is_empty());
    }
}
