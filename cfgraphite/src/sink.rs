//! The Graphite plaintext-protocol sink.
//!
//! ## Metrics
//!
//! `connection_failure`: Number of failed connection attempts to the sink
//! `request_failure`: Number of failed writes; each occurrence causes a reconnect
//!

use metrics::counter;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::{debug, trace};

/// One flattened analytics data point bound for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    /// Fully-qualified, dot-delimited metric path.
    pub key: String,
    /// Counter value for the period.
    pub value: u64,
    /// Period end, in seconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Graphite`].
pub enum Error {
    /// Connect or write failure on the sink socket.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Destination for metric samples.
///
/// Delivery semantics beyond a single send belong to the implementation, not
/// the callers.
#[allow(async_fn_in_trait)]
pub trait Sink {
    /// Deliver one sample.
    ///
    /// # Errors
    ///
    /// Function will return an error if the sample could not be handed to the
    /// backend. A failed send is not retried by the implementation.
    async fn emit(&mut self, sample: &MetricSample) -> Result<(), Error>;
}

/// The Graphite sink.
///
/// Speaks the plaintext protocol, one `<key> <value> <timestamp>\n` line per
/// sample, over TCP. The connection is established lazily on first emit; a
/// write failure drops the socket and the next emit reconnects.
#[derive(Debug)]
pub struct Graphite {
    host: String,
    port: u16,
    connection: Option<TcpStream>,
}

impl Graphite {
    /// Create a new [`Graphite`] instance. Does not connect until the first
    /// sample is emitted.
    #[must_use]
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            connection: None,
        }
    }
}

fn format_line(sample: &MetricSample) -> String {
    format!(
        "{key} {value} {timestamp}\n",
        key = sample.key,
        value = sample.value,
        timestamp = sample.timestamp
    )
}

impl Sink for Graphite {
    async fn emit(&mut self, sample: &MetricSample) -> Result<(), Error> {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => match TcpStream::connect((self.host.as_str(), self.port)).await {
                Ok(connection) => {
                    debug!(
                        host = %self.host,
                        port = self.port,
                        "connected to graphite"
                    );
                    connection
                }
                Err(err) => {
                    counter!("connection_failure").increment(1);
                    return Err(err.into());
                }
            },
        };

        let line = format_line(sample);
        if let Err(err) = connection.write_all(line.as_bytes()).await {
            // The socket stays dropped; the next emit reconnects.
            counter!("request_failure").increment(1);
            return Err(err.into());
        }
        trace!(key = %sample.key, "sample written");

        self.connection = Some(connection);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    fn sample(key: &str, value: u64, timestamp: i64) -> MetricSample {
        MetricSample {
            key: key.to_string(),
            value,
            timestamp,
        }
    }

    #[test]
    fn line_format_is_plaintext_protocol() {
        let line = format_line(&sample("stats.cloudflare.example_com.200", 10, 1_700_000_000));
        assert_eq!(line, "stats.cloudflare.example_com.200 10 1700000000\n");
    }

    #[tokio::test]
    async fn emits_lines_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = String::new();
            socket
                .read_to_string(&mut received)
                .await
                .expect("read stream");
            received
        });

        let mut graphite = Graphite::new(addr.ip().to_string(), addr.port());
        graphite
            .emit(&sample("stats.cloudflare.example_com.200", 10, 1_700_000_000))
            .await
            .expect("first emit");
        graphite
            .emit(&sample("stats.cloudflare.example_com.404", 2, 1_700_000_000))
            .await
            .expect("second emit");
        drop(graphite);

        let received = server.await.expect("server task");
        assert_eq!(
            received,
            "stats.cloudflare.example_com.200 10 1700000000\n\
             stats.cloudflare.example_com.404 2 1700000000\n"
        );
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        // Bind and immediately drop to find a port with no listener behind it.
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let mut graphite = Graphite::new(addr.ip().to_string(), addr.port());
        let res = graphite
            .emit(&sample("stats.cloudflare.example_com.200", 10, 1_700_000_000))
            .await;
        assert!(res.is_err());
    }
}
