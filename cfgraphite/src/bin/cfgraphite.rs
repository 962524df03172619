//! Command line entry point for the Cloudflare analytics forwarder.

use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tokio::{runtime::Builder, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

use cfgraphite::{
    config::{Config, DEFAULT_LOOKBACK_MINUTES, DEFAULT_POLL_INTERVAL_SECONDS, GraphiteConfig},
    fetcher::{self, Cloudflare},
    forwarder::Forwarder,
    poller::{self, Poller},
    sink::Graphite,
};

#[derive(Parser, Debug)]
#[command(about = "Forward Cloudflare zone analytics counters to Graphite")]
struct Opts {
    /// X-Auth-Email for Cloudflare's API
    #[arg(long, default_value = "")]
    email: String,
    /// X-Auth-Key for Cloudflare's API
    #[arg(long, default_value = "")]
    auth_key: String,
    /// Cloudflare zone identifier
    #[arg(long, default_value = "")]
    zone: String,
    /// Domain of the zone, used in metric keys
    #[arg(long, default_value = "")]
    zone_domain: String,
    /// Graphite host
    #[arg(long, default_value = "")]
    graphite_host: String,
    /// Graphite plaintext-protocol port
    #[arg(long, default_value_t = 0)]
    graphite_port: u16,
    /// Seconds between poll cycles
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECONDS)]
    interval_seconds: u64,
    /// Analytics lookback window in minutes
    #[arg(long, default_value_t = DEFAULT_LOOKBACK_MINUTES)]
    lookback_minutes: u32,
}

impl From<Opts> for Config {
    fn from(opts: Opts) -> Self {
        Self {
            auth_email: opts.email,
            auth_key: opts.auth_key,
            zone: opts.zone,
            zone_domain: opts.zone_domain,
            graphite: GraphiteConfig {
                host: opts.graphite_host,
                port: opts.graphite_port,
            },
            poll_interval_seconds: opts.interval_seconds,
            lookback_minutes: opts.lookback_minutes,
        }
    }
}

async fn run(config: Config) -> Result<(), poller::Error> {
    let (shutdown_watcher, shutdown_broadcaster) = cfgraphite_signal::signal();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, signaling shutdown");
            shutdown_broadcaster.signal();
        }
    });

    let fetcher = Cloudflare::new(&fetcher::Config {
        base_url: fetcher::DEFAULT_BASE_URL.to_string(),
        zone: config.zone.clone(),
        auth_email: config.auth_email.clone(),
        auth_key: config.auth_key.clone(),
        lookback_minutes: config.lookback_minutes,
    });
    let sink = Graphite::new(config.graphite.host.clone(), config.graphite.port);
    let forwarder = Forwarder::new(sink, &config.zone_domain);
    let poller = Poller::new(fetcher, forwarder, config.poll_interval(), shutdown_watcher);

    poller.spin().await
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let opts = Opts::parse();
    let config = Config::from(opts);
    if let Err(err) = config.validate() {
        error!("invalid configuration: {err}");
        let _ = Opts::command().print_help();
        return ExitCode::from(1);
    }

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting cfgraphite {version} run.");

    let runtime = match Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to build runtime: {err}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => {
            info!("Bye. :)");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("poller exited with error: {err}");
            ExitCode::from(1)
        }
    }
}
