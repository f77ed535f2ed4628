#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::lookup_host;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use blockcast_core::config::{self, CoreConfig};
use blockcast_core::{membership, server, Crypto, DefaultCrypto, RoutingRing};

/// Anonymous content-addressed block store proxy.
#[derive(Parser, Debug)]
#[command(author, version, about = "blockcast: block-layer proxy")]
struct Cli {
    /// Hostname of the membership ("inform") server.
    membership_host: String,

    /// Path to an optional TOML config file for fan-out and listener
    /// tunables. Defaults are used for anything the file omits.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let cfg = match cli.config.as_ref() {
        Some(path) => match config::load_from_path(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(%err, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => CoreConfig::default(),
    };
    let cfg = Arc::new(cfg);

    let crypto: Arc<dyn Crypto> = Arc::new(DefaultCrypto);
    let ring = Arc::new(RoutingRing::new());

    // `lookup_host` resolves both numeric IP literals and real
    // hostnames; a `SocketAddr` parse only accepts the former, which
    // would reject any real membership hostname outright.
    let membership_addr = match lookup_host((cli.membership_host.as_str(), cfg.membership_port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                error!(host = %cli.membership_host, "membership host resolved to no addresses");
                std::process::exit(2);
            }
        },
        Err(err) => {
            error!(%err, host = %cli.membership_host, "failed to resolve membership host");
            std::process::exit(2);
        }
    };

    let result = match membership::fetch_arc(membership_addr, &ring, &crypto).await {
        Ok(result) => result,
        Err(err) => {
            error!(%err, "membership fetch failed");
            std::process::exit(1);
        }
    };

    if result.added == 0 {
        info!("empty membership list, shutting down cleanly");
        std::process::exit(0);
    }

    if let Err(err) = server::run(cfg, ring, crypto).await {
        error!(%err, "accept loop exited with error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}
