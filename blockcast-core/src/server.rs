//! The client-facing accept loop (spec §5, §6): one worker per
//! connection, dispatched on the first command byte. Mirrors the
//! teacher's `tcp::handler::TcpHandler::run` shape — an unbounded
//! `accept()` loop that spawns a detached task per connection and logs
//! at the same granularity.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::crypto::Crypto;
use crate::error::Result;
use crate::object;
use crate::ring::RoutingRing;

const CMD_INSERT: u8 = b'i';
const CMD_REQUEST: u8 = b'r';

/// Bind `cfg.listen` and serve client connections until the process is
/// killed. Each connection gets its own task; a client disconnect
/// mid-operation is observed as an I/O error and simply ends that
/// task (spec §5 cancellation: no cross-cancellation of in-flight
/// block transfers).
pub async fn run(cfg: Arc<CoreConfig>, ring: Arc<RoutingRing>, crypto: Arc<dyn Crypto>) -> Result<()> {
    let listener = TcpListener::bind(cfg.listen).await?;
    info!(addr = %cfg.listen, "client listener bound");

    loop {
        let (mut client, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "failed to accept client connection");
                continue;
            }
        };
        let ring = ring.clone();
        let crypto = crypto.clone();

        tokio::spawn(async move {
            let mut cmd = [0u8; 1];
            if client.read_exact(&mut cmd).await.is_err() {
                return;
            }
            let outcome = match cmd[0] {
                CMD_INSERT => object::insert(&mut client, ring, crypto).await,
                CMD_REQUEST => object::request(&mut client, ring, crypto).await,
                other => {
                    warn!(peer = %peer, command = other, "unknown command byte");
                    return;
                }
            };
            if let Err(err) = outcome {
                warn!(peer = %peer, %err, "operation failed");
            }
        });
    }
}
