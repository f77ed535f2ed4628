//! The membership collaborator (spec §6): connects to a known
//! host:port, reads a 4-byte count `N` then `N` 4-byte IPv4 addresses,
//! and feeds them into the routing ring via `add`. An empty list means
//! immediate, clean shutdown.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::info;

use crate::crypto::Crypto;
use crate::error::Result;
use crate::ring::RoutingRing;

/// The fixed port every block server listens on (spec: addresses
/// carried by the membership collaborator are host-only; the fleet
/// shares one well-known port).
pub const BLOCK_SERVER_PORT: u16 = 19_840;

/// Outcome of a membership fetch: how many nodes were added, so the
/// caller can treat zero as the spec's "immediate shutdown" signal.
pub struct MembershipResult {
    pub added: usize,
}

/// Connect to `membership_addr`, read its address list, and populate
/// `ring`.
pub async fn fetch(
    membership_addr: SocketAddr,
    ring: &RoutingRing,
    crypto: &dyn Crypto,
) -> Result<MembershipResult> {
    let mut sock = TcpStream::connect(membership_addr).await?;

    let mut count_buf = [0u8; 4];
    sock.read_exact(&mut count_buf).await?;
    let count = u32::from_le_bytes(count_buf) as usize;

    let mut added = 0;
    for _ in 0..count {
        let mut addr_buf = [0u8; 4];
        sock.read_exact(&mut addr_buf).await?;
        let ip = Ipv4Addr::new(addr_buf[0], addr_buf[1], addr_buf[2], addr_buf[3]);
        let addr = SocketAddr::new(ip.into(), BLOCK_SERVER_PORT);
        ring.add(addr, crypto).await;
        added += 1;
    }

    info!(addr = %membership_addr, added, "membership: fetched server list");
    Ok(MembershipResult { added })
}

/// Convenience wrapper taking an `Arc<dyn Crypto>`, for call sites that
/// already hold the crypto collaborator behind an `Arc`.
pub async fn fetch_arc(
    membership_addr: SocketAddr,
    ring: &RoutingRing,
    crypto: &Arc<dyn Crypto>,
) -> Result<MembershipResult> {
    fetch(membership_addr, ring, crypto.as_ref()).await
}
