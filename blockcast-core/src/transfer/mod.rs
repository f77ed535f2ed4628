//! The transfer engine (spec §4.D): concurrent fan-out over a fixed
//! window of `K` simultaneous block transfers, with retry.
//!
//! The C original multiplexes up to `K` non-blocking sockets on a
//! selector and advances each one's progress through a sentinel byte
//! offset. Design note 3 asks for that to become "an explicit per-slot
//! state variant... carrying the remaining byte count" — here, each
//! block transfer is its own `tokio` task admitted through a
//! `Semaphore` of size `K` (the async equivalent of a `K`-slot
//! selector loop: at most `K` sockets are ever live, and every
//! read/write suspends at exactly one readiness point), and
//! [`SlotState`] is the explicit per-slot state the design note calls
//! for, traced at `debug!` as each transfer advances through it.

use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::codec::Mask;
use crate::crypto::{Crypto, Digest, HASH_LEN};
use crate::ring::{Offset, RoutingRing};

/// Maximum concurrent in-flight block transfers per object, per worker
/// (spec §4.D, §5).
pub const K: usize = 8;

/// Bounded retry count for the request path (spec §4.D retry policy).
pub const REQUEST_MAX_ATTEMPTS: u32 = 3;

const CMD_INSERT: u8 = b'i';
const CMD_REQUEST: u8 = b'r';

/// Explicit per-slot progress, replacing the C original's sentinel
/// byte offsets (design note 3). Used only for tracing; the actual
/// suspension is `tokio`'s `.await`, not a hand-rolled selector.
#[derive(Debug, Clone, Copy)]
enum SlotState {
    SendingCommand,
    SendingHeader { remaining: usize },
    Transferring { remaining: usize },
    AwaitingLength,
}

/// Failure taxonomy surfaced to the orchestrator (spec §4.D).
#[derive(Debug)]
pub enum FanoutOutcome {
    Complete,
    Partial(Mask),
}

/// Jittered backoff for the unbounded insert retry loop: capped
/// exponential growth plus randomness, so a primary under load isn't
/// hammered by every stalled position retrying in lockstep.
fn retry_backoff(attempt: u32) -> std::time::Duration {
    let base_ms = 50u64.saturating_mul(1u64 << attempt.min(5));
    let capped_ms = base_ms.min(2_000);
    let jittered_ms = rand::rng().random_range(capped_ms / 2..=capped_ms);
    std::time::Duration::from_millis(jittered_ms)
}

fn slice_for(buf: &[u8], pos: usize, block_size: usize) -> &[u8] {
    &buf[pos * block_size..(pos + 1) * block_size]
}

fn slice_for_mut(buf: &mut [u8], pos: usize, block_size: usize) -> &mut [u8] {
    &mut buf[pos * block_size..(pos + 1) * block_size]
}

/// Insert sub-protocol for one block: `'i'` | 4-byte LE length | payload.
async fn send_one_insert(addr: SocketAddr, payload: &[u8]) -> std::io::Result<()> {
    let mut sock = TcpStream::connect(addr).await?;
    let mut state = SlotState::SendingCommand;
    debug!(?state, %addr, "insert: connected");
    sock.write_all(&[CMD_INSERT]).await?;

    state = SlotState::SendingHeader { remaining: 4 };
    debug!(?state, %addr, "insert: sending length header");
    sock.write_all(&(payload.len() as u32).to_le_bytes()).await?;

    state = SlotState::Transferring { remaining: payload.len() };
    debug!(?state, %addr, "insert: sending payload");
    sock.write_all(payload).await?;
    sock.shutdown().await?;
    Ok(())
}

/// Request sub-protocol for one block: `'r'` | hash → 4-byte LE length
/// | length bytes. Returns the bytes read, or an error if the
/// connection, protocol, or declared length is wrong.
async fn recv_one_request(addr: SocketAddr, hash: &Digest, expected_len: usize) -> std::io::Result<Vec<u8>> {
    let mut sock = TcpStream::connect(addr).await?;
    let mut state = SlotState::SendingCommand;
    debug!(?state, %addr, "request: connected");
    sock.write_all(&[CMD_REQUEST]).await?;

    state = SlotState::SendingHeader { remaining: HASH_LEN };
    debug!(?state, %addr, "request: sending hash");
    sock.write_all(hash).await?;

    state = SlotState::AwaitingLength;
    debug!(?state, %addr, "request: awaiting declared length");
    let mut len_bytes = [0u8; 4];
    sock.read_exact(&mut len_bytes).await?;
    let declared = u32::from_le_bytes(len_bytes) as usize;
    if declared != expected_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("declared length {declared} != expected {expected_len}"),
        ));
    }

    state = SlotState::Transferring { remaining: declared };
    debug!(?state, %addr, "request: reading payload");
    let mut buf = vec![0u8; declared];
    sock.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Fan out inserts for every position `p` in `[0, count)` with
/// `mask_skip[p] == false`. Insert retries are unbounded at the
/// primary route (spec §4.D: "there is no give-up path").
pub async fn fanout_insert(
    ring: Arc<RoutingRing>,
    blocks: Arc<Vec<u8>>,
    mask_skip: &Mask,
    count: usize,
    block_size: usize,
    hashes: Arc<Vec<Digest>>,
) {
    let semaphore = Arc::new(Semaphore::new(K));
    let mut joins = Vec::with_capacity(count);

    for p in 0..count {
        if mask_skip.get(p) {
            continue;
        }
        let ring = ring.clone();
        let blocks = blocks.clone();
        let hashes = hashes.clone();
        let semaphore = semaphore.clone();

        joins.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let payload = slice_for(&blocks, p, block_size).to_vec();
            let hash = hashes[p];
            let mut attempt: u32 = 0;
            loop {
                let addr = match ring.route(&hash, Offset::Primary).await {
                    Ok(addr) => addr,
                    Err(err) => {
                        warn!(position = p, %err, "insert: routing failed, retrying");
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        continue;
                    }
                };
                match send_one_insert(addr, &payload).await {
                    Ok(()) => break,
                    Err(err) => {
                        attempt += 1;
                        warn!(position = p, %addr, attempt, %err, "insert: transport error, reconnecting to primary");
                        tokio::time::sleep(retry_backoff(attempt)).await;
                    }
                }
            }
        }));
    }

    for j in joins {
        let _ = j.await;
    }
}

/// Fan out requests for every position `p` in `[0, count)` with
/// `mask_have[p] == false`. Up to [`REQUEST_MAX_ATTEMPTS`] connect
/// attempts per block, walking `route(hash, 0..=2)`; unreachable
/// blocks stay missing.
pub async fn fanout_request(
    ring: Arc<RoutingRing>,
    blocks: Arc<tokio::sync::Mutex<Vec<u8>>>,
    mask_have: Arc<tokio::sync::Mutex<Mask>>,
    count: usize,
    block_size: usize,
    hashes: Arc<Vec<Digest>>,
    crypto: Arc<dyn Crypto>,
) -> FanoutOutcome {
    let semaphore = Arc::new(Semaphore::new(K));
    let mut joins = Vec::with_capacity(count);

    let to_fetch: Vec<usize> = {
        let mask = mask_have.lock().await;
        (0..count).filter(|&p| !mask.get(p)).collect()
    };

    for p in to_fetch {
        let ring = ring.clone();
        let blocks = blocks.clone();
        let mask_have = mask_have.clone();
        let hashes = hashes.clone();
        let crypto = crypto.clone();
        let semaphore = semaphore.clone();

        joins.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let hash = hashes[p];

            for attempt in 0..REQUEST_MAX_ATTEMPTS {
                let off = Offset::from_attempt(attempt);
                let addr = match ring.route(&hash, off).await {
                    Ok(addr) => addr,
                    Err(err) => {
                        warn!(position = p, %err, "request: routing failed");
                        break;
                    }
                };
                match recv_one_request(addr, &hash, block_size).await {
                    Ok(data) => {
                        if crypto.hash(&data) != hash {
                            warn!(position = p, %addr, attempt, "request: hash mismatch, demoting to missing");
                            continue;
                        }
                        let mut buf = blocks.lock().await;
                        slice_for_mut(&mut buf, p, block_size).copy_from_slice(&data);
                        drop(buf);
                        mask_have.lock().await.set(p, true);
                        return;
                    }
                    Err(err) => {
                        warn!(position = p, %addr, attempt, %err, "request: transport error, retrying");
                    }
                }
            }
        }));
    }

    for j in joins {
        let _ = j.await;
    }

    let mask = mask_have.lock().await.clone();
    if mask.missing().is_empty() {
        FanoutOutcome::Complete
    } else {
        FanoutOutcome::Partial(mask)
    }
}
