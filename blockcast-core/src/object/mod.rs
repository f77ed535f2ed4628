//! The object orchestrator (spec §4.E): the high-level insert/request
//! flows, sequencing the routing ring, graph table, codec, and
//! transfer engine around the external crypto collaborator.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::codec::{self, Mask};
use crate::crypto::{Crypto, Digest};
use crate::error::{CoreError, Result};
use crate::graph::{derive_sizing, GraphTable};
use crate::ring::RoutingRing;
use crate::transfer::{self, FanoutOutcome};
use crate::uri::Uri;

/// Read a full object insert from `client`, encrypt, erasure-code, fan
/// out, and write the resulting URI back. Spec §4.E insert, steps 1-9.
pub async fn insert(
    client: &mut TcpStream,
    ring: Arc<RoutingRing>,
    crypto: Arc<dyn Crypto>,
) -> Result<()> {
    // Step 1: read the 4-byte plaintext length.
    let mut len_buf = [0u8; 4];
    client.read_exact(&mut len_buf).await?;
    let l = u32::from_le_bytes(len_buf) as usize;

    // Step 2: derive (d, c, B); reject unsupported sizes.
    let sizing = derive_sizing(l).ok_or(CoreError::UnsupportedSize)?;
    let graph = GraphTable::get(sizing.d).ok_or(CoreError::UnsupportedSize)?;

    // Step 3: allocate the object buffer, zeroed (covers the padding
    // region and the whole check region).
    let total_blocks = sizing.d + sizing.c;
    let mut buf = vec![0u8; total_blocks * sizing.block_size];

    // Step 4: read exactly L bytes into the data region.
    client.read_exact(&mut buf[..l]).await?;

    // Step 5: hash the unpadded plaintext, then encrypt the padded
    // region in place keyed by that hash.
    let h0 = crypto.hash(&buf[..l]);
    crypto.encrypt(&mut buf[..sizing.padded_len], &h0);

    // Step 6: encode check blocks.
    codec::encode(&graph, &mut buf, sizing.block_size);

    // Step 7: hash each of the d+c blocks.
    let hashes: Vec<Digest> = (0..total_blocks)
        .map(|p| crypto.hash(&buf[p * sizing.block_size..(p + 1) * sizing.block_size]))
        .collect();

    // Step 8: emit the URI.
    let uri = Uri { length: l as u32, plaintext_hash: h0, block_hashes: hashes.clone() };
    client.write_all(&uri.encode()).await?;

    info!(length = l, d = sizing.d, c = sizing.c, block_size = sizing.block_size, "insert: object encoded, fanning out");

    // Step 9: fan out inserts for every position.
    let mask_skip = Mask::new(total_blocks);
    transfer::fanout_insert(
        ring,
        Arc::new(buf),
        &mask_skip,
        total_blocks,
        sizing.block_size,
        Arc::new(hashes),
    )
    .await;

    Ok(())
}

/// Read a URI from `client`, reconstruct the plaintext, verify it, and
/// write it back, re-inserting any reconstructed blocks. Spec §4.E
/// request, steps 1-9.
pub async fn request(
    client: &mut TcpStream,
    ring: Arc<RoutingRing>,
    crypto: Arc<dyn Crypto>,
) -> Result<()> {
    // Step 1: read and validate the URI length prefix.
    let mut len_buf = [0u8; 4];
    client.read_exact(&mut len_buf).await?;
    let payload_len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; payload_len];
    client.read_exact(&mut payload).await?;

    // Step 2: parse L and the hashes; derive (d, c, B).
    let uri = Uri::decode(&payload)?;
    let l = uri.length as usize;
    let sizing = derive_sizing(l).ok_or(CoreError::UnsupportedSize)?;
    let graph = GraphTable::get(sizing.d).ok_or(CoreError::UnsupportedSize)?;
    let total_blocks = sizing.d + sizing.c;

    // Step 3: allocate the object buffer and masks; fan out requests.
    let buf = Arc::new(tokio::sync::Mutex::new(vec![0u8; total_blocks * sizing.block_size]));
    let have = Arc::new(tokio::sync::Mutex::new(Mask::new(total_blocks)));
    let hashes = Arc::new(uri.block_hashes.clone());

    let outcome = transfer::fanout_request(
        ring.clone(),
        buf.clone(),
        have.clone(),
        total_blocks,
        sizing.block_size,
        hashes.clone(),
        crypto.clone(),
    )
    .await;

    let have_original = have.lock().await.clone();

    // Step 4: iterative decode if anything is missing.
    let mut object = buf.lock().await;
    let mut mask = have.lock().await.clone();
    if matches!(outcome, FanoutOutcome::Partial(_)) {
        if let Err(missing) = codec::decode(&graph, &mut object, &mut mask, sizing.block_size) {
            warn!(?missing, "request: object irrecoverable");
            return Err(CoreError::Irrecoverable { missing });
        }
    }

    // Step 5: verify every reconstructed block's hash (the ones that
    // were missing before decode and are now present) before anything
    // derived from them reaches the client.
    for p in 0..total_blocks {
        if !have_original.get(p) {
            let actual = crypto.hash(&object[p * sizing.block_size..(p + 1) * sizing.block_size]);
            if actual != hashes[p] {
                return Err(CoreError::Integrity("reconstructed block hash mismatch"));
            }
        }
    }

    // Step 6: snapshot the object while block contents still match the
    // on-the-wire (encrypted) bytes `hashes` was computed over — the
    // re-insert in step 9 sends exactly these bytes, so it must run
    // before the in-place decrypt below touches the data region.
    let encrypted_snapshot = Arc::new(object.clone());

    // Step 7: decrypt, verify plaintext hash.
    crypto.decrypt(&mut object[..sizing.padded_len], &uri.plaintext_hash);
    let actual_h0 = crypto.hash(&object[..l]);
    if actual_h0 != uri.plaintext_hash {
        return Err(CoreError::Integrity("plaintext hash mismatch after decrypt"));
    }

    // Step 8: write the plaintext back to the client.
    client.write_all(&(l as u32).to_le_bytes()).await?;
    client.write_all(&object[..l]).await?;

    drop(object);

    // Step 9: fan out inserts for reconstructed positions only, using
    // the pre-decrypt snapshot so every re-inserted block's bytes still
    // hash to the URI's `H_i`.
    transfer::fanout_insert(
        ring,
        encrypted_snapshot,
        &have_original,
        total_blocks,
        sizing.block_size,
        hashes,
    )
    .await;

    Ok(())
}
