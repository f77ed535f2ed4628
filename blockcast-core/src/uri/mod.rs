//! The self-certifying URI (spec §4.F): `(L, H₀, H₁…H_d, H_{d+1}…H_{d+c})`.
//!
//! Wire form: 4 bytes little-endian total length, 4 bytes little-endian
//! `L`, then `1 + d + c` hashes in layout order. Endianness is pinned
//! to little-endian per the spec's own resolution of Open Question (c).

use crate::crypto::{Digest, HASH_LEN};
use crate::error::{CoreError, Result};
use crate::graph::derive_sizing;

#[derive(Debug, Clone)]
pub struct Uri {
    pub length: u32,
    /// `H₀`, the hash of the unpadded plaintext.
    pub plaintext_hash: Digest,
    /// `H₁..H_{d+c}`, one hash per stored block, in layout order.
    pub block_hashes: Vec<Digest>,
}

impl Uri {
    /// `k = 1 + d + c`, the hash count.
    pub fn k(&self) -> usize {
        1 + self.block_hashes.len()
    }

    /// Total wire length in bytes: `4 + (1+d+c)·|hash|` (the length
    /// prefix itself is not counted, matching spec §3's "Total length
    /// in bytes is `4 + (1 + d + c)·|hash|`" — that count excludes the
    /// prefix's own 4 bytes).
    pub fn wire_payload_len(&self) -> usize {
        4 + self.k() * HASH_LEN
    }

    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.wire_payload_len() as u32;
        let total = 4 + payload_len as usize;
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&payload_len.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.plaintext_hash);
        for h in &self.block_hashes {
            out.extend_from_slice(h);
        }
        out
    }

    /// Decode from a payload that follows the 4-byte length prefix
    /// (the prefix itself having already been read and validated by
    /// the caller to equal `payload.len()`).
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 4 + 2 * HASH_LEN {
            return Err(CoreError::MalformedUri("payload shorter than minimum (L, H0, H1)".into()));
        }
        let rest = payload.len() - 4;
        if rest % HASH_LEN != 0 {
            return Err(CoreError::MalformedUri(format!(
                "payload not of the form 4 + k*{HASH_LEN}"
            )));
        }
        let k = rest / HASH_LEN;
        if k < 2 {
            return Err(CoreError::MalformedUri(format!("k={k} < 2")));
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&payload[0..4]);
        let length = u32::from_le_bytes(length_bytes);

        let mut plaintext_hash = [0u8; HASH_LEN];
        plaintext_hash.copy_from_slice(&payload[4..4 + HASH_LEN]);

        let mut block_hashes = Vec::with_capacity(k - 1);
        for i in 0..(k - 1) {
            let start = 4 + HASH_LEN + i * HASH_LEN;
            let mut h = [0u8; HASH_LEN];
            h.copy_from_slice(&payload[start..start + HASH_LEN]);
            block_hashes.push(h);
        }

        let uri = Self { length, plaintext_hash, block_hashes };

        // Open Question (b): the implied 1+d+c must agree with the
        // graph-table derivation from L, or the URI is malformed.
        let sizing = derive_sizing(length as usize)
            .ok_or(CoreError::MalformedUri("L has no supported (d, c) derivation".into()))?;
        if sizing.d + sizing.c != uri.block_hashes.len() {
            return Err(CoreError::MalformedUri(format!(
                "graph table derives d+c={} but URI carries {} block hashes",
                sizing.d + sizing.c,
                uri.block_hashes.len()
            )));
        }

        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let sizing = derive_sizing(1024).unwrap();
        let uri = Uri {
            length: 1024,
            plaintext_hash: [7u8; HASH_LEN],
            block_hashes: (0..(sizing.d + sizing.c))
                .map(|i| [i as u8; HASH_LEN])
                .collect(),
        };
        let wire = uri.encode();
        let payload = &wire[4..];
        let decoded = Uri::decode(payload).unwrap();
        assert_eq!(decoded.length, uri.length);
        assert_eq!(decoded.plaintext_hash, uri.plaintext_hash);
        assert_eq!(decoded.block_hashes, uri.block_hashes);
    }

    #[test]
    fn decode_rejects_short_payload() {
        let err = Uri::decode(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, CoreError::MalformedUri(_)));
    }

    #[test]
    fn decode_rejects_hash_count_disagreeing_with_graph_table() {
        // L=1024 implies a specific d+c; supply one fewer hash than that.
        let sizing = derive_sizing(1024).unwrap();
        let wrong_k = sizing.d + sizing.c - 1;
        let mut payload = Vec::new();
        payload.extend_from_slice(&1024u32.to_le_bytes());
        for i in 0..wrong_k {
            payload.extend_from_slice(&[i as u8; HASH_LEN]);
        }
        let err = Uri::decode(&payload).unwrap_err();
        assert!(matches!(err, CoreError::MalformedUri(_)));
    }
}
