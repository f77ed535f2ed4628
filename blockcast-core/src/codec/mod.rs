//! The codec (spec §4.C): XOR-based encode and iterative decode over
//! an object buffer laid out as `d` data blocks followed by `c` check
//! blocks, each `B` bytes (spec §3 Object layout).

use crate::graph::Graph;

/// A bitset over the `d + c` block positions of one object.
#[derive(Debug, Clone)]
pub struct Mask {
    bits: Vec<bool>,
}

impl Mask {
    pub fn new(len: usize) -> Self {
        Self { bits: vec![false; len] }
    }

    pub fn all_present(len: usize) -> Self {
        Self { bits: vec![true; len] }
    }

    pub fn get(&self, i: usize) -> bool {
        self.bits[i]
    }

    pub fn set(&mut self, i: usize, present: bool) {
        self.bits[i] = present;
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn missing(&self) -> Vec<usize> {
        self.bits.iter().enumerate().filter(|(_, &p)| !p).map(|(i, _)| i).collect()
    }
}

fn block_mut(buf: &mut [u8], pos: usize, block_size: usize) -> &mut [u8] {
    &mut buf[pos * block_size..(pos + 1) * block_size]
}

fn block(buf: &[u8], pos: usize, block_size: usize) -> &[u8] {
    &buf[pos * block_size..(pos + 1) * block_size]
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

/// Build every check block from the (fully populated) data region.
/// Requires the check region to start zeroed.
pub fn encode(graph: &Graph, buf: &mut [u8], block_size: usize) {
    for j in 0..graph.c() {
        let members: Vec<usize> = graph.members_of(j).to_vec();
        let mut acc = vec![0u8; block_size];
        for i in members {
            xor_into(&mut acc, block(buf, i, block_size));
        }
        block_mut(buf, graph.d() + j, block_size).copy_from_slice(&acc);
    }
}

/// Iteratively reconstruct missing positions per spec §4.C. On success
/// every bit of `mask` is set; on failure returns the still-missing
/// positions (the object is irrecoverable).
pub fn decode(graph: &Graph, buf: &mut [u8], mask: &mut Mask, block_size: usize) -> Result<(), Vec<usize>> {
    let d = graph.d();
    let c = graph.c();
    debug_assert_eq!(mask.len(), d + c);

    loop {
        let mut progressed = false;

        // Pass 1: data from one check.
        for i in 0..d {
            if mask.get(i) {
                continue;
            }
            let j = graph.check_for(i);
            if !mask.get(d + j) {
                continue;
            }
            let others_present = graph
                .members_of(j)
                .iter()
                .all(|&k| k == i || mask.get(k));
            if !others_present {
                continue;
            }
            let mut acc = block(buf, d + j, block_size).to_vec();
            for &k in graph.members_of(j) {
                if k != i {
                    xor_into(&mut acc, block(buf, k, block_size));
                }
            }
            block_mut(buf, i, block_size).copy_from_slice(&acc);
            mask.set(i, true);
            progressed = true;
        }

        // Pass 2: check from all data.
        for j in 0..c {
            if mask.get(d + j) {
                continue;
            }
            let members = graph.members_of(j);
            if !members.iter().all(|&k| mask.get(k)) {
                continue;
            }
            let mut acc = vec![0u8; block_size];
            for &k in members {
                xor_into(&mut acc, block(buf, k, block_size));
            }
            block_mut(buf, d + j, block_size).copy_from_slice(&acc);
            mask.set(d + j, true);
            progressed = true;
        }

        if mask.missing().is_empty() {
            return Ok(());
        }
        if !progressed {
            return Err(mask.missing());
        }
    }
}
