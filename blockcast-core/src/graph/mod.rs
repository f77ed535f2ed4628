//! The graph table (spec §4.B): derives `(d, c, B)` from a plaintext
//! length and exposes the bipartite adjacency `G_d` used by the codec.
//!
//! `G_d` must be "identical across all proxies" and "compiled-in."
//! Rather than ship a literal bitmatrix for every `d` in `[1,
//! G_max]` (`G_max` of them, each up to `G_max` bits wide), this crate
//! expresses `G_d` as a pure, deterministic function of `d` — a
//! partition/parity-group code, §4.B in SPEC_FULL.md — and memoizes
//! the constructed bitmatrix per `d` the first time it's requested.
//! Any two proxies evaluating the same formula produce the same
//! graph, satisfying the reproducibility requirement without an actual
//! compiled-in array.

use std::sync::{Mutex, OnceLock};

/// Largest supported data-block count.
pub const G_MAX: usize = 256;

/// Bipartite adjacency between `d` data-block positions and `c`
/// check-block positions. `set(i, j)` means data block `i`
/// contributes (by XOR) to check block `j`.
#[derive(Debug, Clone)]
pub struct Graph {
    d: usize,
    c: usize,
    /// `data_to_check[i]` is the single check block data block `i`
    /// feeds, per the partition construction.
    data_to_check: Vec<usize>,
    /// `check_members[j]` lists every data block that feeds check `j`.
    check_members: Vec<Vec<usize>>,
}

impl Graph {
    fn build(d: usize) -> Self {
        let c = check_count(d);
        let mut data_to_check = vec![0usize; d];
        let mut check_members = vec![Vec::new(); c];
        for i in 0..d {
            let j = i % c;
            data_to_check[i] = j;
            check_members[j].push(i);
        }
        Self { d, c, data_to_check, check_members }
    }

    pub fn d(&self) -> usize {
        self.d
    }

    pub fn c(&self) -> usize {
        self.c
    }

    /// `set(G, i, j)`: does data block `i` contribute to check block `j`?
    pub fn set(&self, i: usize, j: usize) -> bool {
        i < self.d && j < self.c && self.data_to_check[i] == j
    }

    /// The check block that data block `i` feeds.
    pub fn check_for(&self, i: usize) -> usize {
        self.data_to_check[i]
    }

    /// Every data block feeding check block `j`.
    pub fn members_of(&self, j: usize) -> &[usize] {
        &self.check_members[j]
    }
}

fn check_count(d: usize) -> usize {
    // c(d) = ceil(d / 4), at least 1.
    1.max((d + 3) / 4)
}

/// Memoized, thread-safe cache of constructed graphs, one per `d`.
pub struct GraphTable {
    cache: Mutex<Vec<Option<std::sync::Arc<Graph>>>>,
}

fn table() -> &'static GraphTable {
    static TABLE: OnceLock<GraphTable> = OnceLock::new();
    TABLE.get_or_init(|| GraphTable { cache: Mutex::new(vec![None; G_MAX]) })
}

impl GraphTable {
    /// Look up (building and memoizing if necessary) `G_d` for `d in
    /// [1, G_MAX]`. Returns `None` for an out-of-range `d`.
    pub fn get(d: usize) -> Option<std::sync::Arc<Graph>> {
        if d == 0 || d > G_MAX {
            return None;
        }
        let table = table();
        let mut cache = table.cache.lock().expect("graph cache poisoned");
        let slot = &mut cache[d - 1];
        if slot.is_none() {
            *slot = Some(std::sync::Arc::new(Graph::build(d)));
        }
        slot.clone()
    }
}

/// Derived sizing parameters for an object of plaintext length `L`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizing {
    pub d: usize,
    pub c: usize,
    pub block_size: usize,
    /// `L + (16 - L mod 16)`, the padded plaintext length (always a
    /// positive multiple of 16, even when `L` is itself a multiple of
    /// 16 — the trailing padding block is never empty).
    pub padded_len: usize,
}

fn padded_len(l: usize) -> usize {
    let rem = l % 16;
    l + (16 - rem)
}

/// `⌈64·√L⌉`, the spec's base block-size estimate.
fn base_block_size(l: usize) -> usize {
    let sqrt = (l as f64).sqrt();
    (64.0 * sqrt).ceil() as usize
}

/// Derive `(d, c, B)` for a plaintext of length `l` bytes, per spec
/// §4.B: `d = L / ⌈64·√L⌉`, reject if `d == 0 || d > G_max`, then
/// inflate `B` upward (starting from the base estimate) until
/// `d·B ≥ L + (16 − L mod 16)`.
pub fn derive_sizing(l: usize) -> Option<Sizing> {
    if l == 0 {
        return None;
    }
    let base = base_block_size(l).max(1);
    let d = l / base;
    if d == 0 || d > G_MAX {
        return None;
    }
    let graph = GraphTable::get(d)?;
    let padded = padded_len(l);
    let mut b = base;
    while d * b < padded {
        b += 1;
    }
    Some(Sizing { d, c: graph.c(), block_size: b, padded_len: padded })
}
