use thiserror::Error;

/// Errors surfaced by the block-layer engine.
///
/// Variants map 1:1 onto the taxonomy in the specification: the first
/// group is returned to the client, the last group is fatal to the
/// process. Per-block connect/transport/length/hash failures are never
/// represented here — the transfer engine retries those internally and
/// only ever flips a bit in a mask.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("plaintext length has no supported (d, c) derivation")]
    UnsupportedSize,

    #[error("malformed URI: {0}")]
    MalformedUri(String),

    #[error("object irrecoverable, missing positions: {missing:?}")]
    Irrecoverable { missing: Vec<usize> },

    #[error("integrity check failed: {0}")]
    Integrity(&'static str),

    #[error("client I/O error: {0}")]
    ClientIo(#[from] std::io::Error),

    #[error("routing ring is empty")]
    EmptyRing,

    #[error("duplicate remove: {0} is not a member of the ring")]
    DuplicateRemove(std::net::SocketAddr),

    #[error("selector failure: {0}")]
    SelectorFailure(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
