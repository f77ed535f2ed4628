#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod graph;
pub mod membership;
pub mod object;
pub mod ring;
pub mod server;
pub mod transfer;
pub mod uri;

pub use config::CoreConfig;
pub use crypto::{Crypto, DefaultCrypto, Digest, HASH_LEN};
pub use error::{CoreError, Result};
pub use graph::{derive_sizing, Graph, GraphTable, Sizing, G_MAX};
pub use ring::{Offset, RoutingRing};
pub use uri::Uri;
