//! pacPrism — semi-decentralized package distribution gateway.
//!
//! Sits between APT-style clients and an upstream mirror: serves files from
//! an on-disk cache with range and conditional-request semantics, fetches
//! and backfills on miss, and maintains an in-memory DHT of peer nodes that
//! serve shards of the repository.

pub mod cache;
pub mod config;
pub mod dht;
pub mod fetch;
pub mod http;
pub mod package;
pub mod router;
pub mod server;
pub mod validator;

use once_cell::sync::Lazy;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identity string used in the Server header and the upstream User-Agent.
pub static SERVER_IDENT: Lazy<String> = Lazy::new(|| format!("pacPrism/{VERSION}"));

pub use cache::{CacheError, FileCache};
pub use config::Config;
pub use dht::{Dht, DhtEntry, Shard};
pub use fetch::{FetchClient, FetchError};
pub use http::{Body, HttpVersion, Request, Response};
pub use router::Router;
pub use validator::{AcceptAllVerifier, NodeVerifier, RequestType, Validator};
