//! feedcycle: a feed synchronization engine.
//!
//! Fetches RSS/Atom feeds through an unreliable, CORS-constrained network
//! path: proxy candidates are ranked by time-decayed success statistics,
//! rate-limited feeds back off exponentially, responses are cached for
//! stale fallback, and heterogeneous feed dialects normalize into one
//! post model whose read/favorite flags survive re-ingestion.

pub mod app;
pub mod config;
pub mod feed;
pub mod fetch;
pub mod proxy;
pub mod storage;
pub mod util;

pub use app::App;
pub use config::Config;
