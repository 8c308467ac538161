//! Proxy candidate selection: a registry of CORS proxy templates ranked
//! by time-decayed success/failure statistics, with cooldown-based
//! disabling for proxies that just failed.

mod registry;
mod scoring;

pub use registry::{
    builtin_proxies, NamedProxy, ProxyCandidate, ProxyKind, ProxyRegistry,
};
