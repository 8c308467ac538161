//! Feed acquisition and normalization: the refresh orchestrator, the
//! RSS/Atom document parser, media classification, OPML import/export and
//! the interval scheduler.

pub mod media;
pub mod opml;
mod parser;
mod refresh;
pub mod scheduler;

pub use media::{classify, MediaEntry, MediaKind};
pub use parser::{parse_document, parse_feed_text, ParseError, ParsedFeed};
pub use refresh::{
    EngineOptions, FeedRefreshOutcome, RefreshEngine, RefreshError, RefreshReport,
};
