/// Status feed abstraction and its HTTP implementation
pub mod feed;
pub mod parse;
/// Per-provider polling loop
pub mod status_poller;

pub use feed::{CacheValidators, FeedFuture, HttpFeed, IncidentsResponse, StatusFeed};
pub use parse::{parse_incidents, parse_summary, ParsedSummary};
pub use status_poller::{PollerHandle, PollerPhase, PollerStats, StatusPoller, TickOutcome};
