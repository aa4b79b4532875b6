//! Intent governance pipeline.
//!
//! Raw signals come out of the extractor in unbounded volume; the steward
//! decides which become user-visible cards; clustering groups cards into
//! themes. Only the steward creates or mutates cards, and its runs are
//! serialized per workspace.

mod cluster;
mod extractor;
mod steward;

pub use cluster::IntentClusterer;
pub use extractor::{ExtractSource, IntentExtractor};
pub use steward::{IntentSteward, StewardConfig};
