//! Timeline event protocol for the weft core.
//!
//! Wire shape for one timeline event: a `kind` tag plus payload fields, with an
//! envelope (`workspace_id`, `session_id`, `seq`) applied separately so the same
//! payload types serve both the durable event log and streaming consumers.

mod envelope;
mod event;

pub use envelope::{Envelope, EnvelopeState};
pub use event::{event_kind, WireEvent};
