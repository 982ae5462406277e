//! The dialog session engine.
//!
//! Everything between an inbound message and an outbound reply: identity
//! resolution, per-dialog serialization, overflow recovery, and streaming
//! aggregation.

pub mod completion;
pub mod guard;
pub mod identity;
pub mod overflow;
pub mod stream;

pub use guard::ActiveDialogs;
pub use identity::TrackingMode;
pub use overflow::DecisionOutcome;
pub use stream::ReplySink;
