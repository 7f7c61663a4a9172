//! Test support for the outrigger workspace.
//!
//! Features:
//! - [`FlakyStore`] — a [`DocumentStore`](outrigger::DocumentStore) wrapper
//!   with scriptable one-shot failures per operation kind, for exercising
//!   lock-bookkeeping failure paths.
//! - [`delivered`] — fluent construction of
//!   [`DeliveredMessage`](outrigger::DeliveredMessage)s for batch tests
//!   without a real queue round-trip.

mod message;
mod store;

pub use message::{DeliveredMessageBuilder, delivered};
pub use store::{FlakyStore, StoreOp};
