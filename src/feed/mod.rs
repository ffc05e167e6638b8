//! Canonical market/order event stream shared by all venue adapters.

pub mod events;
pub mod mux;

pub use events::{CanonicalEvent, DoneReason, VenueEvent};
pub use mux::EventMux;
