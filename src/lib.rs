//! crossbot - cross-venue spot arbitrage engine.
//!
//! Watches one trading pair on two spot exchanges, posts a passive maker
//! order on whichever venue prices worse, and covers fills aggressively on
//! the other. Everything flows through one canonical event stream; venue
//! vocabulary never leaves the adapter layer.

pub mod book;
pub mod config;
pub mod engine;
pub mod feed;
pub mod model;
pub mod strategy;
pub mod venue;
