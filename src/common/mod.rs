//! Shared building blocks: errors, data model, capability traits, clock, refresher and event bus

pub mod clock;
pub mod errors;
pub mod events;
pub mod notifier;
pub mod refresher;
pub mod traits;
pub mod types;
