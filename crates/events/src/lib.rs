//! Run lifecycle events for stackcheck
//!
//! The sequencer and server manager publish here; observers (the CLI's
//! event log) subscribe. Nothing on the bus feeds back into control flow.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
