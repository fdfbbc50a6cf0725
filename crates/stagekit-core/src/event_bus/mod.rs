//! Event bus for stage client observability.
//!
//! Carries connection lifecycle changes, the wire transcript, and
//! out-of-band device errors to any number of observers.

mod bus;
mod events;

pub use bus::{EventBus, EventBusConfig, EventFilter, SubscriptionId};
pub use events::{
    ConnectionEvent, DeviceEvent, EventCategory, LineDirection, StageEvent, TranscriptEntry,
};
