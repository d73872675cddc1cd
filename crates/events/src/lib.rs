//! Engine events and their distribution mechanics.
//!
//! The engine publishes committed changes so excluded collaborators (POS,
//! receiving, reporting) can react without polling the store.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
