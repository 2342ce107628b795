//! Domain events and the envelope that carries them over the broker.
//!
//! Domain services describe each committed state change as a [`DomainEvent`].
//! The publisher wraps it in an [`EventEnvelope`] whose `EventType` field is the
//! routing discriminator. Consumers never decode the payload back into a typed
//! event; they inspect a handful of well-known field names instead.

mod domain;
mod envelope;

pub use domain::{DomainEvent, EventKind, EventType, UnknownEventType, SYSTEM_ACTOR};
pub use envelope::EventEnvelope;
