//! Cross-context message bus
//!
//! A broadcast channel carrying configuration updates from the application
//! context to the interception context. Delivery is at-most-once: nothing is
//! acknowledged, a message published while nobody listens is dropped, and a
//! subscriber that falls behind loses the oldest messages. Ordering is FIFO
//! per sender only.

mod channel;
mod error;
mod message;

pub use channel::{BusEnvelope, BusSubscription, MessageBus};
pub use error::BusError;
pub use message::{BusMessage, Inbound, MessageKind};
