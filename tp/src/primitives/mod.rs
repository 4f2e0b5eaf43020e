//! Leaf primitives consumed by the queues
//!
//! - [`wait`] - resume after a fixed duration
//! - [`RemoveBy`] - remove and return every element matching a predicate
//! - [`ResettableSignal`] - set-once, read-many, re-armable value

mod delay;
mod signal;
mod splice;

pub use delay::wait;
pub use signal::ResettableSignal;
pub use splice::RemoveBy;
