//! Scope-bound synchronization primitives.
//!
//! Internal modules:
//! - [`signal`]: [`SignalController`], a single-assignment future;
//! - [`broadcast`]: [`BroadcastController`], no-replay event fan-out;
//! - [`queue`]: [`HandlingQueue`], bounded FIFO with backpressure;
//! - [`pool`]: [`ResourcePool`], keyed ref-counted resource sharing.

mod broadcast;
mod pool;
mod queue;
mod signal;

pub use broadcast::{BroadcastController, Subscription};
pub use pool::{Allocated, ResourcePool};
pub use queue::HandlingQueue;
pub use signal::SignalController;
