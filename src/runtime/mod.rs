//! Process lifecycle: root scope, OS signals, and the request bridge.
//!
//! Internal modules:
//! - [`shutdown`]: cross-platform termination-signal wait;
//! - [`main_scope`]: the once-per-process root scope lifecycle;
//! - [`request_scope`]: per-call isolation over a shared lazily-started root.

mod main_scope;
mod request_scope;
mod shutdown;

pub use main_scope::run_main_scope;
pub use request_scope::run_request_scope;
