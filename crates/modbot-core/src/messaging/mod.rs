//! Transport abstraction and the outbound queue.

pub mod port;
pub mod queue;
pub mod sender;
pub mod throttled;
pub mod types;
