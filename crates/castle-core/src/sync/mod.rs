//! Concurrency and queue primitives used by sessions.
//!
//! - [`Lock`]: async mutual exclusion around a session's mutable state
//! - [`AsyncList`]: ordered FIFO list shared between tasks
//! - [`AsyncValue`]: versioned value that tasks can wait on
//! - [`Resolvable`]: one-shot signal resolved at most once
//!
//! None of these spawn tasks or depend on a runtime; they only need
//! `tokio::sync`.

mod async_list;
mod async_value;
mod lock;
mod resolvable;

pub use async_list::AsyncList;
pub use async_value::AsyncValue;
pub use lock::Lock;
pub use resolvable::Resolvable;
