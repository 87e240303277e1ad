//! # Connection handling
//!
//! One [`driver::Connection`] owns each accepted stream and drives the
//! HTTP/1.1 cycle end to end: read header → route → read body → run the
//! aspect chain and handler → write the response. The driver coroutine
//! is the connection's sequencer; everything that touches connection
//! state runs on it or is totally ordered through it.
//!
//! Handlers see the request through a shared [`Task`] handle, and
//! long-lived responses stream through the per-connection
//! [`write_queue::WriteQueue`] once manual connection management is
//! latched.

mod driver;
mod task;
mod write_queue;

pub(crate) use driver::Connection;
pub use task::Task;
