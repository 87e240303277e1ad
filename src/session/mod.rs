//! # Sessions
//!
//! Keyed session storage with sliding TTL expiry.
//!
//! A session is a [`Context`](crate::Context) owned by the server and
//! looked up by a generated id. Expiry bookkeeping uses a min-heap of
//! `(expiry, id)` entries that tolerates stale duplicates: extending a
//! session pushes a new heap entry, and pops discard entries whose
//! expiry no longer matches the live one. Cleanup is amortized into the
//! accessors, with an optional background sweep driven by the server.

mod map;

pub use map::SessionMap;
