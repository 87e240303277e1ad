//! # Server facade
//!
//! Lifecycle, configuration gating, and the glue between components.
//!
//! A [`Server`] is either *Stopped* or *Running*. Configuration
//! (routes, aspects, limits, timeouts, TLS, logger, session policy,
//! listeners) is accepted only while stopped; every setter is a silent
//! chainable no-op (or returns `false`) while running. [`Server::start`]
//! builds the worker pool, binds the configured listeners, and spawns
//! one acceptor coroutine per listener; [`Server::stop`] tears all of
//! that down and re-opens the configuration gate, keeping the endpoints
//! for the next start.

mod core;
mod worker_pool;

pub use self::core::Server;
pub(crate) use worker_pool::WorkerPool;
