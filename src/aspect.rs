//! Aspects: paired pre/post interceptors executed around a handler.
//!
//! The pre pass runs in registration order, then the handler, then the
//! post pass in reverse order. Aspects cannot abort the chain; they
//! influence control flow only by mutating the [`Task`](crate::Task)
//! (for example writing a response and latching manual connection
//! management).

use std::sync::Arc;

use crate::connection::Task;

/// A pre/post interceptor. Both methods default to no-ops so an aspect
/// may implement only the side it cares about.
pub trait Aspect: Send + Sync {
    /// Runs before the handler, in registration order.
    fn pre(&self, _task: Arc<Task>) {}

    /// Runs after the handler, in reverse registration order.
    fn post(&self, _task: Arc<Task>) {}
}

/// Adapter building an aspect from a pair of closures.
pub struct FnAspect<P, Q> {
    pre_fn: P,
    post_fn: Q,
}

impl<P, Q> FnAspect<P, Q>
where
    P: Fn(Arc<Task>) + Send + Sync,
    Q: Fn(Arc<Task>) + Send + Sync,
{
    pub fn new(pre_fn: P, post_fn: Q) -> Self {
        Self { pre_fn, post_fn }
    }
}

impl<P, Q> Aspect for FnAspect<P, Q>
where
    P: Fn(Arc<Task>) + Send + Sync,
    Q: Fn(Arc<Task>) + Send + Sync,
{
    fn pre(&self, task: Arc<Task>) {
        (self.pre_fn)(task)
    }

    fn post(&self, task: Arc<Task>) {
        (self.post_fn)(task)
    }
}
