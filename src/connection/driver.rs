//! The per-connection driver: owns one stream and runs the request
//! cycle on a dedicated coroutine.
//!
//! That coroutine is the connection's sequencer. Reads, routing, the
//! wait for each aspect/handler step, and the response write all happen
//! on it, one at a time, so every step observes the effects of the
//! previous one. CPU work itself runs on the server worker pool; the
//! driver ships each step over and blocks on its reply channel.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use may::sync::mpsc;
use tracing::{debug, error, trace, warn};
use ulid::Ulid;

use super::task::{Finalize, Task};
use super::write_queue::{StreamFrame, WriteQueue};
use crate::message::{Request, ResponseHead};
use crate::router::RouteResult;
use crate::server::Server;
use crate::transport::{HttpStream, TransportError};

/// Zero means "no deadline".
fn deadline(ms: u64) -> Option<Duration> {
    (ms != 0).then(|| Duration::from_millis(ms))
}

/// One accepted stream and everything needed to drive it.
///
/// Reference counting keeps the connection alive across asynchronous
/// boundaries: the driver coroutine, the in-flight task, and any
/// streaming continuation each hold a strong handle, while the write
/// queue holds a weak one.
pub(crate) struct Connection {
    id: Ulid,
    server: Arc<Server>,
    stream: may::sync::Mutex<Box<dyn HttpStream>>,
    closed: AtomicBool,
    queue: WriteQueue,
}

impl Connection {
    /// Take ownership of `stream` and spawn the driver coroutine.
    pub(crate) fn spawn(server: Arc<Server>, stream: Box<dyn HttpStream>) {
        let stack_size = server.coroutine_stack_size();
        let conn = Arc::new_cyclic(|weak| Connection {
            id: Ulid::new(),
            server,
            stream: may::sync::Mutex::new(stream),
            closed: AtomicBool::new(false),
            queue: WriteQueue::new(weak.clone()),
        });

        let spawned = unsafe {
            may::coroutine::Builder::new()
                .stack_size(stack_size)
                .spawn(move || conn.run())
        };
        if let Err(e) = spawned {
            error!(error = %e, "failed to spawn connection driver");
        }
    }

    pub(crate) fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Close the connection: mark it dead, release queue waiters, and
    /// shut the socket down when nobody is mid-operation on it (a
    /// blocked read notices via its deadline or the dropped stream).
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.mark_dead();
        if let Ok(mut stream) = self.stream.try_lock() {
            stream.shutdown();
        }
    }

    /// Write raw bytes to the stream, totally ordered by the stream
    /// lock.
    pub(crate) fn write_raw(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.stream.lock().unwrap().write_all(bytes)
    }

    pub(crate) fn flush_header(&self, head: ResponseHead) {
        self.queue.push(StreamFrame::Header(head.encode().into()));
    }

    pub(crate) fn flush_chunk(&self, bytes: Vec<u8>) {
        self.queue.push(StreamFrame::Chunk(bytes.into()));
    }

    /// The driver loop. Each iteration is one request/response cycle.
    fn run(self: Arc<Self>) {
        let conn_id = self.id.to_string();
        trace!(conn_id = %conn_id, "connection open");
        let mut first_cycle = true;

        loop {
            if !self.server.is_running() || !self.is_open() {
                break;
            }

            // ReadingHeader. Subsequent cycles wait out the keep-alive
            // window on top of the header budget.
            let header_expiry = self.server.header_read_expiry();
            let keep_alive_ms = self.server.keep_alive_timeout();
            let read_budget = if first_cycle {
                header_expiry
            } else {
                header_expiry.saturating_add(keep_alive_ms)
            };

            let head = {
                let mut stream = self.stream.lock().unwrap();
                if stream.set_read_deadline(deadline(read_budget)).is_err() {
                    break;
                }
                match stream.read_head() {
                    Ok(head) => head,
                    Err(TransportError::Closed) => {
                        trace!(conn_id = %conn_id, "peer closed");
                        break;
                    }
                    Err(e) => {
                        debug!(conn_id = %conn_id, error = %e, "header read failed");
                        break;
                    }
                }
            };

            // Routing. Never fails: misses carry the default handler.
            let route = self.server.route(&head.method, &head.target);
            trace!(
                conn_id = %conn_id,
                method = %head.method,
                target = %head.target,
                location = %route.location,
                "routed"
            );

            // ReadingBody under the route's limits.
            let body = {
                let mut stream = self.stream.lock().unwrap();
                if stream
                    .set_read_deadline(deadline(route.read_expiry_ms))
                    .is_err()
                {
                    break;
                }
                let _ = stream.set_write_deadline(deadline(route.write_expiry_ms));
                match stream.read_body(&head, route.max_body_size) {
                    Ok(body) => body,
                    Err(e) => {
                        debug!(conn_id = %conn_id, error = %e, "body read failed");
                        break;
                    }
                }
            };

            // Serving.
            let request = Request {
                method: head.method,
                target: head.target,
                version_minor: head.version_minor,
                headers: head.headers,
                body,
            };
            let (finalize_tx, finalize_rx) = mpsc::channel();
            let task = Arc::new(Task::new(request, &route, self.clone(), finalize_tx));
            self.run_chain(&route, &task);
            drop(task);

            // Writing, once the last task handle has finalized.
            match finalize_rx.recv() {
                Ok(Finalize::Dispatch {
                    response,
                    keep_alive,
                }) => {
                    if !self.server.is_running() || !self.is_open() {
                        break;
                    }
                    let bytes = response.encode(keep_alive, keep_alive_ms);
                    if let Err(e) = self.write_raw(&bytes) {
                        debug!(conn_id = %conn_id, error = %e, "response write failed");
                        break;
                    }
                    if !keep_alive {
                        break;
                    }
                    // Drain any streamed frames before reusing the
                    // stream for the next cycle.
                    if !self.queue.wait_drained() {
                        break;
                    }
                    first_cycle = false;
                }
                Ok(Finalize::Disown) => {
                    debug!(conn_id = %conn_id, "manual connection management engaged");
                    return;
                }
                Err(_) => break,
            }
        }

        self.close();
        trace!(conn_id = %conn_id, "connection closed");
    }

    /// Pre pass in ascending order, the handler, post pass descending.
    /// Each step runs on the worker pool; the driver waits for its reply
    /// before shipping the next one, preserving per-connection order.
    fn run_chain(&self, route: &RouteResult, task: &Arc<Task>) {
        for (index, aspect) in route.aspects.iter().enumerate() {
            let aspect = aspect.clone();
            let task = task.clone();
            self.run_step("pre", index, move || aspect.pre(task));
        }

        let handler = route.handler.clone();
        let handler_task = task.clone();
        self.run_step("service", 0, move || handler.service(handler_task));

        for (index, aspect) in route.aspects.iter().enumerate().rev() {
            let aspect = aspect.clone();
            let task = task.clone();
            self.run_step("post", index, move || aspect.post(task));
        }
    }

    fn run_step(&self, stage: &'static str, index: usize, step: impl FnOnce() + Send + 'static) {
        let (tx, rx) = mpsc::channel();
        let posted = self.server.post(move || {
            let ok = catch_unwind(AssertUnwindSafe(step)).is_ok();
            let _ = tx.send(ok);
        });
        if !posted {
            debug!(stage, index, "step dropped: server not running");
            return;
        }
        match rx.recv() {
            Ok(true) => {}
            Ok(false) => warn!(stage, index, "request step panicked, continuing chain"),
            Err(_) => warn!(stage, index, "request step lost: worker pool shut down"),
        }
    }
}
