//! Ordered streaming of out-of-band response frames.

use std::collections::VecDeque;
use std::sync::{Mutex, Weak};

use may::sync::mpsc;
use tracing::debug;

use super::driver::Connection;

/// One queued write: a header snapshot or a body chunk, pre-encoded.
#[derive(Clone)]
pub(crate) enum StreamFrame {
    Header(std::sync::Arc<[u8]>),
    Chunk(std::sync::Arc<[u8]>),
}

impl StreamFrame {
    fn bytes(&self) -> &[u8] {
        match self {
            StreamFrame::Header(b) | StreamFrame::Chunk(b) => b,
        }
    }
}

struct QueueState {
    items: VecDeque<StreamFrame>,
    /// Writer baton: exactly one caller drains at a time.
    writing: bool,
    dead: bool,
    waiters: Vec<mpsc::Sender<()>>,
}

/// FIFO of streamed frames for one connection.
///
/// Enqueue order is arrival order at the queue lock; the first enqueuer
/// becomes the writer and drains until the queue empties. The queue only
/// holds a weak reference to its connection so it never extends the
/// driver's life.
pub(crate) struct WriteQueue {
    conn: Weak<Connection>,
    state: Mutex<QueueState>,
}

impl WriteQueue {
    pub(crate) fn new(conn: Weak<Connection>) -> Self {
        Self {
            conn,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                writing: false,
                dead: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// Enqueue a frame. Dropped silently once the queue is dead. The
    /// frame is written in arrival order; a frame is only dequeued after
    /// its write completed, so drain waiters never observe in-flight
    /// bytes as "sent".
    pub(crate) fn push(&self, frame: StreamFrame) {
        let mut state = self.state.lock().unwrap();
        if state.dead {
            return;
        }
        state.items.push_back(frame);
        if state.writing {
            return;
        }

        state.writing = true;
        while !state.dead {
            let Some(front) = state.items.front().cloned() else {
                break;
            };
            drop(state);
            let ok = self.write_frame(&front);
            state = self.state.lock().unwrap();
            if ok {
                state.items.pop_front();
            } else {
                state.dead = true;
                state.items.clear();
            }
        }
        state.writing = false;
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn write_frame(&self, frame: &StreamFrame) -> bool {
        let Some(conn) = self.conn.upgrade() else {
            return false;
        };
        match conn.write_raw(frame.bytes()) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "streamed write failed");
                conn.close();
                false
            }
        }
    }

    /// Mark the queue dead, drop everything queued, and release waiters.
    pub(crate) fn mark_dead(&self) {
        let mut state = self.state.lock().unwrap();
        state.dead = true;
        state.items.clear();
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// Block until the queue is empty or dead. Returns `false` when the
    /// connection died underneath the queue.
    pub(crate) fn wait_drained(&self) -> bool {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if state.dead {
                return false;
            }
            if state.items.is_empty() && !state.writing {
                return true;
            }
            let (tx, rx) = mpsc::channel();
            state.waiters.push(tx);
            rx
        };
        let _ = rx.recv();
        !self.state.lock().unwrap().dead
    }
}
