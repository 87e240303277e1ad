//! The per-request handle exposed to handlers and aspects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use http::{HeaderName, HeaderValue, Method, StatusCode};
use may::sync::mpsc;
use once_cell::sync::OnceCell;
use tracing::trace;
use uuid::Uuid;

use super::driver::Connection;
use crate::context::Context;
use crate::cookie::{CookieJar, SetCookie};
use crate::logging::LogLevel;
use crate::message::{Request, Response, ResponseHead};
use crate::router::{ParamVec, RouteResult};
use crate::server::Server;

/// Canonical session cookie name. The request-side scan is
/// case-insensitive; the response always writes this exact form.
const SESSION_COOKIE: &str = "sessionId";

/// What the driver learns when the last task handle drops.
pub(crate) enum Finalize {
    /// Write this response, then keep the cycle going (or close).
    Dispatch { response: Response, keep_alive: bool },
    /// Manual management was latched: leave the stream alone, the
    /// handler owns the connection now.
    Disown,
}

/// A single request in flight.
///
/// The driver hands an `Arc<Task>` to every aspect and to the handler;
/// continuations may clone it and outlive the synchronous call. When the
/// last handle drops, the task finalizes: pending cookies are serialized
/// onto the response and the connection's driver takes over. If manual
/// connection management was latched, the task steps aside entirely
/// instead.
pub struct Task {
    request: Request,
    location: String,
    parameters: ParamVec,
    conn: Arc<Connection>,
    server: Arc<Server>,
    response: Mutex<Response>,
    pending_cookies: Mutex<Vec<SetCookie>>,
    keep_alive: AtomicBool,
    manual: AtomicBool,
    jar: OnceCell<CookieJar>,
    session_id: OnceCell<String>,
    finalize: Mutex<Option<mpsc::Sender<Finalize>>>,
}

impl Task {
    pub(crate) fn new(
        request: Request,
        route: &RouteResult,
        conn: Arc<Connection>,
        finalize: mpsc::Sender<Finalize>,
    ) -> Self {
        let keep_alive = request.wants_keep_alive();
        let server = conn.server().clone();
        Self {
            request,
            location: route.location.clone(),
            parameters: route.parameters.clone(),
            conn,
            server,
            response: Mutex::new(Response::new()),
            pending_cookies: Mutex::new(Vec::new()),
            keep_alive: AtomicBool::new(keep_alive),
            manual: AtomicBool::new(false),
            jar: OnceCell::new(),
            session_id: OnceCell::new(),
            finalize: Mutex::new(Some(finalize)),
        }
    }

    // ---- request side -------------------------------------------------

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn target(&self) -> &str {
        &self.request.target
    }

    pub fn body(&self) -> &[u8] {
        &self.request.body
    }

    /// Concretized matched route path; parameter slots carry the actual
    /// captured text.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Captured parametric segments, left to right.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Request cookie by exact name. Parsed lazily on first access.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.jar().get(name).map(str::to_string)
    }

    fn jar(&self) -> &CookieJar {
        self.jar
            .get_or_init(|| CookieJar::from_headers(&self.request.headers))
    }

    /// The session id for this request.
    ///
    /// Scans the cookies case-insensitively for `sessionId`; when absent
    /// a fresh UUID is generated, memoized, and queued for write-back so
    /// the response carries it exactly once.
    pub fn session_id(&self) -> String {
        self.session_id
            .get_or_init(|| {
                if let Some(existing) = self.jar().get_ignore_case(SESSION_COOKIE) {
                    return existing.to_string();
                }
                let id = Uuid::new_v4().to_string();
                trace!(session_id = %id, "generated session id");
                self.pending_cookies
                    .lock()
                    .unwrap()
                    .push(SetCookie::new().name(SESSION_COOKIE).value(id.clone()));
                id
            })
            .clone()
    }

    /// The session context behind [`session_id`](Self::session_id),
    /// created on first use and kept alive by its sliding expiry.
    pub fn session(&self) -> Arc<Context> {
        self.server.session(&self.session_id())
    }

    /// Extend the session's expiry window.
    pub fn set_session_timeout(&self, timeout_ms: u64) -> bool {
        self.server.set_session_timeout(&self.session_id(), timeout_ms)
    }

    /// The server-wide context.
    pub fn server_context(&self) -> Arc<Context> {
        self.server.context()
    }

    // ---- response side ------------------------------------------------

    pub fn set_status(&self, status: StatusCode) {
        self.response.lock().unwrap().status = status;
    }

    pub fn set_body(&self, body: Vec<u8>) {
        self.response.lock().unwrap().body = body;
    }

    pub fn append_body(&self, bytes: &[u8]) {
        self.response.lock().unwrap().body.extend_from_slice(bytes);
    }

    /// Set a response header, replacing previous values of the name.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.response.lock().unwrap().headers.insert(name, value);
    }

    /// Append a response header, keeping previous values.
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.response.lock().unwrap().headers.append(name, value);
    }

    /// Set a response header from raw strings. Returns `false` when
    /// either part is not a legal header token.
    pub fn set_header_str(&self, name: &str, value: &str) -> bool {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            return false;
        };
        self.set_header(name, value);
        true
    }

    /// Queue a `Set-Cookie` for finalization. Builders that serialize to
    /// the empty string are dropped at that point.
    pub fn add_cookie(&self, cookie: SetCookie) {
        self.pending_cookies.lock().unwrap().push(cookie);
    }

    pub fn set_keep_alive(&self, keep_alive: bool) {
        self.keep_alive.store(keep_alive, Ordering::SeqCst);
    }

    /// Latch manual connection management: the accumulated response is
    /// not written, the driver stops advancing, and the handler owns the
    /// stream until it calls [`close`](Self::close). The latch cannot be
    /// cleared.
    pub fn set_manual_management(&self) {
        self.manual.store(true, Ordering::SeqCst);
    }

    pub fn is_manual_management(&self) -> bool {
        self.manual.load(Ordering::SeqCst)
    }

    // ---- streaming ----------------------------------------------------

    /// Stream a header snapshot out of band, through the connection's
    /// write queue.
    pub fn write_header(&self, head: ResponseHead) {
        self.conn.flush_header(head);
    }

    /// Stream a body chunk out of band.
    pub fn write_body(&self, bytes: Vec<u8>) {
        self.conn.flush_chunk(bytes);
    }

    // ---- async & misc -------------------------------------------------

    /// Post work to the server's worker pool. No-op when stopped.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.server.post(job)
    }

    /// One-shot timer on the server runtime. No-op when stopped.
    pub fn set_timer(&self, timeout_ms: u64, callback: impl FnOnce() + Send + 'static) -> bool {
        self.server.set_timer(timeout_ms, callback)
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.server.log(level, message);
    }

    /// Whether the server is running and the stream is still open.
    /// Manual-management handlers poll this to terminate voluntarily.
    pub fn is_available(&self) -> bool {
        self.server.is_running() && self.conn.is_open()
    }

    /// Close the underlying connection.
    pub fn close(&self) {
        self.conn.close();
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        let Some(finalize) = self.finalize.get_mut().unwrap().take() else {
            return;
        };

        if self.manual.load(Ordering::SeqCst) {
            let _ = finalize.send(Finalize::Disown);
            return;
        }

        let mut response = std::mem::take(&mut *self.response.get_mut().unwrap());
        for cookie in self.pending_cookies.get_mut().unwrap().drain(..) {
            let encoded = cookie.encode();
            if encoded.is_empty() {
                continue;
            }
            if let Ok(value) = HeaderValue::from_str(&encoded) {
                response.headers.append(http::header::SET_COOKIE, value);
            }
        }

        let _ = finalize.send(Finalize::Dispatch {
            response,
            keep_alive: self.keep_alive.load(Ordering::SeqCst),
        });
    }
}
