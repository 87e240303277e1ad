use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use http::Method;
use may::coroutine::JoinHandle;
use may::net::TcpListener;
use tracing::{error, info, trace, warn};

use super::worker_pool::WorkerPool;
use crate::aspect::Aspect;
use crate::connection::Connection;
use crate::context::Context;
use crate::handler::Handler;
use crate::logging::{LogLevel, Logger, TracingLogger};
use crate::router::{RouteResult, RouteTable};
use crate::session::SessionMap;
use crate::transport::tcp::TcpHttpStream;
use crate::transport::HttpStream;

/// Deadline for the first request head on a fresh connection.
const DEFAULT_HEADER_READ_EXPIRY_MS: u64 = 3_000;
/// How long an idle keep-alive connection may wait for its next
/// request, on top of the header budget.
const DEFAULT_KEEP_ALIVE_TIMEOUT_MS: u64 = 4_000;
/// Background session sweep cadence.
const DEFAULT_CLEANER_INTERVAL_MS: u64 = 30 * 60 * 1_000;
/// Floor applied to the cleaner cadence.
const MIN_CLEANER_INTERVAL_MS: u64 = 1_000;
/// Per-coroutine stack unless overridden by `STRATUS_STACK_SIZE`.
const DEFAULT_STACK_SIZE: usize = 0x10000;

struct Tunables {
    header_read_expiry_ms: u64,
    keep_alive_timeout_ms: u64,
    listeners: Vec<SocketAddr>,
    tls: Option<Arc<rustls::ServerConfig>>,
    session_cleaner: bool,
    cleaner_interval_ms: u64,
    stack_size: usize,
}

/// The server: lifecycle, configuration gate, and cross-component
/// ownership.
///
/// Construct with [`Server::new`], configure while stopped, then
/// [`start`](Server::start). Configuration calls made while running do
/// nothing (boolean-returning ones return `false`); read operations and
/// session access work in either state, matching the gate discipline of
/// the components they delegate to.
pub struct Server {
    /// Weak handle to the owning `Arc`, for acceptors and timers that
    /// need to keep the server alive past the current call.
    self_ref: std::sync::Weak<Server>,
    /// Exclusive side taken by start/stop; shared side by configuration
    /// writes, so lifecycle transitions never interleave with them.
    state_gate: RwLock<()>,
    running: AtomicBool,
    table: RwLock<RouteTable>,
    sessions: SessionMap,
    context: Arc<Context>,
    logger: RwLock<Arc<dyn Logger>>,
    tunables: RwLock<Tunables>,
    pool: Mutex<Option<WorkerPool>>,
    acceptors: Mutex<Vec<JoinHandle<()>>>,
    bound_addrs: Mutex<Vec<SocketAddr>>,
    /// Bumped to cancel a pending background-cleaner timer.
    cleaner_generation: AtomicU64,
}

impl Server {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            state_gate: RwLock::new(()),
            running: AtomicBool::new(false),
            table: RwLock::new(RouteTable::new()),
            sessions: SessionMap::new(),
            context: Arc::new(Context::new()),
            logger: RwLock::new(Arc::new(TracingLogger)),
            tunables: RwLock::new(Tunables {
                header_read_expiry_ms: DEFAULT_HEADER_READ_EXPIRY_MS,
                keep_alive_timeout_ms: DEFAULT_KEEP_ALIVE_TIMEOUT_MS,
                listeners: Vec::new(),
                tls: None,
                session_cleaner: false,
                cleaner_interval_ms: DEFAULT_CLEANER_INTERVAL_MS,
                stack_size: stack_size_from_env(),
            }),
            pool: Mutex::new(None),
            acceptors: Mutex::new(Vec::new()),
            bound_addrs: Mutex::new(Vec::new()),
            cleaner_generation: AtomicU64::new(0),
        })
    }

    // ---- routes and aspects (gated, report success) -------------------

    /// Register a handler. Returns `false` while running or when the
    /// template is malformed.
    pub fn add_route(
        &self,
        method: Method,
        template: &str,
        handler: impl Handler + 'static,
    ) -> bool {
        let _gate = self.state_gate.read().unwrap();
        if self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.table.write().unwrap().add_route(method, template, handler)
    }

    /// Register an exclusive handler: its layer serves every deeper
    /// path.
    pub fn add_exclusive_route(
        &self,
        method: Method,
        template: &str,
        handler: impl Handler + 'static,
    ) -> bool {
        let _gate = self.state_gate.read().unwrap();
        if self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.table
            .write()
            .unwrap()
            .add_exclusive_route(method, template, handler)
    }

    /// Attach a route-local aspect.
    pub fn add_aspect(&self, method: Method, template: &str, aspect: Arc<dyn Aspect>) -> bool {
        let _gate = self.state_gate.read().unwrap();
        if self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.table.write().unwrap().add_aspect(method, template, aspect)
    }

    /// Attach an aspect to every route of one method.
    pub fn add_method_aspect(&self, method: Method, aspect: Arc<dyn Aspect>) -> &Self {
        self.configure(|s| s.table.write().unwrap().add_method_aspect(method.clone(), aspect.clone()))
    }

    /// Attach an aspect to every route of every method.
    pub fn add_global_aspect(&self, aspect: Arc<dyn Aspect>) -> &Self {
        self.configure(|s| s.table.write().unwrap().add_global_aspect(aspect.clone()))
    }

    pub fn set_read_expiry(&self, method: Method, template: &str, expiry_ms: u64) -> bool {
        let _gate = self.state_gate.read().unwrap();
        if self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.table
            .write()
            .unwrap()
            .set_read_expiry(method, template, expiry_ms)
    }

    pub fn set_write_expiry(&self, method: Method, template: &str, expiry_ms: u64) -> bool {
        let _gate = self.state_gate.read().unwrap();
        if self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.table
            .write()
            .unwrap()
            .set_write_expiry(method, template, expiry_ms)
    }

    pub fn set_max_body_size(&self, method: Method, template: &str, size: usize) -> bool {
        let _gate = self.state_gate.read().unwrap();
        if self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.table
            .write()
            .unwrap()
            .set_max_body_size(method, template, size)
    }

    // ---- defaults and scalars (gated, chainable) ----------------------

    pub fn set_default_read_expiry(&self, expiry_ms: u64) -> &Self {
        self.configure(|s| s.table.write().unwrap().set_default_read_expiry(expiry_ms))
    }

    pub fn set_default_write_expiry(&self, expiry_ms: u64) -> &Self {
        self.configure(|s| s.table.write().unwrap().set_default_write_expiry(expiry_ms))
    }

    pub fn set_default_max_body_size(&self, size: usize) -> &Self {
        self.configure(|s| s.table.write().unwrap().set_default_max_body_size(size))
    }

    /// Replace the handler served on routing misses.
    pub fn set_default_handler(&self, handler: impl Handler + 'static) -> &Self {
        let _gate = self.state_gate.read().unwrap();
        if !self.running.load(Ordering::SeqCst) {
            self.table.write().unwrap().set_default_handler(handler);
        }
        self
    }

    /// Header-read deadline in milliseconds; zero disables it.
    pub fn set_header_read_expiry(&self, expiry_ms: u64) -> &Self {
        self.configure(|s| s.tunables.write().unwrap().header_read_expiry_ms = expiry_ms)
    }

    pub fn set_keep_alive_timeout(&self, timeout_ms: u64) -> &Self {
        self.configure(|s| s.tunables.write().unwrap().keep_alive_timeout_ms = timeout_ms)
    }

    /// Serve TLS on every listener using this rustls configuration.
    pub fn set_tls_config(&self, config: Arc<rustls::ServerConfig>) -> &Self {
        self.configure(|s| s.tunables.write().unwrap().tls = Some(config.clone()))
    }

    pub fn clear_tls_config(&self) -> &Self {
        self.configure(|s| s.tunables.write().unwrap().tls = None)
    }

    pub fn set_logger(&self, logger: Arc<dyn Logger>) -> &Self {
        self.configure(|s| *s.logger.write().unwrap() = logger.clone())
    }

    /// Register a listen endpoint for the next start.
    pub fn listen(&self, addr: SocketAddr) -> &Self {
        self.configure(|s| s.tunables.write().unwrap().listeners.push(addr))
    }

    // ---- session policy (gated, chainable) ----------------------------

    pub fn set_default_session_timeout(&self, timeout_ms: u64) -> &Self {
        self.configure(|s| s.sessions.set_default_timeout(timeout_ms))
    }

    /// Enable or disable the background session sweep. Disabling cancels
    /// any pending sweep timer.
    pub fn set_session_cleaner(&self, enabled: bool) -> &Self {
        self.configure(|s| {
            let mut tunables = s.tunables.write().unwrap();
            if tunables.session_cleaner != enabled {
                tunables.session_cleaner = enabled;
                s.cleaner_generation.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    pub fn set_cleaner_interval(&self, interval_ms: u64) -> &Self {
        self.configure(|s| s.tunables.write().unwrap().cleaner_interval_ms = interval_ms)
    }

    fn configure(&self, apply: impl Fn(&Self)) -> &Self {
        let _gate = self.state_gate.read().unwrap();
        if !self.running.load(Ordering::SeqCst) {
            apply(self);
        }
        self
    }

    // ---- lookups ------------------------------------------------------

    /// Resolve a request target. Works in both states; misses yield the
    /// default handler.
    pub fn route(&self, method: &Method, target: &str) -> RouteResult {
        self.table.read().unwrap().route(method, target)
    }

    /// Session context for `id`, created when unknown or expired.
    pub fn session(&self, id: &str) -> Arc<Context> {
        self.sessions.get(id)
    }

    /// Drop a session outright. Returns whether it existed.
    pub fn remove_session(&self, id: &str) -> bool {
        self.sessions.remove(id)
    }

    /// Extend a session's expiry window.
    pub fn set_session_timeout(&self, id: &str, timeout_ms: u64) -> bool {
        self.sessions.set_timeout(id, timeout_ms);
        true
    }

    /// The server-wide context.
    pub fn context(&self) -> Arc<Context> {
        self.context.clone()
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.logger.read().unwrap().log(level, message);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn header_read_expiry(&self) -> u64 {
        self.tunables.read().unwrap().header_read_expiry_ms
    }

    pub fn keep_alive_timeout(&self) -> u64 {
        self.tunables.read().unwrap().keep_alive_timeout_ms
    }

    pub(crate) fn coroutine_stack_size(&self) -> usize {
        self.tunables.read().unwrap().stack_size
    }

    /// Addresses actually bound by the last start. Useful when
    /// listening on port 0.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.bound_addrs.lock().unwrap().clone()
    }

    // ---- thread-pool posting ------------------------------------------

    /// Dispatch work to the worker pool. No-op (returns `false`) when
    /// stopped.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        match self.pool.lock().unwrap().as_ref() {
            Some(pool) => pool.execute(Box::new(job)),
            None => false,
        }
    }

    /// One-shot timer owned by its callback. No-op when stopped.
    pub fn set_timer(&self, timeout_ms: u64, callback: impl FnOnce() + Send + 'static) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        may::go!(move || {
            may::coroutine::sleep(Duration::from_millis(timeout_ms));
            callback();
        });
        true
    }

    // ---- lifecycle ----------------------------------------------------

    /// Flip to Running: build the worker pool, bind every configured
    /// listener, spawn acceptors, and arm the session cleaner when
    /// enabled. Returns `false` for `thread_count == 0` or when already
    /// running.
    pub fn start(&self, thread_count: usize) -> bool {
        if thread_count == 0 {
            return false;
        }
        let _gate = self.state_gate.write().unwrap();
        if self.running.load(Ordering::SeqCst) {
            return false;
        }

        let (stack_size, listeners, tls, cleaner) = {
            let tunables = self.tunables.read().unwrap();
            (
                tunables.stack_size,
                tunables.listeners.clone(),
                tunables.tls.clone(),
                tunables.session_cleaner,
            )
        };

        *self.pool.lock().unwrap() = Some(WorkerPool::new(thread_count, stack_size));
        self.running.store(true, Ordering::SeqCst);

        let mut bound = Vec::new();
        let mut acceptors = Vec::new();
        for addr in listeners {
            match TcpListener::bind(addr) {
                Ok(listener) => {
                    if let Ok(local) = listener.local_addr() {
                        bound.push(local);
                    }
                    match self.spawn_acceptor(listener, tls.clone(), stack_size) {
                        Ok(handle) => acceptors.push(handle),
                        Err(e) => error!(%addr, error = %e, "failed to spawn acceptor"),
                    }
                }
                Err(e) => error!(%addr, error = %e, "failed to bind listener"),
            }
        }
        *self.bound_addrs.lock().unwrap() = bound;
        *self.acceptors.lock().unwrap() = acceptors;

        if cleaner {
            self.arm_session_cleaner();
        }

        info!(thread_count, "server started");
        true
    }

    /// Flip to Stopped: cancel the acceptors, shut the worker pool down
    /// (joining the workers), and re-open the configuration gate. The
    /// configured endpoints are kept and rebound on the next start.
    pub fn stop(&self) {
        let _gate = self.state_gate.write().unwrap();
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cleaner_generation.fetch_add(1, Ordering::SeqCst);

        for handle in self.acceptors.lock().unwrap().drain(..) {
            unsafe {
                handle.coroutine().cancel();
            }
            let _ = handle.join();
        }
        self.bound_addrs.lock().unwrap().clear();

        if let Some(pool) = self.pool.lock().unwrap().take() {
            pool.shutdown();
        }

        info!("server stopped");
    }

    fn spawn_acceptor(
        &self,
        listener: TcpListener,
        tls: Option<Arc<rustls::ServerConfig>>,
        stack_size: usize,
    ) -> io::Result<JoinHandle<()>> {
        // Weak capture: an acceptor must never keep the server alive on
        // its own.
        let server = self.self_ref.clone();
        unsafe {
            may::coroutine::Builder::new()
                .stack_size(stack_size)
                .spawn(move || loop {
                    match listener.accept() {
                        Ok((sock, peer)) => {
                            let Some(server) = server.upgrade() else {
                                break;
                            };
                            if !server.is_running() {
                                break;
                            }
                            trace!(%peer, "connection accepted");
                            let stream: Box<dyn HttpStream> = match &tls {
                                Some(config) => {
                                    match TcpHttpStream::tls(sock, config.clone()) {
                                        Ok(s) => Box::new(s),
                                        Err(e) => {
                                            warn!(%peer, error = %e, "tls session setup failed");
                                            continue;
                                        }
                                    }
                                }
                                None => Box::new(TcpHttpStream::plain(sock)),
                            };
                            Connection::spawn(server, stream);
                        }
                        Err(e) => {
                            let Some(server) = server.upgrade() else {
                                break;
                            };
                            if !server.is_running() {
                                break;
                            }
                            warn!(error = %e, "accept failed");
                        }
                    }
                })
        }
    }

    /// Re-arming background sweep. The timer callback only posts the
    /// sweep onto the worker pool, so no lock is held when it is
    /// scheduled; the posted job re-arms while the server runs and the
    /// cleaner stays enabled.
    fn arm_session_cleaner(&self) {
        let generation = self.cleaner_generation.load(Ordering::SeqCst);
        let interval = self
            .tunables
            .read()
            .unwrap()
            .cleaner_interval_ms
            .max(MIN_CLEANER_INTERVAL_MS);

        let server = self.self_ref.clone();
        self.set_timer(interval, move || {
            let Some(server) = server.upgrade() else {
                return;
            };
            if server.cleaner_generation.load(Ordering::SeqCst) != generation
                || !server.is_running()
            {
                return;
            }
            let again = Arc::clone(&server);
            server.post(move || {
                again.sessions.sweep();
                let still_enabled = again.tunables.read().unwrap().session_cleaner;
                if still_enabled
                    && again.is_running()
                    && again.cleaner_generation.load(Ordering::SeqCst) == generation
                {
                    again.arm_session_cleaner();
                }
            });
        });
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stack_size_from_env() -> usize {
    std::env::var("STRATUS_STACK_SIZE")
        .ok()
        .and_then(|s| {
            if let Some(hex) = s.strip_prefix("0x") {
                usize::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        })
        .unwrap_or(DEFAULT_STACK_SIZE)
}
