//! # Stratus
//!
//! An embeddable HTTP/1.1 server framework built on the `may` coroutine
//! runtime.
//!
//! ## Architecture
//!
//! ```text
//! Acceptor → Connection Driver → Route Table → Aspect Chain → Handler
//!                 │                                   │
//!                 │ (sequencer per connection)        │ (worker pool)
//!                 └──────── Response / Write Queue ───┘
//! ```
//!
//! Each accepted socket is owned by a connection driver coroutine that
//! runs the read → route → serve → write cycle. Handlers and aspects run
//! on a server-wide worker pool and talk to the request through a shared
//! [`Task`] handle; the driver totally orders everything that touches a
//! single connection. Long-lived responses (server-sent events and the
//! like) go through a per-connection write queue after the handler latches
//! manual connection management.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use http::Method;
//! use stratus::{Server, Task};
//!
//! let server = Server::new();
//! server.add_route(Method::GET, "/ping", |task: Arc<Task>| {
//!     task.set_body(b"pong".to_vec());
//! });
//! server.listen("127.0.0.1:8080".parse().unwrap());
//! server.start(4);
//! ```
//!
//! Configuration is only accepted while the server is stopped; every
//! setter is a silent no-op once [`Server::start`] has succeeded.

pub mod aspect;
pub mod connection;
pub mod context;
pub mod cookie;
pub mod handler;
pub mod logging;
pub mod message;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

pub use aspect::{Aspect, FnAspect};
pub use connection::Task;
pub use context::{AttrValue, Attribute, Context};
pub use cookie::{CookieJar, SameSite, SetCookie};
pub use handler::Handler;
pub use logging::{LogLevel, Logger, TracingLogger};
pub use message::{Request, Response, ResponseHead};
pub use router::{RouteResult, RouteTable};
pub use server::Server;
pub use session::SessionMap;
