//! Minimal embedding: a few routes, an aspect, and sessions.
//!
//! Run with `cargo run --example quick_start`, then:
//!
//! ```text
//! curl -v http://127.0.0.1:8080/ping
//! curl -v http://127.0.0.1:8080/users/42
//! curl -v http://127.0.0.1:8080/whoami
//! ```

use std::sync::Arc;

use http::Method;
use stratus::{FnAspect, LogLevel, Server, Task};

fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let server = Server::new();

    server.add_route(Method::GET, "/ping", |task: Arc<Task>| {
        task.set_body(b"pong".to_vec());
    });

    server.add_route(Method::GET, "/users/{id}", |task: Arc<Task>| {
        let id = task.parameters()[0].clone();
        task.set_body(format!("user {id} at {}", task.location()).into_bytes());
    });

    // Sessions: the first visit gets a generated id via Set-Cookie,
    // later visits reuse it.
    server.add_route(Method::GET, "/whoami", |task: Arc<Task>| {
        task.set_body(format!("session {}", task.session_id()).into_bytes());
    });

    server.add_global_aspect(Arc::new(FnAspect::new(
        |task: Arc<Task>| task.log(LogLevel::Info, &format!("→ {}", task.target())),
        |task: Arc<Task>| task.log(LogLevel::Info, &format!("← {}", task.target())),
    )));

    server
        .set_session_cleaner(true)
        .listen("127.0.0.1:8080".parse().unwrap());

    assert!(server.start(4));
    println!("listening on http://127.0.0.1:8080 (ctrl-c to quit)");

    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}
