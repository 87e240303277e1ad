mod common;

use std::sync::Arc;

use http::Method;
use stratus::{Aspect, FnAspect, Task};

use common::{body_of, get, send_request, start_server, status_of};

fn appender(tag: &'static str) -> impl Fn(Arc<Task>) + Send + Sync {
    move |task: Arc<Task>| task.append_body(tag.as_bytes())
}

#[test]
fn aspect_chain_wraps_handler_in_scope_order() {
    let (server, addr) = start_server(|server| {
        server.add_global_aspect(Arc::new(FnAspect::new(appender("preG|"), appender("postG|"))));
        server.add_method_aspect(
            Method::GET,
            Arc::new(FnAspect::new(appender("preM|"), appender("postM|"))),
        );
        assert!(server.add_route(Method::GET, "/order", |task: Arc<Task>| {
            task.append_body(b"handler|");
        }));
        assert!(server.add_aspect(
            Method::GET,
            "/order",
            Arc::new(FnAspect::new(appender("preR|"), appender("postR|"))),
        ));
    });

    let response = send_request(addr, &get("/order"));
    assert_eq!(
        body_of(&response),
        "preG|preM|preR|handler|postR|postM|postG|"
    );

    server.stop();
}

#[test]
fn multiple_aspects_in_one_scope_preserve_insertion_order() {
    let (server, addr) = start_server(|server| {
        server.add_global_aspect(Arc::new(FnAspect::new(appender("a|"), appender("a'|"))));
        server.add_global_aspect(Arc::new(FnAspect::new(appender("b|"), appender("b'|"))));
        assert!(server.add_route(Method::GET, "/two", |task: Arc<Task>| {
            task.append_body(b"h|");
        }));
    });

    let response = send_request(addr, &get("/two"));
    assert_eq!(body_of(&response), "a|b|h|b'|a'|");

    server.stop();
}

#[test]
fn global_aspects_wrap_the_default_handler_too() {
    let (server, addr) = start_server(|server| {
        server.add_global_aspect(Arc::new(FnAspect::new(appender("pre|"), appender("|post"))));
        server.set_default_handler(|task: Arc<Task>| {
            task.append_body(b"fallback");
            task.set_keep_alive(false);
        });
    });

    let response = send_request(addr, &get("/no/such/route"));
    assert_eq!(status_of(&response), 200);
    assert_eq!(body_of(&response), "pre|fallback|post");

    server.stop();
}

#[test]
fn panicking_aspect_does_not_break_the_chain() {
    struct FaultyPre;

    impl Aspect for FaultyPre {
        fn pre(&self, _task: Arc<Task>) {
            panic!("pre pass exploded");
        }

        fn post(&self, task: Arc<Task>) {
            task.append_body(b"|post-ran");
        }
    }

    let (server, addr) = start_server(|server| {
        server.add_global_aspect(Arc::new(FaultyPre));
        assert!(server.add_route(Method::GET, "/sturdy", |task: Arc<Task>| {
            task.append_body(b"handler");
        }));
    });

    let response = send_request(addr, &get("/sturdy"));
    assert_eq!(status_of(&response), 200);
    // The handler and the post pass still ran.
    assert_eq!(body_of(&response), "handler|post-ran");

    server.stop();
}

#[test]
fn aspect_can_take_over_the_response() {
    struct Gatekeeper;

    impl Aspect for Gatekeeper {
        fn pre(&self, task: Arc<Task>) {
            if task.cookie("token").as_deref() != Some("letmein") {
                task.set_status(http::StatusCode::UNAUTHORIZED);
                task.set_body(b"denied".to_vec());
            }
        }
    }

    let (server, addr) = start_server(|server| {
        server.add_global_aspect(Arc::new(Gatekeeper));
        assert!(server.add_route(Method::GET, "/guarded", |task: Arc<Task>| {
            // Aspects cannot abort the chain; the handler still runs and
            // may inspect what the aspect decided.
            if task.cookie("token").as_deref() == Some("letmein") {
                task.set_body(b"secret".to_vec());
            }
        }));
    });

    let denied = send_request(addr, &get("/guarded"));
    assert_eq!(status_of(&denied), 401);
    assert_eq!(body_of(&denied), "denied");

    let allowed = send_request(
        addr,
        &common::get_with_cookie("/guarded", "token=letmein"),
    );
    assert_eq!(status_of(&allowed), 200);
    assert_eq!(body_of(&allowed), "secret");

    server.stop();
}
