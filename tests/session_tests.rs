mod common;

use std::sync::Arc;

use http::Method;
use stratus::{AttrValue, Task};

use common::{body_of, get, get_with_cookie, header_values, send_request, start_server, status_of};

#[test]
fn missing_session_cookie_generates_exactly_one_set_cookie() {
    let (server, addr) = start_server(|server| {
        assert!(server.add_route(Method::GET, "/", |task: Arc<Task>| {
            let id = task.session_id();
            task.set_body(id.into_bytes());
        }));
    });

    let response = send_request(addr, &get("/"));
    assert_eq!(status_of(&response), 200);

    let observed_id = body_of(&response).to_string();
    // UUID v4 text form: 8-4-4-4-12.
    assert_eq!(observed_id.len(), 36);
    assert_eq!(observed_id.matches('-').count(), 4);

    let set_cookies = header_values(&response, "set-cookie");
    assert_eq!(set_cookies.len(), 1);
    assert_eq!(set_cookies[0], format!("sessionId={observed_id}"));

    server.stop();
}

#[test]
fn present_session_cookie_is_reused_without_set_cookie() {
    let (server, addr) = start_server(|server| {
        assert!(server.add_route(Method::GET, "/", |task: Arc<Task>| {
            let id = task.session_id();
            task.set_body(id.into_bytes());
        }));
    });

    let response = send_request(addr, &get_with_cookie("/", "a=1; sessionId=abc; b=2"));
    assert_eq!(body_of(&response), "abc");
    assert!(header_values(&response, "set-cookie").is_empty());

    server.stop();
}

#[test]
fn session_cookie_scan_is_case_insensitive() {
    let (server, addr) = start_server(|server| {
        assert!(server.add_route(Method::GET, "/", |task: Arc<Task>| {
            task.set_body(task.session_id().into_bytes());
        }));
    });

    let response = send_request(addr, &get_with_cookie("/", "SESSIONID=xyz"));
    assert_eq!(body_of(&response), "xyz");
    assert!(header_values(&response, "set-cookie").is_empty());

    server.stop();
}

#[test]
fn session_context_survives_across_requests() {
    let (server, addr) = start_server(|server| {
        assert!(server.add_route(Method::GET, "/visits", |task: Arc<Task>| {
            let session = task.session();
            let visits = session
                .get("visits")
                .and_then(|attr| {
                    attr.as_any()
                        .downcast_ref::<AttrValue<u64>>()
                        .map(|v| v.0)
                })
                .unwrap_or(0)
                + 1;
            session.set("visits", Arc::new(AttrValue(visits)));
            task.set_body(visits.to_string().into_bytes());
        }));
    });

    let first = send_request(addr, &get_with_cookie("/visits", "sessionId=s1"));
    assert_eq!(body_of(&first), "1");
    let second = send_request(addr, &get_with_cookie("/visits", "sessionId=s1"));
    assert_eq!(body_of(&second), "2");
    // A different session starts fresh.
    let other = send_request(addr, &get_with_cookie("/visits", "sessionId=s2"));
    assert_eq!(body_of(&other), "1");

    server.stop();
}

#[test]
fn remove_session_reports_presence() {
    let (server, addr) = start_server(|server| {
        assert!(server.add_route(Method::GET, "/touch", |task: Arc<Task>| {
            task.session();
            task.set_body(b"ok".to_vec());
        }));
    });

    send_request(addr, &get_with_cookie("/touch", "sessionId=gone"));
    assert!(server.remove_session("gone"));
    assert!(!server.remove_session("gone"));

    server.stop();
}

#[test]
fn server_context_is_shared_across_requests() {
    let (server, addr) = start_server(|server| {
        server
            .context()
            .set("motd", Arc::new(AttrValue("welcome".to_string())));
        assert!(server.add_route(Method::GET, "/motd", |task: Arc<Task>| {
            let motd = task
                .server_context()
                .get("motd")
                .map(|attr| attr.display())
                .unwrap_or_default();
            task.set_body(motd.into_bytes());
        }));
    });

    assert_eq!(body_of(&send_request(addr, &get("/motd"))), "welcome");
    assert_eq!(body_of(&send_request(addr, &get("/motd"))), "welcome");

    server.stop();
}

#[test]
fn background_cleaner_reaps_expired_sessions() {
    let (server, _addr) = start_server(|server| {
        server
            .set_default_session_timeout(0) // clamps to the 1s floor
            .set_session_cleaner(true)
            .set_cleaner_interval(0); // clamps to the 1s floor
    });

    // Pile up heap churn on one session: every extension is strictly
    // later than the previous one, so each pushes a heap entry. The
    // heap then dwarfs the live map, which is what sends the cleaner
    // down the thorough path.
    server.session("hot");
    for i in 0..40u64 {
        assert!(server.set_session_timeout("hot", 1_000 + i * 50));
    }

    // Last expiry lands ~3s out; the cleaner fires on a ~1s cadence and
    // must reap the session without any further traffic.
    std::thread::sleep(std::time::Duration::from_millis(4_500));
    assert!(!server.remove_session("hot"));

    server.stop();
}
