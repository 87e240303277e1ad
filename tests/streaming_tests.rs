mod common;

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderValue, Method, StatusCode};
use stratus::{ResponseHead, Task};

use common::{read_until_close, start_server};

fn event_stream_head() -> ResponseHead {
    ResponseHead::new(StatusCode::OK)
        .header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        )
        .header(http::header::CONNECTION, HeaderValue::from_static("close"))
}

#[test]
fn manual_management_streams_header_then_chunks() {
    let (server, addr) = start_server(|server| {
        assert!(server.add_route(Method::GET, "/events", |task: Arc<Task>| {
            task.set_manual_management();
            task.write_header(event_stream_head());
            let streaming = task.clone();
            task.post(move || {
                for i in 0..3 {
                    streaming.write_body(format!("data: event-{i}\n\n").into_bytes());
                }
                streaming.close();
            });
        }));
    });

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .write_all(b"GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let raw = read_until_close(&mut stream, Duration::from_secs(5));

    // Header frame precedes every body frame.
    assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(raw.contains("content-type: text/event-stream"));
    let head_end = raw.find("\r\n\r\n").unwrap();
    let payload = &raw[head_end + 4..];
    assert_eq!(payload, "data: event-0\n\ndata: event-1\n\ndata: event-2\n\n");

    server.stop();
}

#[test]
fn streamed_chunks_keep_enqueue_order() {
    let (server, addr) = start_server(|server| {
        assert!(server.add_route(Method::GET, "/numbers", |task: Arc<Task>| {
            task.set_manual_management();
            task.write_header(event_stream_head());
            // Enqueue synchronously from the handler: ordering on the
            // wire must reflect enqueue order.
            for i in 0..20 {
                task.write_body(format!("{i},").into_bytes());
            }
            let closer = task.clone();
            task.post(move || closer.close());
        }));
    });

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .write_all(b"GET /numbers HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let raw = read_until_close(&mut stream, Duration::from_secs(5));
    let payload = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
    let expected: String = (0..20).map(|i| format!("{i},")).collect();
    assert_eq!(payload, expected);

    server.stop();
}

#[test]
fn manual_response_suppresses_automatic_finalization() {
    let (server, addr) = start_server(|server| {
        assert!(server.add_route(Method::GET, "/quiet", |task: Arc<Task>| {
            // Accumulate a response body, then latch manual management:
            // nothing may be auto-written.
            task.set_body(b"should never appear".to_vec());
            task.set_manual_management();
            let closer = task.clone();
            task.post(move || closer.close());
        }));
    });

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .write_all(b"GET /quiet HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let raw = read_until_close(&mut stream, Duration::from_secs(3));
    assert_eq!(raw, "");

    server.stop();
}

#[test]
fn is_available_turns_false_after_close() {
    let (server, addr) = start_server(|server| {
        assert!(server.add_route(Method::GET, "/probe", |task: Arc<Task>| {
            task.set_manual_management();
            assert!(task.is_available());
            task.close();
            assert!(!task.is_available());
        }));
    });

    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .write_all(b"GET /probe HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let raw = read_until_close(&mut stream, Duration::from_secs(3));
    assert_eq!(raw, "");

    server.stop();
}
