//! Request and response records plus HTTP/1.1 response encoding.

use http::header::{CONNECTION, CONTENT_LENGTH};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

/// A fully-read HTTP/1.1 request.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    /// Raw request target, query string included.
    pub target: String,
    /// Minor HTTP version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    pub version_minor: u8,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Request {
    /// Path portion of the target, before any `?`.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("/")
    }

    /// First value of a header, when present and valid UTF-8.
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the client asked to keep the connection open.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close`;
    /// HTTP/1.0 requires an explicit `Connection: keep-alive`.
    pub fn wants_keep_alive(&self) -> bool {
        let connection = self.header(&CONNECTION).unwrap_or("");
        if self.version_minor == 0 {
            connection.eq_ignore_ascii_case("keep-alive")
        } else {
            !connection.eq_ignore_ascii_case("close")
        }
    }
}

/// Response under construction by a handler, written out by the driver.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the full message. `Content-Length` is derived from the
    /// body; `Connection` reflects `keep_alive`, and keep-alive responses
    /// also advertise `Keep-Alive: timeout=<seconds>` where seconds is
    /// the configured keep-alive timeout divided by 1000, minimum 1.
    pub fn encode(&self, keep_alive: bool, keep_alive_timeout_ms: u64) -> Vec<u8> {
        let mut head = ResponseHead {
            status: self.status,
            headers: self.headers.clone(),
        };
        head.headers.insert(
            CONTENT_LENGTH,
            HeaderValue::from_str(&self.body.len().to_string()).unwrap(),
        );
        if keep_alive {
            head.headers
                .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
            let secs = (keep_alive_timeout_ms / 1000).max(1);
            head.headers.insert(
                HeaderName::from_static("keep-alive"),
                HeaderValue::from_str(&format!("timeout={secs}")).unwrap(),
            );
        } else {
            head.headers
                .insert(CONNECTION, HeaderValue::from_static("close"));
        }

        let mut out = head.encode();
        out.extend_from_slice(&self.body);
        out
    }
}

/// A header snapshot for out-of-band streaming writes.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Encode status line and headers, terminated by the empty line.
    /// Framing headers are the caller's responsibility: a streamed
    /// response delimits its body by closing the connection unless the
    /// snapshot says otherwise.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(b"HTTP/1.1 ");
        out.extend_from_slice(self.status.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status.canonical_reason().unwrap_or("Unknown").as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(version_minor: u8, connection: Option<&str>) -> Request {
        let mut headers = HeaderMap::new();
        if let Some(c) = connection {
            headers.insert(CONNECTION, HeaderValue::from_str(c).unwrap());
        }
        Request {
            method: Method::GET,
            target: "/a/b?x=1".to_string(),
            version_minor,
            headers,
            body: Vec::new(),
        }
    }

    #[test]
    fn path_strips_query() {
        assert_eq!(request(1, None).path(), "/a/b");
    }

    #[test]
    fn keep_alive_defaults_per_version() {
        assert!(request(1, None).wants_keep_alive());
        assert!(!request(1, Some("close")).wants_keep_alive());
        assert!(!request(0, None).wants_keep_alive());
        assert!(request(0, Some("keep-alive")).wants_keep_alive());
    }

    #[test]
    fn encode_sets_length_and_connection() {
        let mut resp = Response::new();
        resp.body = b"pong".to_vec();
        let bytes = resp.encode(true, 4000);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 4\r\n"));
        assert!(text.contains("connection: keep-alive\r\n"));
        assert!(text.contains("keep-alive: timeout=4\r\n"));
        assert!(text.ends_with("\r\n\r\npong"));
    }

    #[test]
    fn keep_alive_timeout_floors_at_one_second() {
        let resp = Response::new();
        let text = String::from_utf8(resp.encode(true, 300)).unwrap();
        assert!(text.contains("keep-alive: timeout=1\r\n"));
    }

    #[test]
    fn close_response_advertises_close() {
        let resp = Response::new();
        let text = String::from_utf8(resp.encode(false, 4000)).unwrap();
        assert!(text.contains("connection: close\r\n"));
        assert!(!text.contains("keep-alive: timeout"));
    }

    #[test]
    fn head_encode_preserves_custom_headers() {
        let head = ResponseHead::new(StatusCode::OK).header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        let text = String::from_utf8(head.encode()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-type: text/event-stream\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
