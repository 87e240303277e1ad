//! Default transport over `may::net::TcpStream`, with optional rustls
//! wrapping.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::sync::Arc;
use std::time::Duration;

use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use may::net::TcpStream;

use super::{HttpStream, RequestHead, TransportError};

/// Hard cap on accumulated head bytes before a request is rejected.
const MAX_HEAD_BYTES: usize = 16 * 1024;
/// Maximum number of request headers.
const MAX_HEADERS: usize = 64;
/// Socket read granularity.
const READ_CHUNK: usize = 4 * 1024;

enum Socket {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ServerConnection, TcpStream>>),
}

impl Socket {
    fn tcp(&self) -> &TcpStream {
        match self {
            Socket::Plain(s) => s,
            Socket::Tls(s) => &s.sock,
        }
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Socket::Plain(s) => s.read(buf),
            Socket::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Socket::Plain(s) => s.write(buf),
            Socket::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Socket::Plain(s) => s.flush(),
            Socket::Tls(s) => s.flush(),
        }
    }
}

/// Blocking HTTP/1.1 stream over TCP. Reads go through an internal
/// buffer so pipelined requests carry over between cycles.
pub struct TcpHttpStream {
    sock: Socket,
    buf: Vec<u8>,
}

impl TcpHttpStream {
    pub fn plain(sock: TcpStream) -> Self {
        Self {
            sock: Socket::Plain(sock),
            buf: Vec::new(),
        }
    }

    /// Wrap an accepted socket in a server-side TLS session. The
    /// handshake completes lazily on first use.
    pub fn tls(sock: TcpStream, config: Arc<rustls::ServerConfig>) -> Result<Self, rustls::Error> {
        let conn = rustls::ServerConnection::new(config)?;
        Ok(Self {
            sock: Socket::Tls(Box::new(rustls::StreamOwned::new(conn, sock))),
            buf: Vec::new(),
        })
    }

    /// Pull more bytes off the socket into the parse buffer.
    fn fill(&mut self) -> Result<(), TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.sock.read(&mut chunk)?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Consume one CRLF-terminated line from the buffer, reading more as
    /// needed.
    fn read_line(&mut self) -> Result<String, TransportError> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = String::from_utf8(self.buf[..pos].to_vec())
                    .map_err(|_| TransportError::BadMessage)?;
                self.buf.drain(..pos + 2);
                return Ok(line);
            }
            if self.buf.len() > MAX_HEAD_BYTES {
                return Err(TransportError::BadMessage);
            }
            self.fill()?;
        }
    }

    fn read_chunked(&mut self, limit: usize) -> Result<Vec<u8>, TransportError> {
        let mut body = Vec::new();
        loop {
            let size = parse_chunk_size(&self.read_line()?)?;
            if size == 0 {
                // Discard any trailers up to the terminating empty line.
                loop {
                    if self.read_line()?.is_empty() {
                        break;
                    }
                }
                return Ok(body);
            }
            if body.len() + size > limit {
                return Err(TransportError::BodyTooLarge);
            }
            while self.buf.len() < size + 2 {
                self.fill()?;
            }
            body.extend_from_slice(&self.buf[..size]);
            if &self.buf[size..size + 2] != b"\r\n" {
                return Err(TransportError::BadMessage);
            }
            self.buf.drain(..size + 2);
        }
    }
}

impl HttpStream for TcpHttpStream {
    fn read_head(&mut self) -> Result<RequestHead, TransportError> {
        loop {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut parser = httparse::Request::new(&mut headers);
            let parsed = match parser.parse(&self.buf) {
                Ok(httparse::Status::Complete(head_len)) => {
                    let method = parser
                        .method
                        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
                        .ok_or(TransportError::BadMessage)?;
                    let target = parser.path.ok_or(TransportError::BadMessage)?.to_string();
                    let version_minor = parser.version.unwrap_or(1);
                    let mut header_map = HeaderMap::new();
                    for h in parser.headers.iter() {
                        let name = HeaderName::from_bytes(h.name.as_bytes())
                            .map_err(|_| TransportError::BadMessage)?;
                        let value = HeaderValue::from_bytes(h.value)
                            .map_err(|_| TransportError::BadMessage)?;
                        header_map.append(name, value);
                    }
                    Some((
                        head_len,
                        RequestHead {
                            method,
                            target,
                            version_minor,
                            headers: header_map,
                        },
                    ))
                }
                Ok(httparse::Status::Partial) => {
                    if self.buf.len() > MAX_HEAD_BYTES {
                        return Err(TransportError::BadMessage);
                    }
                    None
                }
                Err(_) => return Err(TransportError::BadMessage),
            };

            if let Some((head_len, head)) = parsed {
                self.buf.drain(..head_len);
                return Ok(head);
            }
            self.fill()?;
        }
    }

    fn read_body(&mut self, head: &RequestHead, limit: usize) -> Result<Vec<u8>, TransportError> {
        if is_chunked(&head.headers) {
            return self.read_chunked(limit);
        }

        let Some(length) = content_length(&head.headers)? else {
            return Ok(Vec::new());
        };
        if length > limit {
            return Err(TransportError::BodyTooLarge);
        }
        while self.buf.len() < length {
            self.fill()?;
        }
        Ok(self.buf.drain(..length).collect())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.sock.write_all(bytes)?;
        self.sock.flush()?;
        Ok(())
    }

    fn set_read_deadline(&mut self, deadline: Option<Duration>) -> std::io::Result<()> {
        self.sock.tcp().set_read_timeout(deadline)
    }

    fn set_write_deadline(&mut self, deadline: Option<Duration>) -> std::io::Result<()> {
        self.sock.tcp().set_write_timeout(deadline)
    }

    fn shutdown(&mut self) {
        let _ = self.sock.tcp().shutdown(Shutdown::Both);
    }
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get(TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .any(|tok| tok.trim().eq_ignore_ascii_case("chunked"))
        })
        .unwrap_or(false)
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>, TransportError> {
    match headers.get(CONTENT_LENGTH) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .map(Some)
            .ok_or(TransportError::BadMessage),
    }
}

/// Chunk-size line: hex digits, optionally followed by `;extensions`.
fn parse_chunk_size(line: &str) -> Result<usize, TransportError> {
    let size_part = line.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size_part, 16).map_err(|_| TransportError::BadMessage)
}
