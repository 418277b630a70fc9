//! Request/response framing for the restricted HTTP/1.1 subset both APIs
//! speak: `Connection: close`, explicit `Content-Length`, body separated by a
//! blank line. Headers other than the body delimiter are ignored on parse.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

pub const BODY_DELIMITER: &str = "\r\n\r\n";

/// Payload bytes per `write` call. The transmit path stays friendly to small
/// socket buffers by never handing the stack more than this at once.
const MAX_WRITE_CHUNK: usize = 1024;

#[derive(Debug, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Everything after the header/body delimiter; `None` when the delimiter
    /// never arrived.
    pub body: Option<&'a str>,
}

/// Splits a raw request into method, path and body. Returns `None` when even
/// the request line is unusable.
pub fn parse_request(raw: &str) -> Option<Request<'_>> {
    let line = raw.split("\r\n").next().unwrap_or(raw);
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    let body = raw
        .find(BODY_DELIMITER)
        .map(|at| &raw[at + BODY_DELIMITER.len()..]);
    Some(Request { method, path, body })
}

/// Whether `buf` holds a complete request: headers terminated and, when a
/// `Content-Length` is declared, that many body bytes present. Counted on
/// the raw bytes so a body with non-UTF-8 content is not mismeasured.
pub fn request_complete(buf: &[u8]) -> bool {
    let Some(delimiter) = buf
        .windows(BODY_DELIMITER.len())
        .position(|window| window == BODY_DELIMITER.as_bytes())
    else {
        return false;
    };
    let body_len = buf.len() - (delimiter + BODY_DELIMITER.len());
    let headers = String::from_utf8_lossy(&buf[..delimiter]);
    match content_length(&headers) {
        Some(expected) => body_len >= expected,
        None => true,
    }
}

fn content_length(headers: &str) -> Option<usize> {
    for line in headers.split("\r\n").skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn header(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            status_text(self.status),
            self.body.len()
        )
    }
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Writes header and body, the body in capped chunks. Send errors are logged
/// and swallowed; the caller closes the connection either way.
pub async fn write_response<S: AsyncWrite + Unpin>(stream: &mut S, response: &Response) {
    if let Err(err) = stream.write_all(response.header().as_bytes()).await {
        warn!("response header send failed: {err}");
        return;
    }

    let payload = response.body.as_bytes();
    let mut sent = 0;
    while sent < payload.len() {
        let chunk = (payload.len() - sent).min(MAX_WRITE_CHUNK);
        if let Err(err) = stream.write_all(&payload[sent..sent + chunk]).await {
            warn!("response body send failed at offset {sent}: {err}");
            return;
        }
        sent += chunk;
    }

    if let Err(err) = stream.flush().await {
        warn!("response flush failed: {err}");
    }
}

/// One fully buffered outbound request for the cloud API.
pub fn build_request(
    method: &str,
    path: &str,
    host: &str,
    port: u16,
    bearer: Option<&str>,
    body: &str,
) -> String {
    match bearer {
        Some(token) => format!(
            "{method} {path} HTTP/1.1\r\nHost: {host}:{port}\r\nAuthorization: Bearer {token}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ),
        None => format!(
            "{method} {path} HTTP/1.1\r\nHost: {host}:{port}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        ),
    }
}
