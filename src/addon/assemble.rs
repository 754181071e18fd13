//! HTTP/1 wire form of captured messages.
//!
//! The host parses `http_req`/`http_rep` payloads as HTTP/1 messages, whatever
//! protocol the flow actually used:
//!
//! ```text
//! GET /index.html?q=1 HTTP/1.1\r\n
//! host: example.com\r\n
//! \r\n
//! <body>
//! ```

use bytes::Bytes;
use hyper::{HeaderMap, Method, Request, Response, Version};

/// Serialize a request.
pub fn assemble_request(request: &Request<Bytes>) -> Vec<u8> {
    let target = if request.method() == Method::CONNECT {
        request
            .uri()
            .authority()
            .map(|a| a.as_str())
            .unwrap_or("")
    } else {
        request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    };

    let mut out = Vec::with_capacity(256 + request.body().len());
    out.extend_from_slice(request.method().as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(target.as_bytes());
    out.push(b' ');
    out.extend_from_slice(version_str(request.version()).as_bytes());
    out.extend_from_slice(b"\r\n");
    write_headers(&mut out, request.headers());
    out.extend_from_slice(request.body());
    out
}

/// Serialize a response.
pub fn assemble_response(response: &Response<Bytes>) -> Vec<u8> {
    let status = response.status();

    let mut out = Vec::with_capacity(256 + response.body().len());
    out.extend_from_slice(version_str(response.version()).as_bytes());
    out.push(b' ');
    out.extend_from_slice(status.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(status.canonical_reason().unwrap_or("").as_bytes());
    out.extend_from_slice(b"\r\n");
    write_headers(&mut out, response.headers());
    out.extend_from_slice(response.body());
    out
}

/// Header lines plus the blank line ending the head.
fn write_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3",
        _ => "HTTP/1.1",
    }
}
