//! Serializes the head of an outgoing HTTP/1.1 request.
//!
//! Host and Connection headers are filled in when the caller did not set them,
//! and Content-Length always reflects the body that will follow.

use std::io;
use std::io::Write;

use bytes::{BufMut, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, HOST};
use http::{HeaderValue, Method, Request};
use tokio_util::codec::Encoder;

/// The head of an outgoing request, body attached separately.
pub type RequestHead = Request<()>;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 1024;

#[derive(Debug, Default)]
pub struct RequestEncoder;

impl RequestEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<(RequestHead, usize)> for RequestEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: (RequestHead, usize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, body_len) = item;

        let target = head.uri().path_and_query().map_or("/", |path_and_query| path_and_query.as_str());
        dst.reserve(INIT_HEADER_SIZE);
        write!(FastWrite(dst), "{} {} HTTP/1.1\r\n", head.method(), target)?;

        if !head.headers().contains_key(HOST) {
            let authority = head
                .uri()
                .authority()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "request uri has no authority"))?;
            let host = HeaderValue::from_str(authority.as_str()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            head.headers_mut().insert(HOST, host);
        }

        if body_len > 0 || head.method() == Method::POST || head.method() == Method::PUT {
            head.headers_mut().insert(CONTENT_LENGTH, body_len.into());
        }

        if !head.headers().contains_key(CONNECTION) {
            head.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
        }

        for (header_name, header_value) in head.headers() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Writes formatted output straight into the reserved buffer.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
