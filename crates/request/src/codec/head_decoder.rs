//! Decoder for the status line and headers of an HTTP/1.1 response.
//!
//! Parsing is done by `httparse`; the parsed head is converted into an owned
//! [`ResponseHead`] and the way the body is delimited is derived from the headers
//! following RFC 9112 section 6.3. Interim `1xx` responses are skipped.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header size: 8KB

use bytes::{Buf, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode, Version};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, ResponseHead};

/// Maximum number of headers allowed in a response
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decodes a response head and tells how its body is delimited.
#[derive(Debug, Clone, Copy)]
pub struct HeadDecoder {
    /// Responses to HEAD never carry a body, whatever their headers say.
    head_request: bool,
}

impl HeadDecoder {
    pub fn new(head_request: bool) -> Self {
        Self { head_request }
    }
}

impl Decoder for HeadDecoder {
    type Item = (ResponseHead, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some((status, version, headers, body_offset)) = parse_head(src)? else {
                return Ok(None);
            };

            src.advance(body_offset);

            if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
                trace!(status = status.as_u16(), "skipping interim response");
                continue;
            }

            let payload_size = payload_size(self.head_request, status, &headers)?;

            let mut builder = Response::builder().status(status).version(version);
            if let Some(map) = builder.headers_mut() {
                *map = headers;
            }
            let head = builder.body(()).map_err(ParseError::invalid_header)?;

            return Ok(Some((head, payload_size)));
        }
    }
}

type ParsedHead = (StatusCode, Version, HeaderMap, usize);

fn parse_head(src: &[u8]) -> Result<Option<ParsedHead>, ParseError> {
    if src.is_empty() {
        return Ok(None);
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let mut resp = httparse::Response::new(&mut headers);

    let status = resp.parse(src).map_err(|e| match e {
        Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
        e => ParseError::invalid_header(e.to_string()),
    })?;

    let body_offset = match status {
        Status::Complete(body_offset) => body_offset,
        Status::Partial => {
            ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
            return Ok(None);
        }
    };

    ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

    let version = match resp.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        v => return Err(ParseError::InvalidVersion(v)),
    };

    let status = resp.code.and_then(|code| StatusCode::from_u16(code).ok()).ok_or(ParseError::InvalidStatus)?;

    let mut map = HeaderMap::with_capacity(resp.headers.len());
    for header in resp.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(ParseError::invalid_header)?;
        let value = HeaderValue::from_bytes(header.value).map_err(ParseError::invalid_header)?;
        map.append(name, value);
    }

    Ok(Some((status, version, map, body_offset)))
}

/// Decides how the body of a response is delimited.
fn payload_size(head_request: bool, status: StatusCode, headers: &HeaderMap) -> Result<PayloadSize, ParseError> {
    if head_request
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(PayloadSize::Empty);
    }

    // refer: https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length
    if let Some(te_value) = headers.get(TRANSFER_ENCODING) {
        return Ok(if is_chunked(te_value) { PayloadSize::Chunked } else { PayloadSize::UntilClose });
    }

    match headers.get(CONTENT_LENGTH) {
        Some(cl_value) => {
            let cl_str = cl_value.to_str().map_err(|_e| ParseError::invalid_content_length("value can't to_str"))?;
            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|_e| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;

            Ok(if length == 0 { PayloadSize::Empty } else { PayloadSize::Length(length) })
        }
        None => Ok(PayloadSize::UntilClose),
    }
}

/// Chunked must be the last transfer coding if present.
fn is_chunked(te_value: &HeaderValue) -> bool {
    te_value
        .to_str()
        .ok()
        .and_then(|value| value.rsplit(',').next())
        .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"))
}
