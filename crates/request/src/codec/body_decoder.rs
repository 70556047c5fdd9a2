//! Decoder for response bodies.
//!
//! Supports the three ways an HTTP/1.1 response body can be delimited:
//! - a fixed Content-Length
//! - chunked transfer encoding ([RFC 9112 section 7.1](https://www.rfc-editor.org/rfc/rfc9112#section-7.1))
//! - the server closing the connection

use std::cmp;

use bytes::{Buf, BytesMut};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Longest chunk-size or trailer line accepted.
const MAX_LINE_BYTES: usize = 4 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// Bytes still to read of a Content-Length body
    Length(u64),
    Chunked(ChunkedState),
    UntilClose,
    NoBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Reading a chunk-size line
    Size,
    /// Reading chunk data, with the bytes left in this chunk
    Data(u64),
    /// Reading the CRLF closing a chunk
    DataEnd,
    /// Skipping trailer fields up to the empty line
    Trailer,
    End,
}

impl From<PayloadSize> for BodyDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        let kind = match payload_size {
            PayloadSize::Length(length) => Kind::Length(length),
            PayloadSize::Chunked => Kind::Chunked(ChunkedState::Size),
            PayloadSize::UntilClose => Kind::UntilClose,
            PayloadSize::Empty => Kind::NoBody,
        };
        Self { kind }
    }
}

impl BodyDecoder {
    /// Whether the end of the connection is also the end of the body.
    pub fn ends_on_close(&self) -> bool {
        matches!(self.kind, Kind::UntilClose)
    }
}

impl Decoder for BodyDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(0) | Kind::NoBody => Ok(Some(PayloadItem::Eof)),
            Kind::Length(remaining) => {
                if src.is_empty() {
                    return Ok(None);
                }

                let len = cmp::min(*remaining, src.len() as u64);
                let bytes = src.split_to(usize::try_from(len).unwrap_or(src.len())).freeze();
                *remaining -= bytes.len() as u64;
                Ok(Some(PayloadItem::Chunk(bytes)))
            }
            Kind::Chunked(state) => decode_chunked(state, src),
            Kind::UntilClose => {
                if src.is_empty() {
                    return Ok(None);
                }
                Ok(Some(PayloadItem::Chunk(src.split().freeze())))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }

        ensure!(self.ends_on_close(), ParseError::invalid_body("connection closed before body complete"));
        Ok(Some(PayloadItem::Eof))
    }
}

fn decode_chunked(state: &mut ChunkedState, src: &mut BytesMut) -> Result<Option<PayloadItem>, ParseError> {
    loop {
        match *state {
            ChunkedState::Size => match httparse::parse_chunk_size(src) {
                Ok(Status::Complete((consumed, size))) => {
                    src.advance(consumed);
                    trace!(size, "read chunk size");
                    *state = if size == 0 { ChunkedState::Trailer } else { ChunkedState::Data(size) };
                }
                Ok(Status::Partial) => {
                    ensure!(src.len() <= MAX_LINE_BYTES, ParseError::invalid_body("chunk size line too long"));
                    return Ok(None);
                }
                Err(_) => return Err(ParseError::invalid_body("invalid chunk size line")),
            },

            ChunkedState::Data(remaining) => {
                if src.is_empty() {
                    return Ok(None);
                }

                let len = cmp::min(remaining, src.len() as u64);
                let bytes = src.split_to(usize::try_from(len).unwrap_or(src.len())).freeze();
                let left = remaining - bytes.len() as u64;
                *state = if left == 0 { ChunkedState::DataEnd } else { ChunkedState::Data(left) };
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }

            ChunkedState::DataEnd => {
                if src.len() < 2 {
                    return Ok(None);
                }
                ensure!(&src[..2] == b"\r\n", ParseError::invalid_body("missing CRLF after chunk data"));
                src.advance(2);
                *state = ChunkedState::Size;
            }

            ChunkedState::Trailer => match src.windows(2).position(|w| w == b"\r\n") {
                Some(0) => {
                    src.advance(2);
                    *state = ChunkedState::End;
                }
                Some(pos) => src.advance(pos + 2),
                None => {
                    ensure!(src.len() <= MAX_LINE_BYTES, ParseError::invalid_body("trailer line too long"));
                    return Ok(None);
                }
            },

            ChunkedState::End => return Ok(Some(PayloadItem::Eof)),
        }
    }
}
