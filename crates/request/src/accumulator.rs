//! Buffering of streamed response data under a hard size ceiling.

use std::cmp;

use bytes::{Bytes, BytesMut};
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{trace, warn};

use crate::protocol::SizeLimitExceeded;
use crate::transport::ResponseSink;

/// Collects the body and, optionally, the headers of one response.
///
/// The body never grows past `max_size`. A data event that does not fit is cut
/// to the remaining room and reported as [`SizeLimitExceeded`], so the driver can
/// fail the step while the buffer stays at exactly the ceiling.
#[derive(Debug)]
pub struct ResponseAccumulator {
    body: BytesMut,
    headers: HeaderMap,
    max_size: usize,
    collect_headers: bool,
}

impl ResponseAccumulator {
    pub fn new(max_size: usize, collect_headers: bool) -> Self {
        Self { body: BytesMut::new(), headers: HeaderMap::new(), max_size, collect_headers }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Takes the body out, leaving an empty buffer behind.
    pub fn take_body(&mut self) -> Bytes {
        self.body.split().freeze()
    }

    /// Takes the headers out, leaving an empty map behind.
    pub fn take_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.headers)
    }

    fn reserve_for(&mut self, value: &HeaderValue) {
        let declared = value.to_str().ok().and_then(|value| value.trim().parse::<u64>().ok());
        match declared {
            Some(length) => {
                let wanted = usize::try_from(length).map_or(self.max_size, |length| cmp::min(length, self.max_size));
                trace!(declared = length, reserved = wanted, "reserving response buffer");
                self.body.reserve(wanted.saturating_sub(self.body.len()));
            }
            None => warn!(value = ?value, "could not parse Content-Length header"),
        }
    }
}

impl ResponseSink for ResponseAccumulator {
    fn on_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        if self.collect_headers {
            self.headers.insert(name.clone(), value.clone());
        }

        if *name == CONTENT_LENGTH {
            self.reserve_for(value);
        }
    }

    fn on_data(&mut self, data: &[u8]) -> Result<(), SizeLimitExceeded> {
        if data.is_empty() {
            warn!("ignoring empty data event");
            return Ok(());
        }

        let room = self.max_size.saturating_sub(self.body.len());
        if room == 0 {
            return Err(SizeLimitExceeded { limit: self.max_size });
        }

        if data.len() > room {
            self.body.extend_from_slice(&data[..room]);
            warn!(limit = self.max_size, dropped = data.len() - room, "response truncated at size limit");
            return Err(SizeLimitExceeded { limit: self.max_size });
        }

        self.body.extend_from_slice(data);
        Ok(())
    }
}
