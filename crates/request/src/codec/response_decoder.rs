//! HTTP response decoder.
//!
//! Coordinates head and body decoding with a small state machine held in the
//! `body_decoder` field:
//! - `None`: currently parsing the head
//! - `Some(BodyDecoder)`: currently parsing the body

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body_decoder::BodyDecoder;
use crate::codec::head_decoder::HeadDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, ResponseHead};

/// Decodes one HTTP/1.1 response: a [`Message::Header`] followed by payload items up to EOF.
#[derive(Debug)]
pub struct ResponseDecoder {
    head_decoder: HeadDecoder,
    body_decoder: Option<BodyDecoder>,
}

impl ResponseDecoder {
    /// `head_request` tells the decoder the response answers a HEAD request and has no body.
    pub fn new(head_request: bool) -> Self {
        Self { head_decoder: HeadDecoder::new(head_request), body_decoder: None }
    }

    fn wrap(&mut self, item: Option<PayloadItem>) -> Option<Message<(ResponseHead, PayloadSize)>> {
        match item {
            Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
            Some(item @ PayloadItem::Eof) => {
                self.body_decoder.take();
                Some(Message::Payload(item))
            }
            None => None,
        }
    }
}

impl Decoder for ResponseDecoder {
    type Item = Message<(ResponseHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(body_decoder) = &mut self.body_decoder {
            let item = body_decoder.decode(src)?;
            return Ok(self.wrap(item));
        }

        let message = match self.head_decoder.decode(src)? {
            Some((head, payload_size)) => {
                self.body_decoder = Some(payload_size.into());
                Some(Message::Header((head, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(body_decoder) = &mut self.body_decoder {
            let item = body_decoder.decode_eof(src)?;
            return Ok(self.wrap(item));
        }

        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None => Err(ParseError::invalid_header("connection closed before response head")),
        }
    }
}
