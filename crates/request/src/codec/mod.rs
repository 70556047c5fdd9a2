//! HTTP/1.1 wire codec used by [`TcpTransport`](crate::transport::TcpTransport).
//!
//! - [`RequestEncoder`]: serializes the request head
//! - [`ResponseDecoder`]: decodes the response head, then its body
//!   (Content-Length, chunked, or delimited by connection close)
//!
//! Both implement the `tokio_util::codec` traits and work on `BytesMut` buffers,
//! so they can be driven by hand from non-blocking reads.

mod body_decoder;
mod head_decoder;
mod request_encoder;
mod response_decoder;

pub use request_encoder::RequestEncoder;
pub use request_encoder::RequestHead;
pub use response_decoder::ResponseDecoder;
