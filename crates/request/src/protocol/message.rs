use bytes::Bytes;
use http::Response;

/// The head of an HTTP response: status line and headers with an empty body placeholder.
pub type ResponseHead = Response<()>;

/// One item produced while decoding a response: the head, or a piece of the body.
#[derive(Debug)]
pub enum Message<T> {
    /// Contains the header information of type `T`
    Header(T),
    /// Contains a chunk of payload data or EOF marker
    Payload(PayloadItem),
}

/// An item of the response body stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// A chunk of payload data
    Chunk(Bytes),
    /// Marks the end of the payload stream
    Eof,
}

/// How the length of a response body is determined.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Payload with known length in bytes
    Length(u64),
    /// Payload using chunked transfer encoding
    Chunked,
    /// Payload delimited by the server closing the connection
    UntilClose,
    /// Empty payload (no body)
    Empty,
}
