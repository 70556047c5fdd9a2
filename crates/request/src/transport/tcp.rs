//! Plain HTTP/1.1 transport over a tokio TCP stream.
//!
//! The connection is opened in [`TransportDriver::ready`], the request is written
//! and the response read with the non-blocking `try_write`/`try_read_buf` calls in
//! [`TransportDriver::perform_step`]. One connection serves one request and is
//! released by [`TransportDriver::close`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::{Buf, BytesMut};
use http::header::AUTHORIZATION;
use http::uri::{Authority, Scheme};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::codec::{RequestEncoder, ResponseDecoder};
use crate::config::{ClientConfig, Credentials};
use crate::protocol::{Message, PayloadItem, TransportError};
use crate::transport::{Connector, Pending, Readiness, ResponseSink, StepOutcome, TransportDriver};

const READ_BUF_SIZE: usize = 4 * 1024;

/// Builds a [`TcpTransport`] for every client.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, config: &ClientConfig) -> Result<Box<dyn TransportDriver>, TransportError> {
        Ok(Box::new(TcpTransport::new(config)?))
    }
}

/// Where an `http://` URL points to.
#[derive(Debug, Clone)]
struct Target {
    uri: Uri,
    host: String,
    port: u16,
}

impl Target {
    fn parse(url: &str) -> Result<Self, TransportError> {
        let uri = url.parse::<Uri>().map_err(TransportError::invalid_url)?;

        match uri.scheme() {
            Some(scheme) if *scheme == Scheme::HTTP => {}
            Some(scheme) => return Err(TransportError::UnsupportedScheme { scheme: scheme.to_string() }),
            None => return Err(TransportError::invalid_url(format!("{url}: missing scheme"))),
        }

        let authority: &Authority =
            uri.authority().ok_or_else(|| TransportError::invalid_url(format!("{url}: missing host")))?;
        let host = authority.host().trim_start_matches('[').trim_end_matches(']').to_owned();
        let port = authority.port_u16().unwrap_or(80);

        Ok(Self { uri, host, port })
    }
}

/// An open connection and the state of the exchange running on it.
#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    write_buf: BytesMut,
    read_buf: BytesMut,
    decoder: ResponseDecoder,
    eof: bool,
}

/// HTTP/1.1 request/response exchange over plain TCP.
#[derive(Debug)]
pub struct TcpTransport {
    target: Target,
    method: Method,
    timeout: Duration,
    credentials: Option<Credentials>,
    headers: HeaderMap,
    body: BytesMut,
    body_len: Option<usize>,
    deadline: Option<Instant>,
    connection: Option<Connection>,
    status: Option<StatusCode>,
    done: bool,
}

impl TcpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        Ok(Self {
            target: Target::parse(&config.url)?,
            method: config.method.clone(),
            timeout: config.timeout,
            credentials: config.credentials.clone(),
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            body_len: None,
            deadline: None,
            connection: None,
            status: None,
            done: false,
        })
    }

    fn ensure_idle(&self) -> Result<(), TransportError> {
        if self.connection.is_some() {
            return Err(TransportError::invalid_state("request in flight"));
        }
        Ok(())
    }

    /// The deadline starts with the first step or readiness wait of a request.
    fn deadline(&mut self) -> Instant {
        let timeout = self.timeout;
        *self.deadline.get_or_insert_with(|| Instant::now() + timeout)
    }

    fn encode_request(&self) -> Result<BytesMut, TransportError> {
        let mut head = Request::builder()
            .method(self.method.clone())
            .uri(self.target.uri.clone())
            .body(())
            .map_err(TransportError::invalid_url)?;

        head.headers_mut().extend(self.headers.clone());

        if let Some(credentials) = &self.credentials {
            if !head.headers().contains_key(AUTHORIZATION) {
                let token = STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
                let value = HeaderValue::from_str(&format!("Basic {token}")).map_err(TransportError::invalid_header)?;
                head.headers_mut().insert(AUTHORIZATION, value);
            }
        }

        let mut buf = BytesMut::with_capacity(READ_BUF_SIZE + self.body.len());
        RequestEncoder::new().encode((head, self.body.len()), &mut buf)?;
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    async fn connect(&mut self, remaining: Duration) -> Result<(), TransportError> {
        let write_buf = self.encode_request()?;

        debug!(host = %self.target.host, port = self.target.port, "connecting");
        let stream = tokio::time::timeout(remaining, TcpStream::connect((self.target.host.as_str(), self.target.port)))
            .await
            .map_err(|_elapsed| TransportError::Timeout { timeout: self.timeout })??;
        stream.set_nodelay(true)?;

        self.connection = Some(Connection {
            stream,
            write_buf,
            read_buf: BytesMut::with_capacity(READ_BUF_SIZE),
            decoder: ResponseDecoder::new(self.method == Method::HEAD),
            eof: false,
        });
        Ok(())
    }

    /// Hands every complete message in the read buffer to the sink. `Ok(true)` once the response ended.
    fn drain_messages(&mut self, sink: &mut dyn ResponseSink) -> Result<bool, TransportError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(TransportError::invalid_state("no connection"));
        };

        loop {
            let message = if connection.eof {
                connection.decoder.decode_eof(&mut connection.read_buf)?
            } else {
                connection.decoder.decode(&mut connection.read_buf)?
            };

            match message {
                Some(Message::Header((head, payload_size))) => {
                    trace!(status = head.status().as_u16(), ?payload_size, "received response head");
                    self.status = Some(head.status());
                    for (name, value) in head.headers() {
                        sink.on_header(name, value);
                    }
                }
                Some(Message::Payload(PayloadItem::Chunk(bytes))) => sink.on_data(&bytes)?,
                Some(Message::Payload(PayloadItem::Eof)) => return Ok(true),
                None if connection.eof => return Err(TransportError::ConnectionClosed),
                None => return Ok(false),
            }
        }
    }

    fn step(&mut self, sink: &mut dyn ResponseSink) -> Result<Option<Pending>, TransportError> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(Some(Pending::InProgress));
        };

        while connection.write_buf.has_remaining() {
            match connection.stream.try_write(&connection.write_buf) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => connection.write_buf.advance(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(Some(Pending::WouldBlock)),
                Err(e) => return Err(e.into()),
            }
        }

        if !connection.eof {
            connection.read_buf.reserve(READ_BUF_SIZE);
            match connection.stream.try_read_buf(&mut connection.read_buf) {
                Ok(0) => connection.eof = true,
                Ok(n) => trace!(n, "read response bytes"),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        if self.drain_messages(sink)? { Ok(None) } else { Ok(Some(Pending::WouldBlock)) }
    }
}

#[async_trait]
impl TransportDriver for TcpTransport {
    fn set_url(&mut self, url: &str) -> Result<(), TransportError> {
        self.ensure_idle()?;
        self.target = Target::parse(url)?;
        Ok(())
    }

    fn set_method(&mut self, method: &Method) -> Result<(), TransportError> {
        self.ensure_idle()?;
        self.method = method.clone();
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.ensure_idle()?;
        self.timeout = timeout;
        Ok(())
    }

    fn set_header(&mut self, key: &str, value: &str) -> Result<(), TransportError> {
        self.ensure_idle()?;
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(TransportError::invalid_header)?;
        let value = HeaderValue::from_str(value).map_err(TransportError::invalid_header)?;
        self.headers.append(name, value);
        Ok(())
    }

    fn open(&mut self, body_len: usize) -> Result<(), TransportError> {
        self.ensure_idle()?;
        self.body = BytesMut::with_capacity(body_len);
        self.body_len = Some(body_len);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let Some(body_len) = self.body_len else {
            return Err(TransportError::invalid_state("body written before open"));
        };

        let accepted = data.len().min(body_len - self.body.len());
        self.body.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn perform_step(&mut self, sink: &mut dyn ResponseSink) -> StepOutcome {
        if self.done {
            return StepOutcome::Done;
        }

        if Instant::now() >= self.deadline() {
            return StepOutcome::Failed(TransportError::Timeout { timeout: self.timeout });
        }

        match self.step(sink) {
            Ok(None) => {
                self.done = true;
                StepOutcome::Done
            }
            Ok(Some(pending)) => StepOutcome::RetryLater(pending),
            Err(e) => StepOutcome::Failed(e),
        }
    }

    async fn ready(&mut self) -> Result<Readiness, TransportError> {
        let remaining = self.deadline().saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::Timeout { timeout: self.timeout });
        }

        if self.connection.is_none() {
            self.connect(remaining).await?;
            return Ok(Readiness::Ready);
        }

        let Some(connection) = self.connection.as_ref().filter(|connection| !connection.eof) else {
            return Ok(Readiness::Ready);
        };

        let io = async {
            if connection.write_buf.has_remaining() {
                connection.stream.writable().await
            } else {
                connection.stream.readable().await
            }
        };

        tokio::time::timeout(remaining, io).await.map_err(|_elapsed| TransportError::Timeout { timeout: self.timeout })??;
        Ok(Readiness::Ready)
    }

    fn status_code(&self) -> Option<StatusCode> {
        self.status
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(connection) = self.connection.take() {
            trace!(eof = connection.eof, "releasing connection");
        }
        self.headers.clear();
        self.body.clear();
        self.body_len = None;
        self.deadline = None;
        self.status = None;
        self.done = false;
        Ok(())
    }
}
