//! How a follower reaches its producer.
//!
//! The follower only needs request/response round trips, so any reliable
//! ordered byte stream works ([`StreamTransport`]), and tests can skip the
//! wire entirely ([`InProcessTransport`]).

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ReplResult, ReplicationError};
use crate::producer::Producer;
use crate::protocol::{read_frame, write_frame, Request, Response};

/// One request, one response.
pub trait SyncTransport {
    /// # Errors
    ///
    /// Transport failures. A producer `Error` response is returned as a
    /// response, not an error.
    fn call(&mut self, request: &Request) -> ReplResult<Response>;
}

impl<T: SyncTransport + ?Sized> SyncTransport for &mut T {
    fn call(&mut self, request: &Request) -> ReplResult<Response> {
        (**self).call(request)
    }
}

impl<T: SyncTransport + ?Sized> SyncTransport for Box<T> {
    fn call(&mut self, request: &Request) -> ReplResult<Response> {
        (**self).call(request)
    }
}

/// Framed requests over any `Read + Write` stream.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
}

impl<S: Read + Write> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> SyncTransport for StreamTransport<S> {
    fn call(&mut self, request: &Request) -> ReplResult<Response> {
        write_frame(&mut self.stream, &request.encode())?;
        let body = read_frame(&mut self.stream)?
            .ok_or_else(|| ReplicationError::protocol("producer closed the stream"))?;
        Response::decode(&body)
    }
}

/// A socket split into a buffered reader and a buffered writer.
#[derive(Debug)]
pub struct BufferedStream {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl BufferedStream {
    /// # Errors
    ///
    /// `Io` if the socket cannot be cloned.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let write_half = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer: BufWriter::new(write_half),
        })
    }
}

impl Read for BufferedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for BufferedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

pub type TcpTransport = StreamTransport<BufferedStream>;

/// Connects to a producer listening on `addr`.
///
/// `read_timeout` bounds every response wait; it must exceed any
/// `max_wait_ms` the follower asks for.
///
/// # Errors
///
/// `Io` if the connection cannot be made.
pub fn connect_tcp<A: ToSocketAddrs>(addr: A, read_timeout: Option<Duration>) -> ReplResult<TcpTransport> {
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(read_timeout)?;
    Ok(StreamTransport::new(BufferedStream::new(stream)?))
}

/// Calls a [`Producer`] in the same process.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    producer: Arc<Producer>,
}

impl InProcessTransport {
    pub fn new(producer: Arc<Producer>) -> Self {
        Self { producer }
    }
}

impl SyncTransport for InProcessTransport {
    fn call(&mut self, request: &Request) -> ReplResult<Response> {
        Ok(self.producer.handle(request.clone()))
    }
}
