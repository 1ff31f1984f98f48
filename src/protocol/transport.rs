use std::{
    collections::VecDeque,
    io::{self, Read, Write},
};

use log::trace;
use thiserror::Error;

use super::{
    Envelope, Response,
    codec::{self, CodecError},
    framing::{DELIMITER, LineFramer},
};

const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to process message: {0}")]
    Codec(#[from] CodecError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by the daemon")]
    Closed,
}

impl TransportError {
    /// Whether the socket is unusable after this error.
    ///
    /// Codec errors only affect the message being processed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Codec(_))
    }
}

/// Write half of the daemon channel.
pub struct ProtocolTransport<T: Write> {
    stream: T,
}

impl<T: Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    /// Encode the request and write it as one delimited line.
    pub fn write_request(&mut self, envelope: &Envelope<'_>) -> Result<(), TransportError> {
        let mut line = codec::encode_request(envelope)?.into_bytes();
        line.push(DELIMITER);
        self.stream.write_all(&line)?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }
}

/// Read half of the daemon channel: raw chunks in, decoded responses out.
pub struct ResponseReader<R: Read> {
    stream: R,
    framer: LineFramer,
    ready: VecDeque<Vec<u8>>,
    chunk: Vec<u8>,
}

impl<R: Read> ResponseReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            framer: LineFramer::new(),
            ready: VecDeque::new(),
            chunk: vec![0; READ_CHUNK],
        }
    }

    /// Block until the next complete message is available and decode it.
    ///
    /// A [`TransportError::Codec`] leaves the reader usable; the offending
    /// message has already been consumed.
    pub fn read_response(&mut self) -> Result<Response, TransportError> {
        loop {
            if let Some(message) = self.ready.pop_front() {
                return Ok(codec::decode_response(&message)?);
            }

            let read = match self.stream.read(&mut self.chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            trace!("received {read} bytes");
            self.ready.extend(self.framer.push(&self.chunk[..read]));
        }
    }
}
