//! Transports carrying protocol lines between engine and controller.
//!
//! The engine only ever talks to a [`Transport`]: it blocks in
//! [`Transport::receive`] until the controller sends something, and pushes
//! replies and `break_now` notices through [`Transport::send`]. This keeps the
//! engine independent of the interprocess mechanism sitting behind it.
//!
//! Two implementations are provided:
//!
//! - [`ChannelTransport`]: in-process, backed by `std::sync::mpsc`. The
//!   controller side is a [`ControllerHandle`].
//! - [`StreamTransport`]: any `BufRead`/`Write` pair, typically both halves
//!   of a `TcpStream`.

use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::mpsc;

use thiserror::Error;
use tracing::trace;

use crate::codec::{decode_line, encode_line, ProtocolError};
use crate::messages::{Inbound, Outbound, Request, RequestEnvelope, ResumeDecision};

/// Errors raised by a transport.
#[derive(Error, Debug)]
pub enum TransportError
{
    /// A line could not be decoded (or a message could not be encoded).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer went away.
    #[error("Peer disconnected")]
    Closed,

    /// Underlying I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError
{
    /// Whether the error only concerns a single malformed message, so the
    /// connection itself is still usable.
    #[must_use]
    pub const fn is_malformed(&self) -> bool
    {
        matches!(self, Self::Protocol(ProtocolError::Malformed(_)))
    }
}

/// Engine-side view of a controller connection.
pub trait Transport
{
    /// Block until the controller sends the next message.
    ///
    /// ## Errors
    ///
    /// - `Protocol(Malformed)`: the message was dropped; the transport stays usable
    /// - `Closed` / `Io`: the connection is gone
    fn receive(&mut self) -> Result<Inbound, TransportError>;

    /// Send a reply or a `break_now` notice to the controller.
    ///
    /// ## Errors
    ///
    /// Returns `Closed` or `Io` when the controller cannot be reached.
    fn send(&mut self, message: &Outbound) -> Result<(), TransportError>;
}

/// In-process transport backed by a pair of channels.
#[derive(Debug)]
pub struct ChannelTransport
{
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<String>,
}

/// Controller end of a [`ChannelTransport`].
#[derive(Debug)]
pub struct ControllerHandle
{
    inbound: mpsc::Sender<String>,
    outbound: mpsc::Receiver<String>,
    next_id: u64,
}

/// Create a connected engine/controller pair.
#[must_use]
pub fn channel_transport() -> (ChannelTransport, ControllerHandle)
{
    let (inbound_tx, inbound_rx) = mpsc::channel();
    let (outbound_tx, outbound_rx) = mpsc::channel();
    (
        ChannelTransport {
            inbound: inbound_rx,
            outbound: outbound_tx,
        },
        ControllerHandle {
            inbound: inbound_tx,
            outbound: outbound_rx,
            next_id: 0,
        },
    )
}

impl Transport for ChannelTransport
{
    fn receive(&mut self) -> Result<Inbound, TransportError>
    {
        let line = self.inbound.recv().map_err(|_| TransportError::Closed)?;
        trace!(%line, "channel receive");
        Ok(decode_line(&line)?)
    }

    fn send(&mut self, message: &Outbound) -> Result<(), TransportError>
    {
        let line = encode_line(message)?;
        self.outbound.send(line).map_err(|_| TransportError::Closed)
    }
}

impl ControllerHandle
{
    /// Queue a raw line for the engine, bypassing encoding.
    ///
    /// ## Errors
    ///
    /// Returns `Closed` if the engine side was dropped.
    pub fn send_line(&self, line: impl Into<String>) -> Result<(), TransportError>
    {
        self.inbound.send(line.into()).map_err(|_| TransportError::Closed)
    }

    /// Queue a request and return the identifier its reply will carry.
    ///
    /// ## Errors
    ///
    /// Returns `Closed` if the engine side was dropped.
    pub fn request(&mut self, request: Request) -> Result<u64, TransportError>
    {
        self.next_id += 1;
        let id = self.next_id;
        let line = encode_line(&Inbound::Request(RequestEnvelope { id, request }))?;
        self.send_line(line)?;
        Ok(id)
    }

    /// Queue an answer to a `break_now` notice.
    ///
    /// ## Errors
    ///
    /// Returns `Closed` if the engine side was dropped.
    pub fn decide(&self, decision: ResumeDecision) -> Result<(), TransportError>
    {
        self.send_line(encode_line(&Inbound::Decision(decision))?)
    }

    /// Take the next message sent by the engine, if any is waiting.
    ///
    /// ## Errors
    ///
    /// Returns `Closed` once the engine side is dropped and drained.
    pub fn try_receive(&self) -> Result<Option<Outbound>, TransportError>
    {
        match self.outbound.try_recv() {
            Ok(line) => Ok(Some(decode_line(&line)?)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    /// Block until the engine sends a message.
    ///
    /// ## Errors
    ///
    /// Returns `Closed` once the engine side is dropped and drained.
    pub fn receive(&self) -> Result<Outbound, TransportError>
    {
        let line = self.outbound.recv().map_err(|_| TransportError::Closed)?;
        Ok(decode_line(&line)?)
    }
}

/// Blocking transport over a reader/writer pair.
#[derive(Debug)]
pub struct StreamTransport<R, W>
{
    reader: R,
    writer: W,
    line: Vec<u8>,
}

impl<R: BufRead, W: Write> StreamTransport<R, W>
{
    /// Wrap a reader and a writer.
    pub fn new(reader: R, writer: W) -> Self
    {
        Self {
            reader,
            writer,
            line: Vec::new(),
        }
    }
}

impl StreamTransport<BufReader<TcpStream>, TcpStream>
{
    /// Use both directions of a TCP connection.
    ///
    /// ## Errors
    ///
    /// Fails if the socket cannot be cloned.
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self>
    {
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self::new(reader, stream))
    }
}

impl<R: BufRead, W: Write> Transport for StreamTransport<R, W>
{
    fn receive(&mut self) -> Result<Inbound, TransportError>
    {
        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line)? == 0 {
            return Err(TransportError::Closed);
        }
        let line = std::str::from_utf8(&self.line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        trace!(line = %line.trim_end(), "stream receive");
        Ok(decode_line(line)?)
    }

    fn send(&mut self, message: &Outbound) -> Result<(), TransportError>
    {
        let line = encode_line(message)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}
