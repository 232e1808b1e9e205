//! Data phase: dot-stuffing and the body writer.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};

use super::Client;
use crate::error::Result;
use crate::flow::Flow;
use crate::types::Reply;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LineState {
    /// Nothing written yet.
    #[default]
    Begin,
    /// At the start of a line.
    BeginLine,
    /// After a `\r`.
    Cr,
    /// Inside a line.
    Data,
}

/// Incremental dot-stuffing encoder.
///
/// A `.` at the start of a line is doubled and a bare `\n` becomes `\r\n`.
/// Input may be split anywhere; state carries across calls.
#[derive(Debug, Clone, Default)]
pub struct DotStuffer {
    state: LineState,
}

impl DotStuffer {
    /// Creates an encoder positioned at the start of the body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes `input` into `out`.
    pub fn encode(&mut self, input: &[u8], out: &mut BytesMut) {
        out.reserve(input.len() + 2);
        for &byte in input {
            match self.state {
                LineState::Begin | LineState::BeginLine | LineState::Data => {
                    if matches!(self.state, LineState::Begin | LineState::BeginLine) && byte == b'.' {
                        out.put_u8(b'.');
                    }
                    self.state = match byte {
                        b'\r' => LineState::Cr,
                        b'\n' => {
                            out.put_u8(b'\r');
                            LineState::BeginLine
                        }
                        _ => LineState::Data,
                    };
                }
                LineState::Cr => {
                    self.state = if byte == b'\n' {
                        LineState::BeginLine
                    } else {
                        LineState::Data
                    };
                }
            }
            out.put_u8(byte);
        }
    }

    /// Writes the end-of-data marker, completing any unfinished line.
    pub fn finish(&mut self, out: &mut BytesMut) {
        let tail: &[u8] = match self.state {
            LineState::Begin | LineState::Data => b"\r\n.\r\n",
            LineState::Cr => b"\n.\r\n",
            LineState::BeginLine => b".\r\n",
        };
        out.put_slice(tail);
        self.state = LineState::Begin;
    }
}

/// Writes the message body after DATA has been accepted.
///
/// [`close`](Self::close) must be called, even after a failed write: it
/// sends the end-of-data marker and reads the server's verdict. A writer
/// dropped without closing leaves the client unusable except for
/// [`Client::close`].
#[must_use = "the data phase only ends when the writer is closed"]
pub struct DataWriter<'a, S> {
    client: &'a mut Client<S>,
    stuffer: DotStuffer,
    buf: BytesMut,
}

impl<'a, S> DataWriter<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(super) fn new(client: &'a mut Client<S>) -> Self {
        Self {
            client,
            stuffer: DotStuffer::new(),
            buf: BytesMut::new(),
        }
    }

    /// Writes raw body bytes, dot-stuffed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error or timeout if the write fails.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.clear();
        self.stuffer.encode(bytes, &mut self.buf);
        self.client.write_body(&self.buf).await
    }

    /// Echoes one line to the transcript, then writes it with CRLF.
    ///
    /// # Errors
    ///
    /// Returns an I/O error or timeout if the write fails.
    pub async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.client.transcript().sent(&String::from_utf8_lossy(line));
        self.buf.clear();
        self.stuffer.encode(line, &mut self.buf);
        self.stuffer.encode(b"\r\n", &mut self.buf);
        self.client.write_body(&self.buf).await
    }

    /// Sends the end-of-data marker and reads the final reply.
    ///
    /// The marker exchange is checkpointed at [`Stage::Dot`](crate::Stage::Dot).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the reply is not 250.
    pub async fn close(mut self) -> Result<Flow<Reply>> {
        self.buf.clear();
        self.stuffer.finish(&mut self.buf);
        self.client.end_data(&self.buf).await
    }
}

impl<S> std::fmt::Debug for DataWriter<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataWriter")
            .field("stuffer", &self.stuffer)
            .finish_non_exhaustive()
    }
}
