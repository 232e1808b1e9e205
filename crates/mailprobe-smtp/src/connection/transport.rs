//! Line transport: command writer and reply reader over one stream.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::stream::SmtpStream;
use super::tee::Tee;
use crate::command::Command;
use crate::config::TlsOptions;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::transcript::Transcript;
use crate::types::Reply;

/// Upper bound on lines in one reply.
const MAX_REPLY_LINES: usize = 512;

/// Upper bound on bytes in one reply line, line ending included.
pub(super) const MAX_LINE_LEN: usize = 4096;

/// Correlates a sent command with its reply.
///
/// Replies must be read in the order tickets were issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Ticket(u64);

/// Writes commands and reads replies on one connection.
///
/// Everything read passes through a [`Tee`] so the transcript shows raw
/// server lines as they arrive.
#[derive(Debug)]
pub struct Transport<S> {
    reader: BufReader<Tee<SmtpStream<S>>>,
    transcript: Transcript,
    issued: u64,
    answered: u64,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a stream.
    pub fn new(stream: SmtpStream<S>, transcript: Transcript) -> Self {
        Self {
            reader: BufReader::new(Tee::new(stream, transcript.clone())),
            transcript,
            issued: 0,
            answered: 0,
        }
    }

    /// Returns the transcript this transport reports to.
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Returns true once the stream is encrypted.
    pub fn is_tls(&self) -> bool {
        self.reader.get_ref().get_ref().is_tls()
    }

    /// Writes a command and returns the ticket for its reply.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write fails.
    pub async fn send(&mut self, command: &Command) -> Result<Ticket> {
        let line = command.to_string();
        tracing::debug!(line, "send");
        self.transcript.sent(&line);
        self.write_raw(&command.serialize()).await?;
        Ok(self.unsolicited())
    }

    /// Registers a reply that no command of its own asks for: the banner,
    /// or the verdict after the end-of-data marker.
    pub const fn unsolicited(&mut self) -> Ticket {
        self.issued += 1;
        Ticket(self.issued)
    }

    /// Writes bytes as they are and flushes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write fails.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads the reply for `ticket` and checks it against `expect`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if an earlier reply is still unread,
    /// [`Error::Closed`] if the stream ends, [`Error::Malformed`] for an
    /// unparseable or oversized reply and [`Error::Protocol`] if the code
    /// does not match.
    pub async fn read_reply(&mut self, ticket: Ticket, expect: u16) -> Result<Reply> {
        if ticket.0 != self.answered + 1 {
            return Err(Error::InvalidState(format!(
                "reply {} requested while reply {} is pending",
                ticket.0,
                self.answered + 1
            )));
        }
        self.answered = ticket.0;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            let last = is_last_reply_line(&line);
            lines.push(line);
            if last {
                break;
            }
            if lines.len() >= MAX_REPLY_LINES {
                return Err(Error::Malformed("reply too long".into()));
            }
        }

        let reply = parse_reply(&lines)?;
        tracing::debug!(code = reply.code.as_u16(), expect, "reply");
        reply.expect(expect)
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        (&mut self.reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if buf.last() != Some(&b'\n') {
            if buf.len() >= MAX_LINE_LEN {
                return Err(Error::Malformed("reply line too long".into()));
            }
            return Err(Error::Closed);
        }
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Shuts down the write side of the stream.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.reader.get_mut().shutdown().await?;
        Ok(())
    }

    /// Upgrades the stream to TLS.
    ///
    /// Bytes buffered but not yet parsed are discarded: nothing the server
    /// sent in plaintext after accepting STARTTLS may be trusted.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails; the connection is lost.
    pub async fn start_tls(self, server_name: &str, options: &TlsOptions) -> Result<Self> {
        let Self {
            reader,
            mut transcript,
            issued,
            answered,
        } = self;
        let stream = reader.into_inner().into_inner();
        let upgraded = stream.upgrade(server_name, options).await?;
        transcript.set_tls();
        Ok(Self {
            reader: BufReader::new(Tee::new(upgraded, transcript.clone())),
            transcript,
            issued,
            answered,
        })
    }
}
