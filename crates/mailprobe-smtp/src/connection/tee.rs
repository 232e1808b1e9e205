//! Read-side tee that mirrors received lines into the transcript.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::transport::MAX_LINE_LEN;
use crate::transcript::Transcript;

/// Wraps a stream and reports every complete line read from it.
///
/// Lines are reported as soon as their bytes arrive, before any parser
/// sees them, with the trailing `\n` and any `\r` before it removed. A line
/// split across reads is held until it completes; bytes past the line
/// length limit are not kept.
#[derive(Debug)]
pub struct Tee<S> {
    inner: S,
    partial: Vec<u8>,
    transcript: Transcript,
}

impl<S> Tee<S> {
    /// Wraps `inner`.
    pub const fn new(inner: S, transcript: Transcript) -> Self {
        Self {
            inner,
            partial: Vec::new(),
            transcript,
        }
    }

    /// Returns a reference to the wrapped stream.
    pub const fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Returns the wrapped stream, dropping any incomplete line.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn mirror(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == b'\n' {
                if self.partial.last() == Some(&b'\r') {
                    self.partial.pop();
                }
                self.transcript
                    .received(&String::from_utf8_lossy(&self.partial));
                self.partial.clear();
            } else if self.partial.len() < MAX_LINE_LEN {
                self.partial.push(byte);
            }
        }
    }
}

impl<S> AsyncRead for Tee<S>
where
    S: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            this.mirror(&buf.filled()[before..]);
        }
        poll
    }
}

impl<S> AsyncWrite for Tee<S>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
