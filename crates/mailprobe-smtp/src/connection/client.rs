//! SMTP client with staged interruption.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, timeout, timeout_at};

use super::data::DataWriter;
use super::session::{Session, SessionOptions};
use super::stream::SmtpStream;
use super::transport::Transport;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::flow::{Flow, Termination};
use crate::proceed;
use crate::stage::{Checkpoint, Stage};
use crate::transcript::{Observer, Transcript};
use crate::types::{Address, Extensions, Reply, ReplyCode};

/// SMTP client over one connection.
///
/// Every verb goes through one checkpointed exchange: write the command,
/// drop the connection if the policy says to drop after sending at this
/// stage, read and check the reply, then QUIT or drop if the policy names
/// this stage. A stop at a checkpoint is returned as [`Flow::Terminated`];
/// the connection is already closed (or QUIT sent) by then.
///
/// Once a checkpoint has fired, every verb fails with
/// [`Error::InvalidState`], even when its QUIT was refused and the
/// connection is still open. Only [`close`](Self::close) remains.
pub struct Client<S> {
    transport: Option<Transport<S>>,
    session: Session,
    options: SessionOptions,
    remote_host: String,
    transcript: Transcript,
    in_data: bool,
    stopped: bool,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Takes over a connected stream and reads the banner.
    ///
    /// `remote_host` is the host that was dialled; it is the default name
    /// for STARTTLS certificate checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the banner is not 220 or does not arrive in time.
    pub async fn connect(
        stream: S,
        remote_host: impl Into<String>,
        options: SessionOptions,
        observer: Arc<dyn Observer>,
    ) -> Result<Flow<Self>> {
        let remote_host = remote_host.into();
        let transcript = Transcript::new(observer);
        transcript.info(&format!("Connected to {remote_host}."));

        let mut client = Self {
            transport: Some(Transport::new(
                SmtpStream::plain(stream),
                transcript.clone(),
            )),
            session: Session::default(),
            options,
            remote_host,
            transcript,
            in_data: false,
            stopped: false,
        };

        let deadline = client.deadline();
        let transport = client.transport_mut()?;
        let ticket = transport.unsolicited();
        timeout_at(deadline, transport.read_reply(ticket, ReplyCode::SERVICE_READY.as_u16())).await??;

        proceed!(client.checkpoint(Stage::Connect).await?);
        Ok(Flow::Continue(client))
    }

    /// Returns the session state.
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the negotiated extensions.
    pub fn extensions(&self) -> Arc<Extensions> {
        Arc::clone(self.session.extensions())
    }

    /// Returns the host this client was connected to.
    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    /// Returns the connection settings.
    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Returns true while the connection is open.
    pub const fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Returns true once a checkpoint has fired, whether or not its QUIT
    /// was accepted.
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Runs EHLO, or HELO, once per connection.
    ///
    /// EHLO is tried first unless `send_helo` is set; if it fails, HELO is
    /// tried exactly once. Later calls return the recorded outcome without
    /// sending anything.
    ///
    /// # Errors
    ///
    /// Returns the greeting's error, now or as recorded, or the error of a
    /// refused quit-after QUIT.
    pub async fn hello(&mut self) -> Result<Flow<()>> {
        self.ready()?;
        if let Some(outcome) = self.session.hello_outcome() {
            return outcome.clone().map(Flow::Continue);
        }

        let stage = self.hello_stage();
        let greeted = self.greet(stage).await;
        self.session.record_hello(greeted.clone().map(|_| ()));
        proceed!(greeted?);
        self.checkpoint(stage).await
    }

    /// Issues STARTTLS, upgrades the stream and greets again.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is already encrypted, the server
    /// refuses, the handshake fails, or the post-TLS EHLO fails.
    pub async fn start_tls(&mut self) -> Result<Flow<()>> {
        proceed!(self.hello().await?);
        if self.session.is_tls() {
            return Err(Error::InvalidState("connection is already TLS".into()));
        }
        proceed!(self.command(220, Stage::Starttls, &Command::StartTls).await?);

        let server_name = self
            .options
            .tls
            .server_name
            .clone()
            .unwrap_or_else(|| self.remote_host.clone());
        let transport = self.transport.take().ok_or(Error::Closed)?;
        let upgraded = timeout(
            self.options.timeout,
            transport.start_tls(&server_name, &self.options.tls),
        )
        .await??;
        tracing::debug!(server_name, "TLS established");

        self.transport = Some(upgraded);
        self.session.mark_tls();
        self.transcript.set_tls();

        proceed!(self.ehlo(Stage::Hello).await?);
        self.checkpoint(Stage::Hello).await
    }

    /// Issues MAIL FROM, adding the parameters the server supports.
    ///
    /// `BODY=8BITMIME` is added when advertised, `SIZE=n` when advertised
    /// and a size is configured, and `SMTPUTF8` when requested.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] without sending anything if SMTPUTF8 was
    /// requested and the server does not offer it.
    pub async fn mail(&mut self, from: &Address) -> Result<Flow<Reply>> {
        proceed!(self.hello().await?);
        let extensions = self.extensions();

        if self.options.smtputf8 && !extensions.supports("SMTPUTF8") {
            return Err(Error::Config("server does not support SMTPUTF8".into()));
        }

        let command = Command::MailFrom {
            from: from.clone(),
            eight_bit_mime: extensions.supports("8BITMIME"),
            size: self.options.size.filter(|_| extensions.supports("SIZE")),
            smtputf8: self.options.smtputf8,
        };
        self.command(250, Stage::Mail, &command).await
    }

    /// Issues RCPT TO for one recipient and records it if accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply is not 25x.
    pub async fn rcpt(&mut self, to: &Address) -> Result<Flow<Reply>> {
        self.ready()?;
        let command = Command::RcptTo { to: to.clone() };
        let reply = proceed!(self.exchange(25, Stage::Rcpt, &command).await?);
        self.session.accept_recipient(to.clone());
        proceed!(self.checkpoint(Stage::Rcpt).await?);
        Ok(Flow::Continue(reply))
    }

    /// Issues DATA and returns the body writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply is not 354.
    pub async fn data(&mut self) -> Result<Flow<DataWriter<'_, S>>> {
        self.ready()?;
        proceed!(self.command(354, Stage::Data, &Command::Data).await?);
        self.in_data = true;
        Ok(Flow::Continue(DataWriter::new(self)))
    }

    /// Issues RSET and forgets accepted recipients.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply is not 250.
    pub async fn reset(&mut self) -> Result<Flow<Reply>> {
        proceed!(self.hello().await?);
        let reply = proceed!(self.command(250, Stage::None, &Command::Rset).await?);
        self.session.clear_recipients();
        Ok(Flow::Continue(reply))
    }

    /// Issues NOOP. No checkpoint applies.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply is not 250.
    pub async fn noop(&mut self) -> Result<Flow<Reply>> {
        proceed!(self.hello().await?);
        self.command(250, Stage::None, &Command::Noop).await
    }

    /// Issues QUIT and closes the connection on 221.
    ///
    /// On any other outcome the connection stays open so the caller can
    /// still [`close`](Self::close) it.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply is not 221.
    pub async fn quit(&mut self) -> Result<Flow<Reply>> {
        proceed!(self.hello().await?);
        let reply = proceed!(self.command(221, Stage::None, &Command::Quit).await?);
        self.close().await?;
        Ok(Flow::Continue(reply))
    }

    /// Closes the connection. Does nothing if it is already closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub async fn close(&mut self) -> Result<()> {
        self.in_data = false;
        if let Some(mut transport) = self.transport.take() {
            timeout(self.options.timeout, transport.shutdown()).await??;
            self.transcript.info("Connection closed with remote host.");
        }
        Ok(())
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.options.timeout
    }

    const fn hello_stage(&self) -> Stage {
        if self.options.starttls && !self.session.is_tls() {
            Stage::FirstHello
        } else {
            Stage::Hello
        }
    }

    fn ready(&self) -> Result<()> {
        if self.in_data {
            return Err(Error::InvalidState("data phase was not closed".into()));
        }
        if self.transport.is_none() {
            return Err(Error::Closed);
        }
        if self.stopped {
            return Err(Error::InvalidState("session stopped at a checkpoint".into()));
        }
        Ok(())
    }

    fn transport_mut(&mut self) -> Result<&mut Transport<S>> {
        self.transport.as_mut().ok_or(Error::Closed)
    }

    pub(super) const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// EHLO with a single HELO fallback. The checkpoint is left to the
    /// caller so that a refused QUIT is never taken for a refused EHLO.
    async fn greet(&mut self, stage: Stage) -> Result<Flow<()>> {
        if !self.options.send_helo {
            match self.ehlo(stage).await {
                Ok(flow) => return Ok(flow),
                Err(err) => tracing::debug!(error = %err, "EHLO failed, trying HELO"),
            }
        }
        self.helo(stage).await
    }

    async fn ehlo(&mut self, stage: Stage) -> Result<Flow<()>> {
        let command = Command::Ehlo {
            hostname: self.options.helo.clone(),
        };
        let result = self.exchange(250, stage, &command).await;
        if result.is_err() {
            self.session.replace_extensions(Extensions::none());
        }
        let reply = proceed!(result?);
        self.session.replace_extensions(Extensions::from_ehlo(&reply));
        Ok(Flow::Continue(()))
    }

    async fn helo(&mut self, stage: Stage) -> Result<Flow<()>> {
        self.session.replace_extensions(Extensions::none());
        let command = Command::Helo {
            hostname: self.options.helo.clone(),
        };
        Ok(self.exchange(250, stage, &command).await?.map(|_| ()))
    }

    /// One full checkpointed round trip.
    async fn command(&mut self, expect: u16, stage: Stage, command: &Command) -> Result<Flow<Reply>> {
        let reply = proceed!(self.exchange(expect, stage, command).await?);
        proceed!(self.checkpoint(stage).await?);
        Ok(Flow::Continue(reply))
    }

    /// Writes `command` and reads its reply, dropping in between if the
    /// policy drops after sending at `stage`.
    async fn exchange(&mut self, expect: u16, stage: Stage, command: &Command) -> Result<Flow<Reply>> {
        let deadline = self.deadline();
        let transport = self.transport_mut()?;
        let ticket = timeout_at(deadline, transport.send(command)).await??;

        if self.options.policy.drops_after_send(stage) {
            self.stopped = true;
            self.drop_connection().await?;
            return Ok(Flow::Terminated(Termination::new(
                stage,
                Checkpoint::DropAfterSend,
            )));
        }

        let transport = self.transport_mut()?;
        let reply = timeout_at(deadline, transport.read_reply(ticket, expect)).await??;
        Ok(Flow::Continue(reply))
    }

    /// Applies the after-reply part of the policy for `stage`.
    async fn checkpoint(&mut self, stage: Stage) -> Result<Flow<()>> {
        let Some(checkpoint) = self.options.policy.after_reply(stage) else {
            return Ok(Flow::Continue(()));
        };
        tracing::debug!(%stage, checkpoint = checkpoint.as_str(), "checkpoint reached");
        self.stopped = true;

        match checkpoint {
            Checkpoint::QuitAfter => {
                let deadline = self.deadline();
                let transport = self.transport_mut()?;
                let ticket = timeout_at(deadline, transport.send(&Command::Quit)).await??;
                timeout_at(deadline, transport.read_reply(ticket, 221)).await??;
                self.close().await?;
            }
            Checkpoint::DropAfter | Checkpoint::DropAfterSend => self.drop_connection().await?,
        }
        Ok(Flow::Terminated(Termination::new(stage, checkpoint)))
    }

    async fn drop_connection(&mut self) -> Result<()> {
        self.transcript.info("Dropping connection");
        self.in_data = false;
        if let Some(mut transport) = self.transport.take() {
            timeout(self.options.timeout, transport.shutdown()).await??;
        }
        Ok(())
    }

    pub(super) async fn write_body(&mut self, bytes: &[u8]) -> Result<()> {
        let deadline = self.deadline();
        let transport = self.transport_mut()?;
        timeout_at(deadline, transport.write_raw(bytes)).await?
    }

    /// Ends the data phase: writes `tail` (the end-of-data marker) and reads
    /// the verdict, checkpointed at [`Stage::Dot`].
    pub(super) async fn end_data(&mut self, tail: &[u8]) -> Result<Flow<Reply>> {
        self.in_data = false;
        let deadline = self.deadline();
        let transport = self.transport_mut()?;
        transport.transcript().sent(".");
        timeout_at(deadline, transport.write_raw(tail)).await??;
        let ticket = transport.unsolicited();

        if self.options.policy.drops_after_send(Stage::Dot) {
            self.stopped = true;
            self.drop_connection().await?;
            return Ok(Flow::Terminated(Termination::new(
                Stage::Dot,
                Checkpoint::DropAfterSend,
            )));
        }

        let transport = self.transport_mut()?;
        let reply = timeout_at(deadline, transport.read_reply(ticket, 250)).await??;
        proceed!(self.checkpoint(Stage::Dot).await?);
        Ok(Flow::Continue(reply))
    }
}

impl<S> std::fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("remote_host", &self.remote_host)
            .field("open", &self.transport.is_some())
            .field("session", &self.session)
            .field("in_data", &self.in_data)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}
