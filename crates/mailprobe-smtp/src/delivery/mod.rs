//! Delivery driver: picks destinations and runs one transaction on each.
//!
//! With an explicit server every recipient goes there in one session.
//! Otherwise recipients are grouped by domain, each domain's exchangers are
//! tried in preference order, and a domain without exchangers is tried
//! directly on port 25. Destinations are handled one after another; a
//! failure on one never stops the next.

mod resolver;

pub use resolver::{HickoryResolver, MxRecord, MxResolver, order_candidates};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::warn;

use crate::config::{Config, DEFAULT_PORT, IpFamily, Server};
use crate::connection::{Client, dial};
use crate::error::{Error, ErrorKind, Result};
use crate::flow::{Flow, Termination};
use crate::proceed;
use crate::transcript::{Observer, Transcript};
use crate::types::{Address, Reply};

/// Opens connections to destinations.
pub trait Connector {
    /// Stream type produced.
    type Stream: AsyncRead + AsyncWrite + Unpin;

    /// Connects to `host:port`.
    fn connect(&self, host: &str, port: u16) -> impl Future<Output = Result<Self::Stream>>;
}

/// [`Connector`] over TCP.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    family: IpFamily,
    timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector dialling `family` with a per-attempt `timeout`.
    #[must_use]
    pub const fn new(family: IpFamily, timeout: Duration) -> Self {
        Self { family, timeout }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        let (stream, addr) = dial(host, port, self.family, self.timeout).await?;
        tracing::debug!(host, %addr, "connected");
        Ok(stream)
    }
}

/// How the payload is written in the data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Copy the bytes as they are, without echoing them.
    Verbatim,
    /// Write line by line with CRLF endings, echoing each line.
    Lines,
}

/// Runs DATA, writes `payload` and closes the data phase.
///
/// The end-of-data exchange is attempted even if a write fails; the write
/// error is then the one returned.
///
/// # Errors
///
/// Returns an error if DATA is refused, a write fails, or the final reply is
/// not 250.
pub async fn transfer<S>(client: &mut Client<S>, payload: &[u8], mode: TransferMode) -> Result<Flow<Reply>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut writer = proceed!(client.data().await?);

    let written = match mode {
        TransferMode::Verbatim => writer.write(payload).await,
        TransferMode::Lines => {
            let mut result = Ok(());
            for line in payload_lines(payload) {
                result = writer.write_line(line).await;
                if result.is_err() {
                    break;
                }
            }
            result
        }
    };

    let closed = writer.close().await;
    written?;
    closed
}

/// Splits on `\n`, dropping a `\r` before it and the empty piece after a
/// final newline.
fn payload_lines(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = payload.strip_suffix(b"\n").unwrap_or(payload);
    let pieces = if payload.is_empty() { None } else { Some(body.split(|b| *b == b'\n')) };
    pieces
        .into_iter()
        .flatten()
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

/// A recipient the server refused.
#[derive(Debug, Clone)]
pub struct Rejection {
    /// The recipient.
    pub recipient: Address,
    /// The server's answer.
    pub error: Error,
}

/// How one destination ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The message was accepted and QUIT answered.
    Delivered,
    /// A checkpoint ended the session as configured.
    Terminated(Termination),
    /// The transaction failed.
    Failed(Error),
}

/// Result for one destination.
#[derive(Debug, Clone)]
pub struct DestinationReport {
    /// Domain or server the recipients were routed to.
    pub destination: String,
    /// Recipients routed there.
    pub recipients: Vec<Address>,
    /// Recipients refused at RCPT.
    pub rejected: Vec<Rejection>,
    /// How the session ended.
    pub outcome: Outcome,
}

/// Result of a whole run.
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// One entry per destination, in the order they were tried.
    pub destinations: Vec<DestinationReport>,
    /// Recipients that could not be routed.
    pub skipped: Vec<Address>,
}

impl Report {
    /// Returns true if no destination failed and no recipient was refused.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// The first failure or refusal, in destination order.
    #[must_use]
    pub fn failure(&self) -> Option<&Error> {
        self.destinations.iter().find_map(|dest| match &dest.outcome {
            Outcome::Failed(err) => Some(err),
            _ => dest.rejected.first().map(|r| &r.error),
        })
    }

    /// Returns the error kind that should decide the exit status.
    #[must_use]
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.failure().map(Error::kind)
    }
}

/// Where a group of recipients is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Server(Server),
    Domain(String),
}

impl Route {
    fn label(&self) -> String {
        match self {
            Self::Server(server) => server.to_string(),
            Self::Domain(domain) => domain.clone(),
        }
    }
}

/// Delivers one payload according to a [`Config`].
pub struct Delivery<R, C> {
    config: Config,
    resolver: R,
    connector: C,
    observer: Arc<dyn Observer>,
    transcript: Transcript,
}

impl<R, C> Delivery<R, C>
where
    R: MxResolver,
    C: Connector,
{
    /// Creates a driver.
    pub fn new(config: Config, resolver: R, connector: C, observer: Arc<dyn Observer>) -> Self {
        let transcript = Transcript::new(Arc::clone(&observer));
        Self {
            config,
            resolver,
            connector,
            observer,
            transcript,
        }
    }

    /// Delivers `payload` to every destination in turn.
    pub async fn run(&self, payload: &[u8]) -> Report {
        let (routes, skipped) = self.plan();
        let announce = routes.len() > 1;

        let mut report = Report {
            destinations: Vec::with_capacity(routes.len()),
            skipped,
        };
        for (route, recipients) in routes {
            let label = route.label();
            if announce {
                self.transcript.info(&format!("Delivering to {label}..."));
            }
            let (outcome, rejected) = self.deliver_route(&route, &recipients, payload).await;
            report.destinations.push(DestinationReport {
                destination: label,
                recipients,
                rejected,
                outcome,
            });
        }
        report
    }

    /// Groups recipients by destination, keeping first-seen order.
    fn plan(&self) -> (Vec<(Route, Vec<Address>)>, Vec<Address>) {
        if let Some(server) = &self.config.server {
            return (
                vec![(Route::Server(server.clone()), self.config.recipients.clone())],
                Vec::new(),
            );
        }

        let mut routes: Vec<(Route, Vec<Address>)> = Vec::new();
        let mut skipped = Vec::new();
        for recipient in &self.config.recipients {
            let domain = self
                .config
                .routing_domain
                .as_deref()
                .or_else(|| recipient.domain());
            let Some(domain) = domain else {
                self.transcript
                    .error(&format!("Recipient '{recipient}' has no hostname"));
                skipped.push(recipient.clone());
                continue;
            };
            let route = Route::Domain(domain.to_ascii_lowercase());
            match routes.iter_mut().find(|(r, _)| *r == route) {
                Some((_, group)) => group.push(recipient.clone()),
                None => routes.push((route, vec![recipient.clone()])),
            }
        }
        (routes, skipped)
    }

    /// Hosts to try for a route, most preferred first.
    async fn candidates(&self, route: &Route) -> Vec<Server> {
        let domain = match route {
            Route::Server(server) => return vec![server.clone()],
            Route::Domain(domain) => domain,
        };

        let records = match self.resolver.lookup_mx(domain).await {
            Ok(records) => records,
            Err(err) => {
                warn!(domain, error = %err, "MX lookup failed");
                self.transcript
                    .warn(&format!("While resolving MX for {domain}: {err}"));
                Vec::new()
            }
        };

        let ordered = order_candidates(records);
        if ordered.is_empty() {
            return vec![Server::new(domain.clone(), DEFAULT_PORT)];
        }
        ordered
            .into_iter()
            .map(|mx| Server::new(mx.exchange, DEFAULT_PORT))
            .collect()
    }

    /// Tries candidates in order until one accepts a connection, then runs
    /// the transaction there.
    async fn deliver_route(
        &self,
        route: &Route,
        recipients: &[Address],
        payload: &[u8],
    ) -> (Outcome, Vec<Rejection>) {
        let mut last = Error::Dns(format!("no destination for {}", route.label()));
        for server in self.candidates(route).await {
            self.transcript.info(&format!("Trying {server}..."));
            match self.connector.connect(&server.host, server.port).await {
                Ok(stream) => return self.transact(stream, &server, recipients, payload).await,
                Err(err) => {
                    warn!(%server, error = %err, "connect failed");
                    self.transcript
                        .warn(&format!("Failed to connect to {server}: {err}"));
                    last = err;
                }
            }
        }
        (Outcome::Failed(last), Vec::new())
    }

    /// Runs one full transaction on a connected stream and always closes
    /// it afterwards.
    async fn transact(
        &self,
        stream: C::Stream,
        server: &Server,
        recipients: &[Address],
        payload: &[u8],
    ) -> (Outcome, Vec<Rejection>) {
        let options = self.config.session_options(payload.len());
        let mut client =
            match Client::connect(stream, server.host.clone(), options, Arc::clone(&self.observer)).await {
                Ok(Flow::Continue(client)) => client,
                Ok(Flow::Terminated(t)) => return (Outcome::Terminated(t), Vec::new()),
                Err(err) => return (Outcome::Failed(err), Vec::new()),
            };

        let mut rejected = Vec::new();
        let result = self
            .sequence(&mut client, recipients, payload, &mut rejected)
            .await;
        if let Err(err) = client.close().await {
            tracing::debug!(error = %err, "close failed");
        }

        let outcome = match result {
            Ok(Flow::Continue(())) => Outcome::Delivered,
            Ok(Flow::Terminated(t)) => Outcome::Terminated(t),
            Err(err) => Outcome::Failed(err),
        };
        (outcome, rejected)
    }

    async fn sequence<S>(
        &self,
        client: &mut Client<S>,
        recipients: &[Address],
        payload: &[u8],
        rejected: &mut Vec<Rejection>,
    ) -> Result<Flow<()>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        proceed!(client.hello().await?);
        if self.config.starttls {
            proceed!(client.start_tls().await?);
        }
        proceed!(client.mail(&self.config.from).await?);

        for to in recipients {
            match client.rcpt(to).await {
                Ok(flow) => {
                    proceed!(flow);
                }
                // A refused quit-after QUIT is not a refused recipient.
                Err(err) if err.kind() == ErrorKind::Protocol && !client.is_stopped() => {
                    self.transcript
                        .error(&format!("Recipient {to} rejected: {err}"));
                    rejected.push(Rejection {
                        recipient: to.clone(),
                        error: err,
                    });
                }
                Err(err) => return Err(err),
            }
        }
        if client.session().recipients().is_empty() {
            return Err(rejected
                .last()
                .map_or_else(|| Error::InvalidState("no recipients".into()), |r| r.error.clone()));
        }

        let mode = if self.config.suppress_data {
            TransferMode::Verbatim
        } else {
            TransferMode::Lines
        };
        proceed!(transfer(client, payload, mode).await?);

        proceed!(client.quit().await?);
        Ok(Flow::Continue(()))
    }
}

impl<R, C> std::fmt::Debug for Delivery<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn lines(payload: &[u8]) -> Vec<&[u8]> {
        payload_lines(payload).collect()
    }

    #[test]
    fn payload_lines_strip_endings() {
        assert_eq!(lines(b"a\r\nb\r\n"), vec![&b"a"[..], b"b"]);
        assert_eq!(lines(b"a\nb"), vec![&b"a"[..], b"b"]);
        assert_eq!(lines(b"a\r\n\r\nb\r\n"), vec![&b"a"[..], b"", b"b"]);
    }

    #[test]
    fn empty_payload_has_no_lines() {
        assert!(lines(b"").is_empty());
        assert_eq!(lines(b"\n"), vec![&b""[..]]);
    }

    #[test]
    fn report_success() {
        let report = Report {
            destinations: vec![DestinationReport {
                destination: "example.com".into(),
                recipients: vec!["a@example.com".into()],
                rejected: Vec::new(),
                outcome: Outcome::Delivered,
            }],
            skipped: vec!["nobody".into()],
        };
        assert!(report.is_success());
        assert_eq!(report.failure_kind(), None);
    }

    #[test]
    fn rejection_fails_report() {
        let report = Report {
            destinations: vec![DestinationReport {
                destination: "example.com".into(),
                recipients: vec!["a@example.com".into(), "b@example.com".into()],
                rejected: vec![Rejection {
                    recipient: "b@example.com".into(),
                    error: Error::protocol(550, "no"),
                }],
                outcome: Outcome::Delivered,
            }],
            skipped: Vec::new(),
        };
        assert!(!report.is_success());
        assert_eq!(report.failure_kind(), Some(ErrorKind::Protocol));
    }

    #[test]
    fn failure_kind_follows_first_failure() {
        let report = Report {
            destinations: vec![
                DestinationReport {
                    destination: "a.example".into(),
                    recipients: Vec::new(),
                    rejected: Vec::new(),
                    outcome: Outcome::Terminated(Termination::new(
                        crate::Stage::Mail,
                        crate::Checkpoint::DropAfter,
                    )),
                },
                DestinationReport {
                    destination: "b.example".into(),
                    recipients: Vec::new(),
                    rejected: Vec::new(),
                    outcome: Outcome::Failed(Error::Timeout),
                },
            ],
            skipped: Vec::new(),
        };
        assert_eq!(report.failure_kind(), Some(ErrorKind::Network));
    }
}
