//! Run configuration.
//!
//! A [`Config`] is the validated intent of one run: where to connect, who
//! the envelope names, which extensions to request, and where to stop.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::connection::SessionOptions;
use crate::error::{Error, Result};
use crate::stage::Policy;
use crate::types::Address;

/// Default SMTP port.
pub const DEFAULT_PORT: u16 = 25;

/// Default round-trip timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An explicit destination, `host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Server {
    /// Host name or IP literal, without brackets.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Server {
    /// Creates a server address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port`, a bare IPv6 literal or `[v6]:port`.
    ///
    /// A missing port defaults to [`DEFAULT_PORT`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty host or an invalid port.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || Error::Config(format!("invalid server '{input}'"));

        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail {
                "" => None,
                _ => Some(tail.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host, port)
        } else if input.matches(':').count() > 1 {
            // Unbracketed IPv6 literal.
            (input, None)
        } else {
            match input.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (input, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            None => DEFAULT_PORT,
            Some(port) => match port.parse::<u16>() {
                Ok(0) | Err(_) => return Err(invalid()),
                Ok(port) => port,
            },
        };
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Which address family to dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    /// Either family, in resolver order.
    #[default]
    Any,
    /// IPv4 only.
    V4,
    /// IPv6 only.
    V6,
}

impl IpFamily {
    /// Returns true if `addr` belongs to this family.
    #[must_use]
    pub const fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
        }
    }
}

/// SIZE parameter to request on MAIL FROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSize {
    /// Do not send SIZE.
    #[default]
    Omit,
    /// Send this value.
    Bytes(u64),
    /// Send the length of the payload.
    Payload,
}

impl MessageSize {
    /// Resolves the value to declare for a payload of `payload_len` bytes.
    ///
    /// Zero means no declaration.
    #[must_use]
    pub const fn resolve(self, payload_len: usize) -> Option<u64> {
        let size = match self {
            Self::Omit => 0,
            Self::Bytes(n) => n,
            Self::Payload => payload_len as u64,
        };
        if size == 0 { None } else { Some(size) }
    }
}

/// TLS settings for STARTTLS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TlsOptions {
    /// Name to verify the certificate against; defaults to the dialled host.
    pub server_name: Option<String>,
    /// Accept any certificate.
    pub accept_invalid_certs: bool,
}

/// Validated configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Explicit destination; `None` routes by recipient domain.
    pub server: Option<Server>,
    /// Route as though every recipient were in this domain.
    pub routing_domain: Option<String>,
    /// Address family to dial.
    pub family: IpFamily,
    /// Envelope recipients; never empty.
    pub recipients: Vec<Address>,
    /// Envelope sender; may be the null sender.
    pub from: Address,
    /// Identity sent with EHLO/HELO.
    pub helo: String,
    /// Bound on each round trip and each dial attempt.
    #[serde(serialize_with = "serialize_secs")]
    pub timeout: Duration,
    /// Upgrade with STARTTLS after the first hello.
    pub starttls: bool,
    /// Skip EHLO and greet with HELO.
    pub send_helo: bool,
    /// SIZE parameter to declare.
    pub size: MessageSize,
    /// Request SMTPUTF8.
    pub smtputf8: bool,
    /// Write the payload verbatim without echoing it.
    pub suppress_data: bool,
    /// STARTTLS settings.
    pub tls: TlsOptions,
    /// Where to interrupt the session.
    pub policy: Policy,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // signature fixed by serde
fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

impl Config {
    /// Starts building a configuration.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Per-connection engine settings for a payload of `payload_len` bytes.
    #[must_use]
    pub fn session_options(&self, payload_len: usize) -> SessionOptions {
        SessionOptions {
            helo: self.helo.clone(),
            send_helo: self.send_helo,
            starttls: self.starttls,
            size: self.size.resolve(payload_len),
            smtputf8: self.smtputf8,
            policy: self.policy,
            timeout: self.timeout,
            tls: self.tls.clone(),
        }
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct ConfigBuilder {
    server: Option<Server>,
    routing_domain: Option<String>,
    family: IpFamily,
    recipients: Vec<Address>,
    from: Option<Address>,
    helo: Option<String>,
    timeout: Option<Duration>,
    starttls: bool,
    send_helo: bool,
    size: MessageSize,
    smtputf8: bool,
    suppress_data: bool,
    tls: TlsOptions,
    policy: Policy,
}

impl ConfigBuilder {
    /// Sends every recipient to this server.
    pub fn server(mut self, server: Server) -> Self {
        self.server = Some(server);
        self
    }

    /// Routes as though mail were addressed to `domain`.
    pub fn routing_domain(mut self, domain: impl Into<String>) -> Self {
        self.routing_domain = Some(domain.into());
        self
    }

    /// Restricts dialling to one address family.
    pub const fn family(mut self, family: IpFamily) -> Self {
        self.family = family;
        self
    }

    /// Adds a recipient.
    pub fn recipient(mut self, to: impl Into<Address>) -> Self {
        self.recipients.push(to.into());
        self
    }

    /// Adds several recipients.
    pub fn recipients<I, A>(mut self, to: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        self.recipients.extend(to.into_iter().map(Into::into));
        self
    }

    /// Sets the envelope sender.
    pub fn from(mut self, from: impl Into<Address>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Sets the hello identity.
    pub fn helo(mut self, helo: impl Into<String>) -> Self {
        self.helo = Some(helo.into());
        self
    }

    /// Sets the round-trip timeout.
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enables STARTTLS.
    pub const fn starttls(mut self, enabled: bool) -> Self {
        self.starttls = enabled;
        self
    }

    /// Forces the legacy HELO greeting.
    pub const fn send_helo(mut self, enabled: bool) -> Self {
        self.send_helo = enabled;
        self
    }

    /// Sets the SIZE declaration.
    pub const fn size(mut self, size: MessageSize) -> Self {
        self.size = size;
        self
    }

    /// Requests SMTPUTF8.
    pub const fn smtputf8(mut self, enabled: bool) -> Self {
        self.smtputf8 = enabled;
        self
    }

    /// Writes the payload verbatim without echoing it.
    pub const fn suppress_data(mut self, enabled: bool) -> Self {
        self.suppress_data = enabled;
        self
    }

    /// Sets the STARTTLS options.
    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Sets the interruption policy.
    pub const fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no recipient, sender or hello identity
    /// was given, or the timeout is zero.
    pub fn build(self) -> Result<Config> {
        if self.recipients.is_empty() {
            return Err(Error::Config("at least one recipient must be given".into()));
        }
        let from = self
            .from
            .ok_or_else(|| Error::Config("an envelope sender must be given".into()))?;
        let helo = self
            .helo
            .filter(|helo| !helo.trim().is_empty())
            .ok_or_else(|| Error::Config("a hello identity must be given".into()))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".into()));
        }
        let routing_domain = self
            .routing_domain
            .map(|d| d.trim().trim_end_matches('.').to_string())
            .filter(|d| !d.is_empty());

        Ok(Config {
            server: self.server,
            routing_domain,
            family: self.family,
            recipients: self.recipients,
            from,
            helo,
            timeout,
            starttls: self.starttls,
            send_helo: self.send_helo,
            size: self.size,
            smtputf8: self.smtputf8,
            suppress_data: self.suppress_data,
            tls: self.tls,
            policy: self.policy,
        })
    }
}
