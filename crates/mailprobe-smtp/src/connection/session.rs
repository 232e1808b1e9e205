//! Per-connection state and settings.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{DEFAULT_TIMEOUT, TlsOptions};
use crate::error::Result;
use crate::stage::Policy;
use crate::types::{Address, Extensions};

/// Settings fixed for the lifetime of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Identity sent with EHLO/HELO.
    pub helo: String,
    /// Skip EHLO and greet with HELO.
    pub send_helo: bool,
    /// STARTTLS will be issued after the first hello.
    pub starttls: bool,
    /// SIZE to declare on MAIL FROM, if the server advertises SIZE.
    pub size: Option<u64>,
    /// Request SMTPUTF8 on MAIL FROM.
    pub smtputf8: bool,
    /// Where to interrupt the session.
    pub policy: Policy,
    /// Bound on each round trip.
    pub timeout: Duration,
    /// STARTTLS settings.
    pub tls: TlsOptions,
}

impl SessionOptions {
    /// Options with the given hello identity and everything else default.
    #[must_use]
    pub fn new(helo: impl Into<String>) -> Self {
        Self {
            helo: helo.into(),
            send_helo: false,
            starttls: false,
            size: None,
            smtputf8: false,
            policy: Policy::default(),
            timeout: DEFAULT_TIMEOUT,
            tls: TlsOptions::default(),
        }
    }
}

/// Mutable state of one connection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    hello: Option<Result<()>>,
    extensions: Arc<Extensions>,
    recipients: Vec<Address>,
    tls: bool,
}

impl Session {
    /// Returns true once a hello exchange has been attempted.
    #[must_use]
    pub const fn hello_attempted(&self) -> bool {
        self.hello.is_some()
    }

    /// The recorded outcome of the hello exchange, if attempted.
    #[must_use]
    pub const fn hello_outcome(&self) -> Option<&Result<()>> {
        self.hello.as_ref()
    }

    /// Extensions from the latest successful EHLO; empty after HELO or a
    /// failed EHLO.
    #[must_use]
    pub const fn extensions(&self) -> &Arc<Extensions> {
        &self.extensions
    }

    /// Recipients accepted since the last RSET.
    #[must_use]
    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    /// Returns true once STARTTLS has succeeded.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }

    pub(crate) fn record_hello(&mut self, outcome: Result<()>) {
        self.hello = Some(outcome);
    }

    pub(crate) fn replace_extensions(&mut self, extensions: Extensions) {
        self.extensions = Arc::new(extensions);
    }

    pub(crate) fn accept_recipient(&mut self, to: Address) {
        self.recipients.push(to);
    }

    pub(crate) fn clear_recipients(&mut self) {
        self.recipients.clear();
    }

    pub(crate) const fn mark_tls(&mut self) {
        self.tls = true;
    }
}
