//! Transaction checkpoints and the interruption policy built from them.
//!
//! A [`Stage`] names a point in the SMTP exchange. Operators refer to stages
//! by name, several of which are aliases (`banner` is `connect`, `to` is
//! `rcpt`, ...). [`Stage::normalize`] collapses every spelling onto one
//! canonical member so that comparisons are exact.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};

/// A checkpoint in the SMTP transaction.
///
/// The declaration order is the transaction order, so `Ord` can be used to
/// ask whether one checkpoint comes before another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// No checkpoint configured.
    #[default]
    None,
    /// Server banner received.
    Connect,
    /// First EHLO of a connection that will upgrade with STARTTLS.
    FirstHello,
    /// STARTTLS accepted.
    Starttls,
    /// EHLO/HELO accepted.
    Hello,
    /// Authentication (reserved; no verb issues it).
    Auth,
    /// MAIL FROM accepted.
    Mail,
    /// RCPT TO accepted.
    Rcpt,
    /// DATA accepted; body transfer is about to start.
    Data,
    /// End-of-data marker accepted.
    Dot,
}

impl Stage {
    /// All checkpoints in transaction order.
    pub const ALL: [Self; 10] = [
        Self::None,
        Self::Connect,
        Self::FirstHello,
        Self::Starttls,
        Self::Hello,
        Self::Auth,
        Self::Mail,
        Self::Rcpt,
        Self::Data,
        Self::Dot,
    ];

    /// Maps a stage name, or one of its aliases, to its canonical stage.
    ///
    /// Matching ignores ASCII case and `-`/`_` separators, so `first-ehlo`,
    /// `FirstEhlo` and `first_helo` are the same name. An empty name means
    /// no checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown name.
    pub fn normalize(name: &str) -> Result<Self> {
        let key: String = name
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        let stage = match key.as_str() {
            "" | "none" => Self::None,
            "connect" | "banner" => Self::Connect,
            "firsthello" | "firsthelo" | "firstehlo" => Self::FirstHello,
            "starttls" | "tls" => Self::Starttls,
            "hello" | "helo" | "ehlo" => Self::Hello,
            "auth" => Self::Auth,
            "mail" | "from" => Self::Mail,
            "rcpt" | "to" => Self::Rcpt,
            "data" => Self::Data,
            "dot" => Self::Dot,
            _ => return Err(Error::Config(format!("unknown stage name '{name}'"))),
        };
        Ok(stage)
    }

    /// Returns the canonical name of this stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Connect => "connect",
            Self::FirstHello => "first-hello",
            Self::Starttls => "starttls",
            Self::Hello => "hello",
            Self::Auth => "auth",
            Self::Mail => "mail",
            Self::Rcpt => "rcpt",
            Self::Data => "data",
            Self::Dot => "dot",
        }
    }

    /// Returns true if this is the "no checkpoint" member.
    #[must_use]
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::normalize(s)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three ways a session can be cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Checkpoint {
    /// Send QUIT after the stage's reply.
    QuitAfter,
    /// Close the connection after the stage's reply.
    DropAfter,
    /// Close the connection right after sending the stage's command.
    DropAfterSend,
}

impl Checkpoint {
    /// Returns the option name used for this checkpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QuitAfter => "quit-after",
            Self::DropAfter => "drop-after",
            Self::DropAfterSend => "drop-after-send",
        }
    }

    /// Normalizes a stage name for this checkpoint.
    ///
    /// QUIT cannot be issued once DATA has been accepted: the server would
    /// read it as message content. `data` and `dot` are therefore rejected
    /// for [`Checkpoint::QuitAfter`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown or disallowed stage.
    pub fn parse(self, name: &str) -> Result<Stage> {
        let stage = Stage::normalize(name)
            .map_err(|_| Error::Config(format!("invalid value for {self}: '{name}'")))?;
        if self == Self::QuitAfter && matches!(stage, Stage::Data | Stage::Dot) {
            return Err(Error::Config(format!("invalid value for {self}: '{name}'")));
        }
        Ok(stage)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--{}", self.as_str())
    }
}

/// Where, if anywhere, a session should be interrupted.
///
/// Fixed for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Policy {
    /// Send QUIT after this stage's reply.
    pub quit_after: Stage,
    /// Close the connection after this stage's reply.
    pub drop_after: Stage,
    /// Close the connection as soon as this stage's command is sent.
    pub drop_after_send: Stage,
}

impl Policy {
    /// Builds a policy from operator-supplied stage names.
    ///
    /// Empty names leave the corresponding checkpoint unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any name is unknown or disallowed.
    pub fn parse(quit_after: &str, drop_after: &str, drop_after_send: &str) -> Result<Self> {
        Ok(Self {
            quit_after: Checkpoint::QuitAfter.parse(quit_after)?,
            drop_after: Checkpoint::DropAfter.parse(drop_after)?,
            drop_after_send: Checkpoint::DropAfterSend.parse(drop_after_send)?,
        })
    }

    /// Returns true if the connection should be dropped once `stage`'s
    /// command has been written.
    #[must_use]
    pub fn drops_after_send(&self, stage: Stage) -> bool {
        !stage.is_none() && self.drop_after_send == stage
    }

    /// Returns the interruption, if any, that applies once `stage`'s reply
    /// has been accepted. QUIT takes precedence over a plain drop.
    #[must_use]
    pub fn after_reply(&self, stage: Stage) -> Option<Checkpoint> {
        if stage.is_none() {
            None
        } else if self.quit_after == stage {
            Some(Checkpoint::QuitAfter)
        } else if self.drop_after == stage {
            Some(Checkpoint::DropAfter)
        } else {
            None
        }
    }
}
