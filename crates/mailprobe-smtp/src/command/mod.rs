//! SMTP command builder.

use std::fmt;

use crate::types::Address;

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Legacy greeting
    Helo {
        /// Client identity
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client identity
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address; empty for the null reverse-path
        from: Address,
        /// Append `BODY=8BITMIME`
        eight_bit_mime: bool,
        /// SIZE parameter
        size: Option<u64>,
        /// Append `SMTPUTF8`
        smtputf8: bool,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Serializes the command to bytes, CRLF included.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.to_string().into_bytes();
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns the command verb.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::MailFrom { .. } => "MAIL",
            Self::RcptTo { .. } => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
        }
    }
}

/// The command line as sent, without the line ending.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo { hostname } => write!(f, "HELO {hostname}"),
            Self::Ehlo { hostname } => write!(f, "EHLO {hostname}"),
            Self::MailFrom {
                from,
                eight_bit_mime,
                size,
                smtputf8,
            } => {
                write!(f, "MAIL FROM:<{from}>")?;
                if *eight_bit_mime {
                    f.write_str(" BODY=8BITMIME")?;
                }
                if let Some(size) = size {
                    write!(f, " SIZE={size}")?;
                }
                if *smtputf8 {
                    f.write_str(" SMTPUTF8")?;
                }
                Ok(())
            }
            Self::RcptTo { to } => write!(f, "RCPT TO:<{to}>"),
            Self::StartTls | Self::Data | Self::Rset | Self::Noop | Self::Quit => {
                f.write_str(self.verb())
            }
        }
    }
}
