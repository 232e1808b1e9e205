//! Message payload: the DATA template and its expansion.

use chrono::{DateTime, FixedOffset, Local};
use rand::Rng;

use mailprobe_smtp::Address;

/// Default DATA template.
pub const DEFAULT_DATA: &str = "Date: %DATE%\n\
To: %TO_ADDRESS%\n\
From: %FROM_ADDRESS%\n\
Subject: test %DATE%\n\
Message-Id: <%MESSAGEID%>\n\
X-Mailer: mailprobe v%VERSION%\n\
%NEW_HEADERS%\n\
%BODY%\n";

/// Default message body.
pub const DEFAULT_BODY: &str = "This is a test mailing.";

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Values that vary from run to run.
#[derive(Debug, Clone)]
pub struct PayloadContext {
    /// Date stamped into the message.
    pub date: DateTime<FixedOffset>,
    /// Random token used in the Message-Id.
    pub cookie: String,
    /// Host name used in the Message-Id.
    pub hostname: String,
}

impl PayloadContext {
    /// Context for the current time with a fresh random cookie.
    pub fn now(hostname: impl Into<String>) -> Self {
        Self {
            date: Local::now().fixed_offset(),
            cookie: cookie(&mut rand::rng()),
            hostname: hostname.into(),
        }
    }
}

/// Eight random lowercase letters.
fn cookie(rng: &mut impl Rng) -> String {
    (0..8)
        .map(|_| char::from(rng.random_range(b'a'..=b'z')))
        .collect()
}

/// What goes into the payload.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    /// DATA template.
    pub data: &'a str,
    /// Text substituted for `%BODY%`.
    pub body: &'a str,
    /// Extra header lines substituted for `%NEW_HEADERS%`.
    pub headers: &'a [String],
    /// Envelope sender.
    pub from: &'a Address,
    /// Envelope recipients.
    pub to: &'a [Address],
    /// Expand the template and canonicalise line endings. When false the
    /// template is sent exactly as given.
    pub fixup: bool,
}

/// Renders the payload bytes.
///
/// Placeholders are expanded in one pass, so text substituted for one
/// placeholder is never expanded again. `%NEW_HEADERS%` expands to each
/// added header followed by a newline, or to nothing.
#[must_use]
pub fn render(message: &Message<'_>, context: &PayloadContext) -> Vec<u8> {
    if !message.fixup {
        return message.data.as_bytes().to_vec();
    }

    let to = message
        .to
        .iter()
        .map(Address::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let date = context.date.to_rfc2822();
    let message_id = format!("{}@{}", context.cookie, context.hostname);
    let headers: String = message.headers.iter().map(|h| format!("{h}\n")).collect();

    let expanded = expand(
        message.data,
        &[
            ("%FROM_ADDRESS%", message.from.as_str()),
            ("%TO_ADDRESS%", &to),
            ("%DATE%", &date),
            ("%MESSAGEID%", &message_id),
            ("%VERSION%", VERSION),
            // Spellings used by templates written for swaks and mailspanner.
            ("%SWAKS_VERSION%", VERSION),
            ("%MAILSPANNER_VERSION%", VERSION),
            ("%NEW_HEADERS%", &headers),
            ("%BODY%", message.body),
            ("%NEWLINE%", "\r\n"),
        ],
    );
    crlf(&expanded)
}

fn expand(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(at) = rest.find('%') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        match vars.iter().find(|(name, _)| rest.starts_with(name)) {
            Some((name, value)) => {
                out.push_str(value);
                rest = &rest[name.len()..];
            }
            None => {
                out.push('%');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Turns every `\n` not already preceded by `\r` into `\r\n`.
fn crlf(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + text.len() / 16);
    let mut prev = 0u8;
    for &byte in text.as_bytes() {
        if byte == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        prev = byte;
    }
    out
}
