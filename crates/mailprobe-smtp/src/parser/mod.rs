//! SMTP reply parser.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses an SMTP reply from its lines, line endings already stripped.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK`
/// - Multi: `250-First line`, `250-Second line`, `250 Last line`
///
/// Every line must carry the same code.
///
/// # Errors
///
/// Returns [`Error::Malformed`] for an empty reply, a line without a
/// three-digit code, a bad separator, or a code that changes mid-reply.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Malformed("empty reply".into()));
    };
    let code = parse_code(first)?;

    let mut message = Vec::with_capacity(lines.len());
    for line in lines {
        if parse_code(line)? != code {
            return Err(Error::Malformed(format!(
                "reply code changed from {code} mid-reply: {line}"
            )));
        }
        match line.as_bytes().get(3) {
            None => message.push(String::new()),
            Some(b' ' | b'-') => message.push(line[4..].to_string()),
            Some(_) => return Err(Error::Malformed(format!("bad separator: {line}"))),
        }
    }

    Ok(Reply::new(ReplyCode::new(code), message))
}

/// Reads the three-digit code at the start of a reply line.
fn parse_code(line: &str) -> Result<u16> {
    let digits = line
        .get(..3)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::Malformed(format!("invalid reply line: {line}")))?;
    digits
        .parse()
        .map_err(|_| Error::Malformed(format!("invalid reply code: {digits}")))
}

/// Checks if a line is the last line of a reply.
///
/// Continuation lines use `-` after the code; the last line uses a space or
/// ends right after the code.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.len() == 3 || (line.len() >= 4 && line.as_bytes()[3] == b' ')
}
