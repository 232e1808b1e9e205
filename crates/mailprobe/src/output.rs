//! Terminal rendering of the session transcript.

use std::io::Write;

use colored::{ColoredString, Colorize};

use mailprobe_smtp::transcript::{Event, EventKind, Observer, ReplyClass};

/// Which transcript categories to hide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Filter {
    /// Hide lines sent to the server.
    pub hide_send: bool,
    /// Hide lines received from the server.
    pub hide_receive: bool,
    /// Hide informational notes.
    pub hide_info: bool,
}

impl Filter {
    /// Hides every category that can be hidden.
    pub const fn all() -> Self {
        Self {
            hide_send: true,
            hide_receive: true,
            hide_info: true,
        }
    }

    /// Returns true if events of this kind are printed.
    ///
    /// Warnings and errors are always shown.
    pub const fn shows(self, kind: EventKind) -> bool {
        match kind {
            EventKind::Info => !self.hide_info,
            EventKind::Sent => !self.hide_send,
            EventKind::Received(_) => !self.hide_receive,
            EventKind::Warn | EventKind::Error => true,
        }
    }
}

/// Prefix tag for an event.
pub const fn tag(kind: EventKind, tls: bool) -> &'static str {
    match (kind, tls) {
        (EventKind::Info, _) => "===",
        (EventKind::Warn, _) => "+++",
        (EventKind::Error, _) => "***",
        (EventKind::Sent, false) => " ->",
        (EventKind::Sent, true) => " ~>",
        (EventKind::Received(_), false) => "<- ",
        (EventKind::Received(_), true) => "<~ ",
    }
}

/// The uncoloured transcript line for an event.
pub fn format(event: &Event) -> String {
    format!("{} {}", tag(event.kind, event.tls), event.text)
}

fn paint(line: String, kind: EventKind) -> ColoredString {
    match kind {
        EventKind::Info => line.white(),
        EventKind::Warn => line.bright_yellow(),
        EventKind::Error => line.bright_red(),
        EventKind::Sent => line.cyan(),
        EventKind::Received(Some(ReplyClass::Accept)) => line.green(),
        EventKind::Received(Some(ReplyClass::Defer)) => line.yellow(),
        EventKind::Received(Some(ReplyClass::Reject)) => line.red(),
        EventKind::Received(None) => line.blue(),
    }
}

/// [`Observer`] printing the transcript to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Terminal {
    filter: Filter,
}

impl Terminal {
    /// Creates a renderer with the given filter.
    pub const fn new(filter: Filter) -> Self {
        Self { filter }
    }
}

impl Observer for Terminal {
    fn observe(&self, event: &Event) {
        if !self.filter.shows(event.kind) {
            return;
        }
        let line = paint(format(event), event.kind);
        let mut out = std::io::stdout().lock();
        // Nothing sensible to do if stdout is gone.
        let _ = writeln!(out, "{line}");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tags_follow_direction_and_tls() {
        assert_eq!(format(&Event::new(EventKind::Sent, false, "EHLO a")), " -> EHLO a");
        assert_eq!(format(&Event::new(EventKind::Sent, true, "EHLO a")), " ~> EHLO a");
        assert_eq!(format(&Event::received(false, "250 ok")), "<-  250 ok");
        assert_eq!(format(&Event::received(true, "250 ok")), "<~  250 ok");
        assert_eq!(
            format(&Event::new(EventKind::Info, false, "Trying x:25...")),
            "=== Trying x:25..."
        );
        assert_eq!(format(&Event::new(EventKind::Warn, true, "w")), "+++ w");
        assert_eq!(format(&Event::new(EventKind::Error, false, "e")), "*** e");
    }

    #[test]
    fn hide_all_keeps_problems_visible() {
        let filter = Filter::all();
        assert!(!filter.shows(EventKind::Info));
        assert!(!filter.shows(EventKind::Sent));
        assert!(!filter.shows(EventKind::Received(Some(ReplyClass::Reject))));
        assert!(filter.shows(EventKind::Warn));
        assert!(filter.shows(EventKind::Error));
    }

    #[test]
    fn filters_are_independent() {
        let filter = Filter {
            hide_send: true,
            ..Filter::default()
        };
        assert!(!filter.shows(EventKind::Sent));
        assert!(filter.shows(EventKind::Received(None)));
        assert!(filter.shows(EventKind::Info));
    }
}
