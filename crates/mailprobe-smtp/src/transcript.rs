//! Classified protocol events for a live transcript.
//!
//! The engine reports everything it sends and every raw line it reads to an
//! [`Observer`]. Rendering is left to the observer.

use std::sync::{Arc, Mutex};

use serde::Serialize;

/// How a received reply line reads at a glance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyClass {
    /// 2xx, 3xx and the other non-failure codes.
    Accept,
    /// 4xx transient failure.
    Defer,
    /// 5xx permanent failure.
    Reject,
}

/// Classifies a received line by its leading three-digit code.
///
/// Returns `None` for a line that does not start with three digits.
#[must_use]
pub fn classify(line: &str) -> Option<ReplyClass> {
    let code = line.as_bytes().get(..3)?;
    if !code.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(match code[0] {
        b'4' => ReplyClass::Defer,
        b'5' => ReplyClass::Reject,
        _ => ReplyClass::Accept,
    })
}

/// What an [`Event`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Informational note from the client.
    Info,
    /// Something went wrong but the run continues.
    Warn,
    /// A failure.
    Error,
    /// A line written to the server.
    Sent,
    /// A raw line read from the server, with its class if it carries a code.
    Received(Option<ReplyClass>),
}

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Whether the connection was encrypted at the time.
    pub tls: bool,
    /// The line, without its line ending.
    pub text: String,
}

impl Event {
    /// Creates an event.
    #[must_use]
    pub fn new(kind: EventKind, tls: bool, text: impl Into<String>) -> Self {
        Self {
            kind,
            tls,
            text: text.into(),
        }
    }

    /// Creates a received-line event, classifying the line.
    #[must_use]
    pub fn received(tls: bool, line: impl Into<String>) -> Self {
        let text = line.into();
        Self {
            kind: EventKind::Received(classify(&text)),
            tls,
            text,
        }
    }
}

/// Consumer of transcript events.
pub trait Observer: Send + Sync {
    /// Called once per event, in protocol order.
    fn observe(&self, event: &Event);
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl Observer for Discard {
    fn observe(&self, _event: &Event) {}
}

/// Observer that keeps every event in memory.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    /// Creates an empty recorder behind an `Arc`, ready to hand to a client.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a copy of the events seen so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Returns the text of every event of the given kind.
    #[must_use]
    pub fn lines(&self, matches: impl Fn(EventKind) -> bool) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| matches(event.kind))
            .map(|event| event.text)
            .collect()
    }

    /// Returns the text of every sent line.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.lines(|kind| kind == EventKind::Sent)
    }

    /// Returns the text of every received line.
    #[must_use]
    pub fn received(&self) -> Vec<String> {
        self.lines(|kind| matches!(kind, EventKind::Received(_)))
    }
}

impl Observer for Recorder {
    fn observe(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Shared handle the engine reports through.
///
/// Knows whether the connection is encrypted so callers only supply the
/// text.
#[derive(Clone)]
pub struct Transcript {
    observer: Arc<dyn Observer>,
    tls: bool,
}

impl Transcript {
    /// Wraps an observer. The connection starts unencrypted.
    #[must_use]
    pub fn new(observer: Arc<dyn Observer>) -> Self {
        Self {
            observer,
            tls: false,
        }
    }

    /// Marks the connection as encrypted from now on.
    pub const fn set_tls(&mut self) {
        self.tls = true;
    }

    /// Returns whether the connection is encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls
    }

    /// Reports an event of the given kind. Multi-line text becomes one event
    /// per line; empty text is still one (blank) event.
    pub fn emit(&self, kind: EventKind, text: &str) {
        if text.is_empty() {
            self.observer.observe(&Event::new(kind, self.tls, ""));
            return;
        }
        for line in text.lines() {
            self.observer.observe(&Event::new(kind, self.tls, line));
        }
    }

    /// Reports an informational note.
    pub fn info(&self, text: &str) {
        self.emit(EventKind::Info, text);
    }

    /// Reports a warning.
    pub fn warn(&self, text: &str) {
        self.emit(EventKind::Warn, text);
    }

    /// Reports an error.
    pub fn error(&self, text: &str) {
        self.emit(EventKind::Error, text);
    }

    /// Reports a line written to the server.
    pub fn sent(&self, text: &str) {
        self.emit(EventKind::Sent, text);
    }

    /// Reports one raw line read from the server.
    pub fn received(&self, line: &str) {
        self.observer.observe(&Event::received(self.tls, line));
    }
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript").field("tls", &self.tls).finish_non_exhaustive()
    }
}
