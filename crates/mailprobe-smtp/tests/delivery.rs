//! Integration tests for destination selection and the delivery driver.
//!
//! DNS and TCP are replaced by in-memory fakes: the resolver answers from a
//! table, and the connector hands out scripted streams that capture what
//! the client writes.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use mailprobe_smtp::delivery::{Connector, MxRecord, MxResolver};
use mailprobe_smtp::transcript::{EventKind, Recorder};
use mailprobe_smtp::{
    Address, Checkpoint, Config, ConfigBuilder, Delivery, Error, ErrorKind, Outcome, Policy,
    Result, Server, Stage,
};

/// Stream that plays back a fixed server script and records writes.
struct ScriptedStream {
    script: Cursor<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let pos = usize::try_from(self.script.position()).unwrap();
        let data = self.script.get_ref();
        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }

        let remaining = &data[pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        self.script.set_position((pos + n) as u64);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Resolver answering from a table; unknown domains fail.
#[derive(Default)]
struct TableResolver {
    answers: HashMap<String, Vec<MxRecord>>,
    lookups: Mutex<Vec<String>>,
}

impl TableResolver {
    fn with(mut self, domain: &str, records: Vec<MxRecord>) -> Self {
        self.answers.insert(domain.to_string(), records);
        self
    }

    fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

impl MxResolver for &TableResolver {
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>> {
        self.lookups.lock().unwrap().push(domain.to_string());
        self.answers
            .get(domain)
            .cloned()
            .ok_or_else(|| Error::Dns("SERVFAIL".into()))
    }
}

/// Connector that accepts only hosts it has a script for.
#[derive(Default)]
struct ScriptedConnector {
    scripts: HashMap<String, Vec<u8>>,
    attempts: Mutex<Vec<String>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedConnector {
    fn accept(mut self, host: &str, script: &[u8]) -> Self {
        self.scripts.insert(host.to_string(), script.to_vec());
        self
    }

    fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    fn written(&self) -> String {
        String::from_utf8(self.written.lock().unwrap().clone()).unwrap()
    }
}

impl Connector for &ScriptedConnector {
    type Stream = ScriptedStream;

    async fn connect(&self, host: &str, port: u16) -> Result<ScriptedStream> {
        self.attempts.lock().unwrap().push(format!("{host}:{port}"));
        let script = self
            .scripts
            .get(host)
            .ok_or_else(|| Error::from(io::Error::from(io::ErrorKind::ConnectionRefused)))?;
        Ok(ScriptedStream {
            script: Cursor::new(script.clone()),
            written: Arc::clone(&self.written),
        })
    }
}

const ACCEPT_ALL: &[u8] = b"220 mx ready\r\n\
250 mx\r\n\
250 sender ok\r\n\
250 recipient ok\r\n\
354 go ahead\r\n\
250 queued\r\n\
221 bye\r\n";

const PAYLOAD: &[u8] = b"Subject: t\r\n\r\nhi\r\n";

fn builder() -> ConfigBuilder {
    Config::builder()
        .from("a@y.test")
        .helo("client.test")
        .timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn exchangers_tried_in_preference_order() {
    let resolver = TableResolver::default().with(
        "x.test",
        vec![
            MxRecord::new(20, "c.x.test."),
            MxRecord::new(10, "a.x.test."),
            MxRecord::new(10, "b.x.test."),
        ],
    );
    let connector = ScriptedConnector::default().accept("c.x.test", ACCEPT_ALL);
    let recorder = Recorder::shared();
    let config = builder().recipient("u@x.test").build().unwrap();

    let report = Delivery::new(config, &resolver, &connector, recorder.clone())
        .run(PAYLOAD)
        .await;

    assert_eq!(
        connector.attempts(),
        ["a.x.test:25", "b.x.test:25", "c.x.test:25"]
    );
    assert!(report.is_success(), "{report:?}");
    assert!(matches!(report.destinations[0].outcome, Outcome::Delivered));

    let warnings = recorder.lines(|kind| kind == EventKind::Warn);
    assert_eq!(warnings.len(), 2);
    assert!(warnings[0].starts_with("Failed to connect to a.x.test:25: "));
    assert_eq!(
        connector.written(),
        "EHLO client.test\r\n\
         MAIL FROM:<a@y.test>\r\n\
         RCPT TO:<u@x.test>\r\n\
         DATA\r\n\
         Subject: t\r\n\
         \r\n\
         hi\r\n\
         .\r\n\
         QUIT\r\n"
    );
}

#[tokio::test]
async fn domain_without_exchangers_is_tried_directly() {
    let resolver = TableResolver::default().with("x.test", Vec::new());
    let connector = ScriptedConnector::default().accept("x.test", ACCEPT_ALL);
    let config = builder().recipient("u@x.test").build().unwrap();

    let report = Delivery::new(config, &resolver, &connector, Recorder::shared())
        .run(PAYLOAD)
        .await;

    assert_eq!(connector.attempts(), ["x.test:25"]);
    assert!(report.is_success());
}

#[tokio::test]
async fn null_mx_falls_back_like_no_mx() {
    let resolver = TableResolver::default().with("x.test", vec![MxRecord::new(0, ".")]);
    let connector = ScriptedConnector::default();
    let config = builder().recipient("u@x.test").build().unwrap();

    let report = Delivery::new(config, &resolver, &connector, Recorder::shared())
        .run(PAYLOAD)
        .await;

    assert_eq!(connector.attempts(), ["x.test:25"]);
    assert_eq!(report.failure_kind(), Some(ErrorKind::Network));
}

#[tokio::test]
async fn lookup_failure_is_a_warning() {
    let resolver = TableResolver::default();
    let connector = ScriptedConnector::default().accept("x.test", ACCEPT_ALL);
    let recorder = Recorder::shared();
    let config = builder().recipient("u@x.test").build().unwrap();

    let report = Delivery::new(config, &resolver, &connector, recorder.clone())
        .run(PAYLOAD)
        .await;

    assert!(report.is_success());
    assert_eq!(
        recorder.lines(|kind| kind == EventKind::Warn),
        ["While resolving MX for x.test: DNS error: SERVFAIL"]
    );
}

#[tokio::test]
async fn recipient_without_domain_is_skipped() {
    let resolver = TableResolver::default().with("x.test", Vec::new());
    let connector = ScriptedConnector::default().accept("x.test", ACCEPT_ALL);
    let recorder = Recorder::shared();
    let config = builder()
        .recipients(["nobody", "u@x.test"])
        .build()
        .unwrap();

    let report = Delivery::new(config, &resolver, &connector, recorder.clone())
        .run(PAYLOAD)
        .await;

    assert_eq!(report.skipped, [Address::new("nobody")]);
    assert_eq!(report.destinations.len(), 1);
    assert_eq!(
        recorder.lines(|kind| kind == EventKind::Error),
        ["Recipient 'nobody' has no hostname"]
    );
}

#[tokio::test]
async fn recipients_grouped_by_domain_in_first_seen_order() {
    let resolver = TableResolver::default()
        .with("x.test", Vec::new())
        .with("y.test", Vec::new());
    let connector = ScriptedConnector::default();
    let recorder = Recorder::shared();
    let config = builder()
        .recipients(["u@X.test", "v@y.test", "w@x.test"])
        .build()
        .unwrap();

    let report = Delivery::new(config, &resolver, &connector, recorder.clone())
        .run(PAYLOAD)
        .await;

    let destinations: Vec<_> = report
        .destinations
        .iter()
        .map(|d| (d.destination.as_str(), d.recipients.len()))
        .collect();
    assert_eq!(destinations, [("x.test", 2), ("y.test", 1)]);
    assert_eq!(resolver.lookups(), ["x.test", "y.test"]);
    let info = recorder.lines(|kind| kind == EventKind::Info);
    assert!(info.contains(&"Delivering to x.test...".to_string()));
    assert!(info.contains(&"Delivering to y.test...".to_string()));
}

#[tokio::test]
async fn routing_domain_overrides_recipient_domains() {
    let resolver =
        TableResolver::default().with("relay.test", vec![MxRecord::new(5, "mx.relay.test")]);
    let connector = ScriptedConnector::default();
    let config = builder()
        .recipients(["u@x.test", "v@y.test"])
        .routing_domain("relay.test.")
        .build()
        .unwrap();

    let report = Delivery::new(config, &resolver, &connector, Recorder::shared())
        .run(PAYLOAD)
        .await;

    assert_eq!(report.destinations.len(), 1);
    assert_eq!(connector.attempts(), ["mx.relay.test:25"]);
}

#[tokio::test]
async fn explicit_server_skips_resolution() {
    let resolver = TableResolver::default();
    let connector = ScriptedConnector::default();
    let config = builder()
        .recipients(["u@x.test", "v@y.test"])
        .server(Server::parse("mail.test:2525").unwrap())
        .build()
        .unwrap();

    let report = Delivery::new(config, &resolver, &connector, Recorder::shared())
        .run(PAYLOAD)
        .await;

    assert!(resolver.lookups().is_empty());
    assert_eq!(connector.attempts(), ["mail.test:2525"]);
    assert_eq!(report.destinations[0].recipients.len(), 2);
}

#[tokio::test]
async fn refused_recipient_does_not_stop_delivery() {
    let script = b"220 mx ready\r\n\
250 mx\r\n\
250 sender ok\r\n\
550 no such user\r\n\
250 recipient ok\r\n\
354 go ahead\r\n\
250 queued\r\n\
221 bye\r\n";
    let resolver = TableResolver::default().with("x.test", Vec::new());
    let connector = ScriptedConnector::default().accept("x.test", script);
    let config = builder()
        .recipients(["bad@x.test", "good@x.test"])
        .build()
        .unwrap();

    let report = Delivery::new(config, &resolver, &connector, Recorder::shared())
        .run(PAYLOAD)
        .await;

    let dest = &report.destinations[0];
    assert!(matches!(dest.outcome, Outcome::Delivered));
    assert_eq!(dest.rejected.len(), 1);
    assert_eq!(dest.rejected[0].recipient, Address::new("bad@x.test"));
    assert!(!report.is_success());
    assert_eq!(report.failure_kind(), Some(ErrorKind::Protocol));
}

#[tokio::test]
async fn all_recipients_refused_skips_data() {
    let script = b"220 mx ready\r\n250 mx\r\n250 sender ok\r\n550 no such user\r\n";
    let resolver = TableResolver::default().with("x.test", Vec::new());
    let connector = ScriptedConnector::default().accept("x.test", script);
    let config = builder().recipient("bad@x.test").build().unwrap();

    let report = Delivery::new(config, &resolver, &connector, Recorder::shared())
        .run(PAYLOAD)
        .await;

    match &report.destinations[0].outcome {
        Outcome::Failed(err) => assert_eq!(err.code(), Some(550)),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(
        connector.written(),
        "EHLO client.test\r\nMAIL FROM:<a@y.test>\r\nRCPT TO:<bad@x.test>\r\n"
    );
}

#[tokio::test]
async fn checkpoint_ends_destination_without_failure() {
    let script = b"220 mx ready\r\n250 mx\r\n250 sender ok\r\n221 bye\r\n";
    let resolver = TableResolver::default().with("x.test", Vec::new());
    let connector = ScriptedConnector::default().accept("x.test", script);
    let config = builder()
        .recipient("u@x.test")
        .policy(Policy {
            quit_after: Stage::Mail,
            ..Policy::default()
        })
        .build()
        .unwrap();

    let report = Delivery::new(config, &resolver, &connector, Recorder::shared())
        .run(PAYLOAD)
        .await;

    match &report.destinations[0].outcome {
        Outcome::Terminated(t) => {
            assert_eq!(t.stage, Stage::Mail);
            assert_eq!(t.checkpoint, Checkpoint::QuitAfter);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(report.is_success());
    assert_eq!(
        connector.written(),
        "EHLO client.test\r\nMAIL FROM:<a@y.test>\r\nQUIT\r\n"
    );
}

#[tokio::test]
async fn refused_checkpoint_quit_fails_destination_without_rejections() {
    let script = b"220 mx ready\r\n250 mx\r\n250 sender ok\r\n250 recipient ok\r\n502 no quit\r\n";
    let resolver = TableResolver::default().with("x.test", Vec::new());
    let connector = ScriptedConnector::default().accept("x.test", script);
    let recorder = Recorder::shared();
    let config = builder()
        .recipients(["u@x.test", "v@x.test"])
        .policy(Policy {
            quit_after: Stage::Rcpt,
            ..Policy::default()
        })
        .build()
        .unwrap();

    let report = Delivery::new(config, &resolver, &connector, recorder.clone())
        .run(PAYLOAD)
        .await;

    let dest = &report.destinations[0];
    match &dest.outcome {
        Outcome::Failed(err) => assert_eq!(err.code(), Some(502)),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(dest.rejected.is_empty());
    assert!(recorder.lines(|kind| kind == EventKind::Error).is_empty());
    assert_eq!(
        connector.written(),
        "EHLO client.test\r\nMAIL FROM:<a@y.test>\r\nRCPT TO:<u@x.test>\r\nQUIT\r\n"
    );
}

#[tokio::test]
async fn verbatim_transfer_when_echo_is_suppressed() {
    let resolver = TableResolver::default().with("x.test", Vec::new());
    let connector = ScriptedConnector::default().accept("x.test", ACCEPT_ALL);
    let recorder = Recorder::shared();
    let config = builder()
        .recipient("u@x.test")
        .suppress_data(true)
        .build()
        .unwrap();

    let report = Delivery::new(config, &resolver, &connector, recorder.clone())
        .run(b".hidden\r\nline")
        .await;

    assert!(report.is_success());
    assert!(connector.written().contains("DATA\r\n..hidden\r\nline\r\n.\r\nQUIT\r\n"));
    assert!(!recorder.sent().iter().any(|line| line.contains("hidden")));
}
