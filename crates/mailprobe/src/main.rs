//! `mailprobe` - SMTP diagnostic client
//!
//! Sends a test message and prints the full session transcript. The session
//! can be cut short at any protocol stage with `--quit-after`,
//! `--drop-after` or `--drop-after-send`.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod output;
mod payload;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailprobe_smtp::delivery::{HickoryResolver, TcpConnector};
use mailprobe_smtp::{Config, Delivery, ErrorKind, Report};

use cli::{Cli, Environment};
use output::Terminal;
use payload::{Message, PayloadContext};

/// Run completed, or stopped at a configured checkpoint.
const EXIT_OK: u8 = 0;
/// Bad flags or configuration.
const EXIT_CONFIG: u8 = 1;
/// Network or protocol failure.
const EXIT_FAILURE: u8 = 2;

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the transcript.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{}", format!("*** {err:#}").bright_red());
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<u8> {
    let env = Environment::detect();
    let config = cli.config(&env)?;

    if cli.dump {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(EXIT_OK);
    }

    let mut stdin = std::io::stdin().lock();
    let data = cli.data_template(&mut stdin)?;
    let body = cli.body_text(&mut stdin)?;
    drop(stdin);

    let hostname = env
        .hostname
        .clone()
        .unwrap_or_else(|| "hostname.failed.invalid".to_string());
    let message = Message {
        data: &data,
        body: &body,
        headers: &cli.add_header,
        from: &config.from,
        to: &config.recipients,
        fixup: !cli.no_data_fixup,
    };
    let payload = payload::render(&message, &PayloadContext::now(hostname));

    if cli.dump_mail {
        let mut out = std::io::stdout().lock();
        out.write_all(&payload)?;
        out.write_all(b"\n")?;
        return Ok(EXIT_OK);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    let observer = Arc::new(Terminal::new(cli.filter()));
    let report = runtime.block_on(deliver(config, observer, &payload));
    Ok(exit_code(&report))
}

/// Resolver problems surface in the report as network failures, and only
/// when a recipient domain actually needs a lookup.
async fn deliver(config: Config, observer: Arc<Terminal>, payload: &[u8]) -> Report {
    let resolver = HickoryResolver::from_system(config.timeout);
    let connector = TcpConnector::new(config.family, config.timeout);
    Delivery::new(config, resolver, connector, observer)
        .run(payload)
        .await
}

fn exit_code(report: &Report) -> u8 {
    match report.failure_kind() {
        Some(ErrorKind::Configuration) => EXIT_CONFIG,
        Some(ErrorKind::Network | ErrorKind::Protocol) => EXIT_FAILURE,
        None if !report.skipped.is_empty() => EXIT_CONFIG,
        None => EXIT_OK,
    }
}
