//! Command-line arguments and their translation into a [`Config`].

use std::io::Read;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;

use mailprobe_smtp::{Address, Config, IpFamily, MessageSize, Policy, Server, TlsOptions};

use crate::output::Filter;
use crate::payload::{DEFAULT_BODY, DEFAULT_DATA};

/// Send a test message over SMTP, optionally stopping the session at a
/// chosen stage.
#[derive(Parser, Debug)]
#[command(name = "mailprobe")]
#[command(version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Recipients, comma separated; may be repeated
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub to: Vec<String>,

    /// Envelope sender; `<>` for the null sender [default: $USER@hostname]
    #[arg(short, long)]
    pub from: Option<String>,

    /// Server to connect to, `host[:port]`, instead of looking up MX records
    #[arg(short, long)]
    pub server: Option<String>,

    /// Route as though the mail were addressed to this domain
    #[arg(long, value_name = "DOMAIN")]
    pub copy_routing: Option<String>,

    /// Connect over IPv4 only
    #[arg(short = '4', conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Connect over IPv6 only
    #[arg(short = '6')]
    pub ipv6: bool,

    /// Identity for EHLO/HELO [default: hostname]
    #[arg(long, visible_alias = "ehlo")]
    pub helo: Option<String>,

    /// Greet with HELO instead of EHLO
    #[arg(long)]
    pub send_helo: bool,

    /// Seconds to wait for each reply
    #[arg(long, default_value_t = 30, value_name = "SECONDS")]
    pub timeout: u64,

    /// Upgrade the connection with STARTTLS
    #[arg(long)]
    pub starttls: bool,

    /// Name to verify the server certificate against [default: the host connected to]
    #[arg(long, value_name = "NAME")]
    pub tls_server_name: Option<String>,

    /// Accept any server certificate
    #[arg(long)]
    pub insecure: bool,

    /// Declare SIZE on MAIL FROM; without a value, the payload size
    #[arg(long, num_args = 0..=1, require_equals = true, value_name = "BYTES")]
    pub size: Option<Option<u64>>,

    /// Request SMTPUTF8
    #[arg(long)]
    pub smtputf8: bool,

    /// Send QUIT after this stage's reply
    #[arg(short, long, value_name = "STAGE")]
    pub quit_after: Option<String>,

    /// Drop the connection after this stage's reply
    #[arg(long, value_name = "STAGE")]
    pub drop_after: Option<String>,

    /// Drop the connection as soon as this stage's command is sent
    #[arg(long, value_name = "STAGE")]
    pub drop_after_send: Option<String>,

    /// DATA template; `-` or `@-` for stdin, `@FILE` to read a file
    #[arg(long)]
    pub data: Option<String>,

    /// Message body; `-` or `@-` for stdin, `@FILE` to read a file
    #[arg(long)]
    pub body: Option<String>,

    /// Header line to add; may be repeated
    #[arg(long = "add-header", value_name = "HEADER")]
    pub add_header: Vec<String>,

    /// Send the DATA template exactly as given
    #[arg(long)]
    pub no_data_fixup: bool,

    /// Do not echo the message body
    #[arg(long)]
    pub suppress_data: bool,

    /// Hide lines sent to the server
    #[arg(long)]
    pub hide_send: bool,

    /// Hide lines received from the server
    #[arg(long)]
    pub hide_receive: bool,

    /// Hide informational messages
    #[arg(long)]
    pub hide_informational: bool,

    /// Hide everything except warnings and errors
    #[arg(long)]
    pub hide_all: bool,

    /// Print the configuration as JSON and exit
    #[arg(long)]
    pub dump: bool,

    /// Print the message payload and exit
    #[arg(long)]
    pub dump_mail: bool,
}

/// Facts about the local machine used for defaults.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// Login name.
    pub user: Option<String>,
    /// Host name.
    pub hostname: Option<String>,
}

impl Environment {
    /// Reads the login name from the environment and the host name from
    /// the system.
    pub fn detect() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .ok()
            .filter(|u| !u.is_empty());
        let hostname = match hostname::get() {
            Ok(name) => Some(name.to_string_lossy().into_owned()),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read hostname");
                None
            }
        };
        Self { user, hostname }
    }
}

impl Cli {
    /// Builds the run configuration.
    ///
    /// # Errors
    ///
    /// Fails on an invalid stage name or server, or when a default for
    /// `--from` or `--helo` cannot be determined.
    pub fn config(&self, env: &Environment) -> anyhow::Result<Config> {
        let policy = Policy::parse(
            self.quit_after.as_deref().unwrap_or_default(),
            self.drop_after.as_deref().unwrap_or_default(),
            self.drop_after_send.as_deref().unwrap_or_default(),
        )?;

        let from = match &self.from {
            Some(from) => Address::new(from.as_str()),
            None => {
                let user = env
                    .user
                    .as_deref()
                    .context("failed to retrieve username for --from")?;
                let host = env
                    .hostname
                    .as_deref()
                    .context("failed to retrieve hostname for --from")?;
                Address::new(format!("{user}@{host}"))
            }
        };
        let helo = match &self.helo {
            Some(helo) => helo.clone(),
            None => env
                .hostname
                .clone()
                .context("failed to retrieve hostname for --helo")?,
        };

        let family = if self.ipv4 {
            IpFamily::V4
        } else if self.ipv6 {
            IpFamily::V6
        } else {
            IpFamily::Any
        };
        let size = match self.size {
            None => MessageSize::Omit,
            Some(None) => MessageSize::Payload,
            Some(Some(bytes)) => MessageSize::Bytes(bytes),
        };

        let mut builder = Config::builder()
            .recipients(
                self.to
                    .iter()
                    .map(|to| to.trim())
                    .filter(|to| !to.is_empty()),
            )
            .from(from)
            .helo(helo)
            .family(family)
            .timeout(Duration::from_secs(self.timeout))
            .starttls(self.starttls)
            .send_helo(self.send_helo)
            .size(size)
            .smtputf8(self.smtputf8)
            .suppress_data(self.suppress_data)
            .tls(TlsOptions {
                server_name: self.tls_server_name.clone(),
                accept_invalid_certs: self.insecure,
            })
            .policy(policy);
        if let Some(server) = &self.server {
            builder = builder.server(Server::parse(server)?);
        }
        if let Some(domain) = &self.copy_routing {
            builder = builder.routing_domain(domain.as_str());
        }
        Ok(builder.build()?)
    }

    /// Which transcript categories to hide.
    pub const fn filter(&self) -> Filter {
        if self.hide_all {
            return Filter::all();
        }
        Filter {
            hide_send: self.hide_send,
            hide_receive: self.hide_receive,
            hide_info: self.hide_informational,
        }
    }

    /// The DATA template, read from its source.
    ///
    /// # Errors
    ///
    /// Fails if the file or stdin cannot be read.
    pub fn data_template(&self, stdin: &mut impl Read) -> anyhow::Result<String> {
        self.data
            .as_deref()
            .map_or_else(|| Ok(DEFAULT_DATA.to_string()), |arg| load_text("--data", arg, stdin))
    }

    /// The message body, read from its source.
    ///
    /// # Errors
    ///
    /// Fails if the file or stdin cannot be read.
    pub fn body_text(&self, stdin: &mut impl Read) -> anyhow::Result<String> {
        self.body
            .as_deref()
            .map_or_else(|| Ok(DEFAULT_BODY.to_string()), |arg| load_text("--body", arg, stdin))
    }
}

/// Resolves a text argument.
///
/// `-` and `@-` read stdin, `@FILE` reads a file, `@@TEXT` is the literal
/// `@TEXT`. Literal text has `\n` sequences turned into newlines.
fn load_text(flag: &str, arg: &str, stdin: &mut impl Read) -> anyhow::Result<String> {
    if arg == "-" || arg == "@-" {
        let mut text = String::new();
        stdin
            .read_to_string(&mut text)
            .with_context(|| format!("while reading stdin for {flag}"))?;
        return Ok(text);
    }
    if let Some(path) = arg.strip_prefix('@') {
        if !path.starts_with('@') {
            if path.is_empty() {
                bail!("missing file name for {flag}");
            }
            return std::fs::read_to_string(path)
                .with_context(|| format!("while reading '{path}' for {flag}"));
        }
        return Ok(path.replace("\\n", "\n"));
    }
    Ok(arg.replace("\\n", "\n"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use mailprobe_smtp::Stage;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("mailprobe").chain(args.iter().copied())).unwrap()
    }

    fn env() -> Environment {
        Environment {
            user: Some("probe".into()),
            hostname: Some("host.test".into()),
        }
    }

    #[test]
    fn recipients_split_on_commas_and_repeat() {
        let cli = parse(&["-t", "a@x.test,b@x.test", "--to", "c@y.test"]);
        let config = cli.config(&env()).unwrap();
        let to: Vec<_> = config.recipients.iter().map(Address::as_str).collect();
        assert_eq!(to, ["a@x.test", "b@x.test", "c@y.test"]);
    }

    #[test]
    fn recipients_are_required() {
        assert!(Cli::try_parse_from(["mailprobe"]).is_err());
    }

    #[test]
    fn defaults_come_from_environment() {
        let config = parse(&["-t", "a@x.test"]).config(&env()).unwrap();
        assert_eq!(config.from.as_str(), "probe@host.test");
        assert_eq!(config.helo, "host.test");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.server.is_none());
    }

    #[test]
    fn missing_user_without_from_is_an_error() {
        let env = Environment {
            user: None,
            hostname: Some("host.test".into()),
        };
        let err = parse(&["-t", "a@x.test"]).config(&env).unwrap_err();
        assert!(err.to_string().contains("--from"));
        assert!(parse(&["-t", "a@x.test", "-f", "<>"]).config(&env).is_ok());
    }

    #[test]
    fn null_sender() {
        let config = parse(&["-t", "a@x.test", "-f", "<>"]).config(&env()).unwrap();
        assert!(config.from.is_null());
    }

    #[test]
    fn size_forms() {
        assert_eq!(parse(&["-t", "a@x"]).size, None);
        assert_eq!(parse(&["-t", "a@x", "--size"]).size, Some(None));
        assert_eq!(parse(&["-t", "a@x", "--size=512"]).size, Some(Some(512)));

        let config = parse(&["-t", "a@x", "--size"]).config(&env()).unwrap();
        assert_eq!(config.size, MessageSize::Payload);
    }

    #[test]
    fn stages_are_normalised() {
        let config = parse(&["-t", "a@x", "-q", "TO", "--drop-after-send", "banner"])
            .config(&env())
            .unwrap();
        assert_eq!(config.policy.quit_after, Stage::Rcpt);
        assert_eq!(config.policy.drop_after_send, Stage::Connect);
        assert_eq!(config.policy.drop_after, Stage::None);
    }

    #[test]
    fn quit_after_data_is_rejected() {
        let err = parse(&["-t", "a@x", "--quit-after", "dot"])
            .config(&env())
            .unwrap_err();
        assert!(err.to_string().contains("quit-after"), "{err}");
    }

    #[test]
    fn server_and_routing() {
        let config = parse(&["-t", "a@x", "-s", "[::1]:2525", "--copy-routing", "relay.test.", "-6"])
            .config(&env())
            .unwrap();
        assert_eq!(config.server, Some(Server::new("::1", 2525)));
        assert_eq!(config.routing_domain.as_deref(), Some("relay.test"));
        assert_eq!(config.family, IpFamily::V6);
    }

    #[test]
    fn ip_families_conflict() {
        assert!(Cli::try_parse_from(["mailprobe", "-t", "a@x", "-4", "-6"]).is_err());
    }

    #[test]
    fn ehlo_is_an_alias() {
        let config = parse(&["-t", "a@x", "--ehlo", "me.test"]).config(&env()).unwrap();
        assert_eq!(config.helo, "me.test");
    }

    #[test]
    fn hide_all_overrides() {
        assert_eq!(parse(&["-t", "a@x", "--hide-all"]).filter(), Filter::all());
        let filter = parse(&["-t", "a@x", "--hide-send"]).filter();
        assert!(filter.hide_send && !filter.hide_receive && !filter.hide_info);
    }

    #[test]
    fn literal_text_translates_newlines() {
        let mut stdin = Cursor::new(Vec::new());
        assert_eq!(load_text("--body", "a\\nb", &mut stdin).unwrap(), "a\nb");
        assert_eq!(load_text("--body", "@@x\\ny", &mut stdin).unwrap(), "@x\ny");
    }

    #[test]
    fn stdin_sources() {
        for arg in ["-", "@-"] {
            let mut stdin = Cursor::new(b"from stdin\n".to_vec());
            assert_eq!(load_text("--data", arg, &mut stdin).unwrap(), "from stdin\n");
        }
    }

    #[test]
    fn file_source() {
        let path = std::env::temp_dir().join(format!("mailprobe-cli-{}.txt", std::process::id()));
        std::fs::write(&path, "file body\\n stays").unwrap();
        let arg = format!("@{}", path.display());

        let text = load_text("--body", &arg, &mut Cursor::new(Vec::new())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(text, "file body\\n stays");
    }

    #[test]
    fn missing_file_names_the_flag() {
        let err = load_text("--data", "@/nonexistent/mailprobe", &mut Cursor::new(Vec::new()))
            .unwrap_err();
        assert!(err.to_string().contains("--data"));
    }

    #[test]
    fn defaults_for_data_and_body() {
        let cli = parse(&["-t", "a@x"]);
        let mut stdin = Cursor::new(Vec::new());
        assert_eq!(cli.data_template(&mut stdin).unwrap(), DEFAULT_DATA);
        assert_eq!(cli.body_text(&mut stdin).unwrap(), DEFAULT_BODY);
    }
}
