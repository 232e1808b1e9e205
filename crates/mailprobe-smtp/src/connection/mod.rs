//! SMTP connection: streams, line transport and the protocol client.

mod client;
mod data;
mod session;
mod stream;
mod tee;
mod transport;

pub use client::Client;
pub use data::{DataWriter, DotStuffer};
pub use session::{Session, SessionOptions};
pub use stream::{SmtpStream, dial, tls_connector};
pub use tee::Tee;
pub use transport::{Ticket, Transport};
