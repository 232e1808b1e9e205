//! Byte streams under the SMTP transport: plain or TLS, plus dialling.

#![allow(clippy::missing_errors_doc)]

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, lookup_host};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::{IpFamily, TlsOptions};
use crate::{Error, Result};

/// A stream that can be either plaintext or TLS.
pub enum SmtpStream<S> {
    /// Plaintext stream.
    Plain(S),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<S>>),
}

impl<S> SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a plaintext stream.
    pub const fn plain(stream: S) -> Self {
        Self::Plain(stream)
    }

    /// Runs the TLS handshake over a plaintext stream.
    pub async fn upgrade(self, server_name: &str, options: &TlsOptions) -> Result<Self> {
        match self {
            Self::Plain(stream) => {
                let connector = tls_connector(options);
                let name = ServerName::try_from(server_name.to_string())
                    .map_err(|_| Error::InvalidDnsName(server_name.to_string()))?;
                let tls = connector.connect(name, stream).await?;
                Ok(Self::Tls(Box::new(tls)))
            }
            Self::Tls(_) => Err(Error::InvalidState("stream is already TLS".to_string())),
        }
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl<S> std::fmt::Debug for SmtpStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SmtpStream::Plain"),
            Self::Tls(_) => f.write_str("SmtpStream::Tls"),
        }
    }
}

impl<S> AsyncRead for SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl<S> AsyncWrite for SmtpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Creates a TLS connector: web PKI roots, or no verification at all when
/// `accept_invalid_certs` is set.
pub fn tls_connector(options: &TlsOptions) -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if options.accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCert));
    }

    TlsConnector::from(Arc::new(config))
}

/// Certificate verifier for `--insecure`: diagnostic targets are often
/// self-signed.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// Resolves `host` and connects to the first address of `family` that
/// answers within `timeout`.
///
/// Addresses are tried in resolver order; the last failure is returned if
/// none connects.
pub async fn dial(
    host: &str,
    port: u16,
    family: IpFamily,
    timeout: Duration,
) -> Result<(TcpStream, SocketAddr)> {
    let addrs: Vec<SocketAddr> = tokio::time::timeout(timeout, lookup_host((host, port)))
        .await??
        .filter(|addr| family.accepts(addr))
        .collect();

    let mut last = Error::Dns(format!("no usable address for {host}"));
    for addr in addrs {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok((stream, addr)),
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "connect failed");
                last = e.into();
            }
            Err(_) => {
                tracing::debug!(%addr, "connect timed out");
                last = Error::Timeout;
            }
        }
    }
    Err(last)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn connectors_build() {
        let _ = tls_connector(&TlsOptions::default());
        let _ = tls_connector(&TlsOptions {
            server_name: None,
            accept_invalid_certs: true,
        });
    }

    #[test]
    fn plain_is_not_tls() {
        let (client, _server) = tokio::io::duplex(64);
        assert!(!SmtpStream::plain(client).is_tls());
    }

    #[tokio::test]
    async fn upgrade_rejects_bad_server_name() {
        let (client, _server) = tokio::io::duplex(64);
        let err = SmtpStream::plain(client)
            .upgrade("not a name!", &TlsOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDnsName(_)));
    }

    #[tokio::test]
    async fn dial_reaches_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (_stream, addr) = dial("127.0.0.1", port, IpFamily::V4, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(addr.port(), port);
    }

    #[tokio::test]
    async fn dial_filters_family() {
        let err = dial("127.0.0.1", 25, IpFamily::V6, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dns(_)));
    }
}
