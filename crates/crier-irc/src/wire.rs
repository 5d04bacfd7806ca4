//! Line-oriented transport abstraction over the TLS-wrapped TCP stream.
//!
//! The session logic only sees `\r\n`-terminated lines, so the handshake and
//! listen loop can be exercised against scripted transports in tests.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Inbound half of a connection. `Ok(None)` means the peer closed it.
#[async_trait::async_trait]
pub trait WireReader: Send {
    async fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Outbound half of a connection; `write_line` appends the `\r\n` itself.
#[async_trait::async_trait]
pub trait WireWriter: Send {
    async fn write_line(&mut self, line: &str) -> io::Result<()>;
}

/// Produces fresh connections; called once per connect attempt so the
/// reconnect loop always starts from a clean transport.
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<(Box<dyn WireReader>, Box<dyn WireWriter>)>;
}

struct TlsReader {
    inner: BufReader<ReadHalf<TlsStream<TcpStream>>>,
}

#[async_trait::async_trait]
impl WireReader for TlsReader {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let read = self.inner.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

struct TlsWriter {
    inner: WriteHalf<TlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl WireWriter for TlsWriter {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\r\n").await?;
        self.inner.flush().await
    }
}

/// Dials the configured IRC server over TLS with webpki roots.
pub struct TlsDialer {
    host: String,
    port: u16,
    connector: TlsConnector,
}

impl TlsDialer {
    pub fn new(host: String, port: u16) -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            host,
            port,
            connector: TlsConnector::from(Arc::new(config)),
        }
    }
}

#[async_trait::async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self) -> Result<(Box<dyn WireReader>, Box<dyn WireWriter>)> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("failed to connect to {}:{}", self.host, self.port))?;
        let server_name = ServerName::try_from(self.host.clone())
            .with_context(|| format!("invalid TLS server name '{}'", self.host))?;
        let stream = self
            .connector
            .connect(server_name, tcp)
            .await
            .with_context(|| format!("TLS handshake with {} failed", self.host))?;

        let (read_half, write_half) = tokio::io::split(stream);
        Ok((
            Box::new(TlsReader {
                inner: BufReader::new(read_half),
            }),
            Box::new(TlsWriter { inner: write_half }),
        ))
    }
}
