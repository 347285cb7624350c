//! One-shot DNS exchanges over UDP, TCP and TLS, optionally tunneled
//! through a SOCKS5 proxy. A fresh connection is opened per query; an EOF
//! after a complete message is success by construction since reads are
//! exact-length.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;

use crate::dns::{Message, DEFAULT_UDP_PAYLOAD};
use crate::error::{ApexError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
    TcpTls,
}

impl FromStr for Transport {
    type Err = ApexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "udp" => Ok(Transport::Udp),
            "tcp" => Ok(Transport::Tcp),
            "tcp-tls" => Ok(Transport::TcpTls),
            other => Err(ApexError::Config(format!(
                "unknown upstream transport: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Udp => write!(f, "udp"),
            Transport::Tcp => write!(f, "tcp"),
            Transport::TcpTls => write!(f, "tcp-tls"),
        }
    }
}

static TLS_CONNECTOR: LazyLock<TlsConnector> = LazyLock::new(|| {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
});

/// Send `query` to `addr` and read exactly one response message.
///
/// A SOCKS5 proxy forces TCP semantics for the wire exchange regardless
/// of the nominal transport; TLS is still applied inside the tunnel for
/// `tcp-tls`.
pub async fn exchange(
    transport: Transport,
    addr: &str,
    tls_host: &str,
    proxy: Option<&str>,
    query: &Message,
    timeout: Duration,
) -> Result<Message> {
    let wire = query.pack()?;

    let fut = async {
        let raw = match (proxy, transport) {
            (Some(proxy), Transport::TcpTls) => {
                let stream = socks5_connect(proxy, addr).await?;
                let stream = tls_connect(stream, tls_host).await?;
                exchange_stream(stream, &wire).await?
            }
            (Some(proxy), _) => {
                let stream = socks5_connect(proxy, addr).await?;
                exchange_stream(stream, &wire).await?
            }
            (None, Transport::Udp) => exchange_udp(addr, &wire).await?,
            (None, Transport::Tcp) => {
                let stream = tcp_connect(addr).await?;
                exchange_stream(stream, &wire).await?
            }
            (None, Transport::TcpTls) => {
                let stream = tcp_connect(addr).await?;
                let stream = tls_connect(stream, tls_host).await?;
                exchange_stream(stream, &wire).await?
            }
        };
        Message::unpack(&raw).map_err(|e| ApexError::Upstream(e.to_string()))
    };

    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ApexError::Upstream(format!(
            "exchange with {} timed out",
            addr
        ))),
    }
}

async fn resolve(addr: &str) -> Result<std::net::SocketAddr> {
    lookup_host(addr)
        .await
        .map_err(|e| ApexError::Upstream(format!("resolve {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| ApexError::Upstream(format!("resolve {}: no address", addr)))
}

async fn exchange_udp(addr: &str, wire: &[u8]) -> Result<Vec<u8>> {
    let remote = resolve(addr).await?;
    let bind_addr = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|e| ApexError::Upstream(e.to_string()))?;
    socket
        .connect(remote)
        .await
        .map_err(|e| ApexError::Upstream(e.to_string()))?;
    socket
        .send(wire)
        .await
        .map_err(|e| ApexError::Upstream(e.to_string()))?;

    let mut buf = vec![0u8; DEFAULT_UDP_PAYLOAD as usize];
    let n = socket
        .recv(&mut buf)
        .await
        .map_err(|e| ApexError::Upstream(e.to_string()))?;
    buf.truncate(n);
    Ok(buf)
}

async fn tcp_connect(addr: &str) -> Result<TcpStream> {
    let remote = resolve(addr).await?;
    TcpStream::connect(remote)
        .await
        .map_err(|e| ApexError::Upstream(format!("dial {}: {}", addr, e)))
}

async fn socks5_connect(proxy: &str, target: &str) -> Result<Socks5Stream<TcpStream>> {
    Socks5Stream::connect(proxy, target)
        .await
        .map_err(|e| ApexError::Upstream(format!("socks5 dial via {}: {}", proxy, e)))
}

async fn tls_connect<S>(stream: S, host: &str) -> Result<tokio_rustls::client::TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|_| ApexError::Upstream(format!("invalid TLS server name: {}", host)))?;
    TLS_CONNECTOR
        .connect(server_name, stream)
        .await
        .map_err(|e| ApexError::Upstream(format!("TLS handshake with {}: {}", host, e)))
}

/// The two-byte length-prefixed exchange used by DNS over any stream.
async fn exchange_stream<S>(mut stream: S, wire: &[u8]) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let len = wire.len() as u16;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| ApexError::Upstream(e.to_string()))?;
    stream
        .write_all(wire)
        .await
        .map_err(|e| ApexError::Upstream(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| ApexError::Upstream(e.to_string()))?;

    let mut len_buf = [0u8; 2];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| ApexError::Upstream(e.to_string()))?;
    let response_len = u16::from_be_bytes(len_buf) as usize;

    let mut response = vec![0u8; response_len];
    stream
        .read_exact(&mut response)
        .await
        .map_err(|e| ApexError::Upstream(e.to_string()))?;
    Ok(response)
}
