// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Auxiliary Probe Layer
 * TCP/UDP clients with optional TLS and SOCKS5 tunneling, used by
 * non-HTTP fingerprint rules
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::errors::NetworkError;

pub const DEFAULT_READ_SIZE: usize = 2048;
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

/// Probe configuration taken from the rule's `request` block.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub transport: Transport,
    pub read_size: usize,
    pub read_timeout: Duration,
    pub dial_timeout: Duration,
    pub write_timeout: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub proxy: String,
    pub use_tls: bool,
    /// SNI for TLS probes, taken from the hostname.
    pub server_name: String,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Tcp,
            read_size: DEFAULT_READ_SIZE,
            read_timeout: DEFAULT_IO_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            write_timeout: DEFAULT_IO_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            proxy: String::new(),
            use_tls: false,
            server_name: String::new(),
        }
    }
}

/// Parsed `host` field of a tcp/udp rule: address with port, plus
/// whether a `tls://` prefix asked for a wrapped connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAddress {
    pub address: String,
    pub host: String,
    pub use_tls: bool,
}

/// Normalise a probe address, defaulting ports by scheme prefix.
pub fn parse_address(input: &str) -> Result<ProbeAddress, NetworkError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(NetworkError::Protocol {
            url: input.to_string(),
            reason: "empty probe address".to_string(),
        });
    }

    let (rest, mut use_tls, default_port) = if let Some(r) = trimmed.strip_prefix("tls://") {
        (r, true, 443)
    } else if let Some(r) = trimmed.strip_prefix("https://") {
        (r, true, 443)
    } else if let Some(r) = trimmed.strip_prefix("http://") {
        (r, false, 80)
    } else {
        (trimmed, false, 80)
    };

    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
            (h.to_string(), p.parse::<u16>().unwrap_or(default_port))
        }
        _ => (rest.to_string(), default_port),
    };
    use_tls = use_tls || port == 443;

    Ok(ProbeAddress {
        address: format!("{}:{}", host, port),
        host,
        use_tls,
    })
}

enum Conn {
    Tcp(TcpStream),
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
    Udp(UdpSocket),
}

/// One probe connection. Send/receive retry on timeouts by re-dialing,
/// up to `max_retries` with `retry_delay` between attempts.
pub struct SocketClient {
    pub address: String,
    conf: SocketConfig,
    conn: Conn,
}

impl SocketClient {
    pub async fn connect(address: &str, conf: SocketConfig) -> Result<Self, NetworkError> {
        let conn = dial(address, &conf).await?;
        Ok(Self {
            address: address.to_string(),
            conf,
            conn,
        })
    }

    pub async fn send(&mut self, data: &[u8]) -> Result<(), NetworkError> {
        match write_with_timeout(&mut self.conn, data, self.conf.write_timeout).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() => self.retry_write(data, e).await,
            Err(e) => Err(e),
        }
    }

    pub async fn receive(&mut self) -> Result<Vec<u8>, NetworkError> {
        match read_with_timeout(&mut self.conn, self.conf.read_size, self.conf.read_timeout).await {
            Ok(buf) => Ok(buf),
            Err(e) if e.is_retryable() => self.retry_read(e).await,
            Err(e) => Err(e),
        }
    }

    async fn retry_write(&mut self, data: &[u8], last: NetworkError) -> Result<(), NetworkError> {
        let mut last = last;
        for attempt in 0..self.conf.max_retries {
            tokio::time::sleep(self.conf.retry_delay).await;
            debug!("re-dialing {} for write (attempt {})", self.address, attempt + 1);
            match dial(&self.address, &self.conf).await {
                Ok(conn) => {
                    self.conn = conn;
                    match write_with_timeout(&mut self.conn, data, self.conf.write_timeout).await {
                        Ok(()) => return Ok(()),
                        Err(e) => last = e,
                    }
                }
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    async fn retry_read(&mut self, last: NetworkError) -> Result<Vec<u8>, NetworkError> {
        let mut last = last;
        for attempt in 0..self.conf.max_retries {
            tokio::time::sleep(self.conf.retry_delay).await;
            debug!("re-dialing {} for read (attempt {})", self.address, attempt + 1);
            match dial(&self.address, &self.conf).await {
                Ok(conn) => {
                    self.conn = conn;
                    match read_with_timeout(&mut self.conn, self.conf.read_size, self.conf.read_timeout)
                        .await
                    {
                        Ok(buf) => return Ok(buf),
                        Err(e) => last = e,
                    }
                }
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}

async fn dial(address: &str, conf: &SocketConfig) -> Result<Conn, NetworkError> {
    match conf.transport {
        Transport::Udp => {
            let socket = UdpSocket::bind("0.0.0.0:0")
                .await
                .map_err(|e| connect_err(address, &e.to_string()))?;
            socket
                .connect(address)
                .await
                .map_err(|e| connect_err(address, &e.to_string()))?;
            Ok(Conn::Udp(socket))
        }
        Transport::Tcp => {
            let stream = match timeout(conf.dial_timeout, tcp_connect(address, conf)).await {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(NetworkError::Timeout {
                        url: address.to_string(),
                        timeout: conf.dial_timeout,
                    })
                }
            };
            if conf.use_tls {
                let connector = native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .build()
                    .map_err(|e| NetworkError::Tls {
                        host: address.to_string(),
                        reason: e.to_string(),
                    })?;
                let connector = tokio_native_tls::TlsConnector::from(connector);
                let sni = if conf.server_name.is_empty() {
                    address.split(':').next().unwrap_or(address)
                } else {
                    &conf.server_name
                };
                let tls = connector
                    .connect(sni, stream)
                    .await
                    .map_err(|e| NetworkError::Tls {
                        host: address.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Conn::Tls(Box::new(tls)))
            } else {
                Ok(Conn::Tcp(stream))
            }
        }
    }
}

/// Plain connect, or tunneled through a SOCKS5 proxy when one is set.
async fn tcp_connect(address: &str, conf: &SocketConfig) -> Result<TcpStream, NetworkError> {
    if conf.proxy.is_empty() {
        return TcpStream::connect(address)
            .await
            .map_err(|e| connect_err(address, &e.to_string()));
    }
    socks5_connect(&conf.proxy, address).await
}

/// Minimal SOCKS5 CONNECT (no-auth and user/password) for tunneling raw
/// probes. Domain addressing is used so the proxy resolves names.
async fn socks5_connect(proxy: &str, target: &str) -> Result<TcpStream, NetworkError> {
    let proxy_url = url::Url::parse(proxy).map_err(|e| NetworkError::Protocol {
        url: proxy.to_string(),
        reason: format!("invalid proxy: {}", e),
    })?;
    if proxy_url.scheme() != "socks5" {
        return Err(NetworkError::Protocol {
            url: proxy.to_string(),
            reason: format!("unsupported proxy scheme {:?} for raw probes", proxy_url.scheme()),
        });
    }
    let proxy_addr = format!(
        "{}:{}",
        proxy_url.host_str().unwrap_or_default(),
        proxy_url.port().unwrap_or(1080)
    );
    let mut stream = TcpStream::connect(&proxy_addr)
        .await
        .map_err(|e| connect_err(&proxy_addr, &e.to_string()))?;

    let has_auth = !proxy_url.username().is_empty();
    let greeting: &[u8] = if has_auth {
        &[0x05, 0x02, 0x00, 0x02]
    } else {
        &[0x05, 0x01, 0x00]
    };
    stream
        .write_all(greeting)
        .await
        .map_err(|e| connect_err(&proxy_addr, &e.to_string()))?;
    let mut reply = [0u8; 2];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| connect_err(&proxy_addr, &e.to_string()))?;

    if reply[1] == 0x02 {
        let user = proxy_url.username().as_bytes();
        let pass = proxy_url.password().unwrap_or_default().as_bytes();
        let mut auth = vec![0x01, user.len() as u8];
        auth.extend_from_slice(user);
        auth.push(pass.len() as u8);
        auth.extend_from_slice(pass);
        stream
            .write_all(&auth)
            .await
            .map_err(|e| connect_err(&proxy_addr, &e.to_string()))?;
        let mut auth_reply = [0u8; 2];
        stream
            .read_exact(&mut auth_reply)
            .await
            .map_err(|e| connect_err(&proxy_addr, &e.to_string()))?;
        if auth_reply[1] != 0x00 {
            return Err(connect_err(&proxy_addr, "socks5 authentication rejected"));
        }
    } else if reply[1] != 0x00 {
        return Err(connect_err(&proxy_addr, "socks5 method negotiation failed"));
    }

    let (host, port) = target.rsplit_once(':').ok_or_else(|| NetworkError::Protocol {
        url: target.to_string(),
        reason: "probe address missing port".to_string(),
    })?;
    let port: u16 = port.parse().map_err(|_| NetworkError::Protocol {
        url: target.to_string(),
        reason: "bad probe port".to_string(),
    })?;

    let mut request = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream
        .write_all(&request)
        .await
        .map_err(|e| connect_err(&proxy_addr, &e.to_string()))?;

    let mut head = [0u8; 4];
    stream
        .read_exact(&mut head)
        .await
        .map_err(|e| connect_err(&proxy_addr, &e.to_string()))?;
    if head[1] != 0x00 {
        return Err(connect_err(
            target,
            &format!("socks5 connect rejected (code {})", head[1]),
        ));
    }
    // Drain the bound address the proxy reports.
    let addr_len = match head[3] {
        0x01 => 4,
        0x03 => {
            let mut l = [0u8; 1];
            stream
                .read_exact(&mut l)
                .await
                .map_err(|e| connect_err(&proxy_addr, &e.to_string()))?;
            l[0] as usize
        }
        0x04 => 16,
        _ => return Err(connect_err(&proxy_addr, "bad socks5 address type")),
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream
        .read_exact(&mut rest)
        .await
        .map_err(|e| connect_err(&proxy_addr, &e.to_string()))?;

    Ok(stream)
}

fn connect_err(address: &str, reason: &str) -> NetworkError {
    NetworkError::Connect {
        url: address.to_string(),
        reason: reason.to_string(),
    }
}

async fn write_with_timeout(
    conn: &mut Conn,
    data: &[u8],
    d: Duration,
) -> Result<(), NetworkError> {
    let fut = async {
        match conn {
            Conn::Tcp(s) => s.write_all(data).await,
            Conn::Tls(s) => s.write_all(data).await,
            Conn::Udp(s) => s.send(data).await.map(|_| ()),
        }
    };
    match timeout(d, fut).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(NetworkError::Connect {
            url: "probe".to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(NetworkError::Timeout {
            url: "probe".to_string(),
            timeout: d,
        }),
    }
}

async fn read_with_timeout(
    conn: &mut Conn,
    size: usize,
    d: Duration,
) -> Result<Vec<u8>, NetworkError> {
    let size = if size == 0 { DEFAULT_READ_SIZE } else { size };
    let mut buf = vec![0u8; size];
    let fut = async {
        match conn {
            Conn::Tcp(s) => s.read(&mut buf).await,
            Conn::Tls(s) => s.read(&mut buf).await,
            Conn::Udp(s) => s.recv(&mut buf).await,
        }
    };
    match timeout(d, fut).await {
        Ok(Ok(n)) => {
            buf.truncate(n);
            Ok(buf)
        }
        Ok(Err(e)) => Err(NetworkError::Connect {
            url: "probe".to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(NetworkError::Timeout {
            url: "probe".to_string(),
            timeout: d,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_defaults() {
        let a = parse_address("example.com").unwrap();
        assert_eq!(a.address, "example.com:80");
        assert!(!a.use_tls);

        let a = parse_address("example.com:6379").unwrap();
        assert_eq!(a.address, "example.com:6379");

        let a = parse_address("tls://example.com:8883").unwrap();
        assert_eq!(a.address, "example.com:8883");
        assert!(a.use_tls);

        let a = parse_address("https://example.com/").unwrap();
        assert_eq!(a.address, "example.com:443");
        assert!(a.use_tls);
    }

    #[test]
    fn test_parse_address_rejects_empty() {
        assert!(parse_address("  ").is_err());
    }

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(&buf[..n]).await.unwrap();
        });

        let conf = SocketConfig {
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            max_retries: 0,
            ..Default::default()
        };
        let mut client = SocketClient::connect(&addr.to_string(), conf).await.unwrap();
        client.send(b"PING\r\n").await.unwrap();
        let got = client.receive().await.unwrap();
        assert_eq!(got, b"PING\r\n");
    }

    #[tokio::test]
    async fn test_udp_roundtrip() {
        let server = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&buf[..n], peer).await.unwrap();
        });

        let conf = SocketConfig {
            transport: Transport::Udp,
            read_timeout: Duration::from_secs(2),
            max_retries: 0,
            ..Default::default()
        };
        let mut client = SocketClient::connect(&addr.to_string(), conf).await.unwrap();
        client.send(b"probe").await.unwrap();
        let got = client.receive().await.unwrap();
        assert_eq!(got, b"probe");
    }
}
