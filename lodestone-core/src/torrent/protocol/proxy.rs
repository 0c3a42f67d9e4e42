//! SOCKS5 CONNECT (RFC 1928, no authentication)

use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::types::PeerAddress;
use crate::config::ProxyEndpoint;
use crate::torrent::TorrentError;

const SOCKS_VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Opens a TCP connection to `target` through the SOCKS5 proxy at `proxy`.
///
/// Host names are sent as-is and resolved by the proxy.
///
/// # Errors
///
/// - `TorrentError::ProxyError` - If the proxy is unreachable or refuses the request
pub async fn socks5_connect(
    proxy: &ProxyEndpoint,
    target: &PeerAddress,
) -> Result<TcpStream, TorrentError> {
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
        .await
        .map_err(|e| TorrentError::ProxyError {
            reason: format!("connect to proxy {proxy}: {e}"),
        })?;

    socks5_handshake(&mut stream, target).await?;
    Ok(stream)
}

/// Runs the SOCKS5 greeting and CONNECT request over an open stream.
///
/// # Errors
///
/// - `TorrentError::ProxyError` - On I/O failure or a non-success reply
pub async fn socks5_handshake<S>(stream: &mut S, target: &PeerAddress) -> Result<(), TorrentError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let proxy_error = |step: &str, e: std::io::Error| TorrentError::ProxyError {
        reason: format!("socks5 {step}: {e}"),
    };

    stream
        .write_all(&[SOCKS_VERSION, 0x01, NO_AUTH])
        .await
        .map_err(|e| proxy_error("greeting", e))?;

    let mut auth_reply = [0u8; 2];
    stream
        .read_exact(&mut auth_reply)
        .await
        .map_err(|e| proxy_error("auth reply", e))?;
    if auth_reply != [SOCKS_VERSION, NO_AUTH] {
        return Err(TorrentError::ProxyError {
            reason: "socks5 proxy requires unsupported authentication".to_string(),
        });
    }

    stream
        .write_all(&connect_request(target)?)
        .await
        .map_err(|e| proxy_error("connect request", e))?;

    let mut reply = [0u8; 4];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| proxy_error("connect reply", e))?;
    if reply[0] != SOCKS_VERSION {
        return Err(TorrentError::ProxyError {
            reason: format!("socks5 reply with version {}", reply[0]),
        });
    }
    if reply[1] != 0x00 {
        return Err(TorrentError::ProxyError {
            reason: format!("socks5 connect to {target} failed: status {}", reply[1]),
        });
    }

    // Bound address is unused; drain it so the stream starts at peer data
    let bound_len = match reply[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .map_err(|e| proxy_error("bound address", e))?;
            len[0] as usize
        }
        other => {
            return Err(TorrentError::ProxyError {
                reason: format!("socks5 reply with address type {other}"),
            });
        }
    };
    let mut bound = vec![0u8; bound_len + 2];
    stream
        .read_exact(&mut bound)
        .await
        .map_err(|e| proxy_error("bound address", e))?;

    Ok(())
}

fn connect_request(target: &PeerAddress) -> Result<Vec<u8>, TorrentError> {
    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00];
    let port = match target {
        PeerAddress::Socket(addr) => {
            match addr.ip() {
                IpAddr::V4(ip) => {
                    request.push(ATYP_IPV4);
                    request.extend_from_slice(&ip.octets());
                }
                IpAddr::V6(ip) => {
                    request.push(ATYP_IPV6);
                    request.extend_from_slice(&ip.octets());
                }
            }
            addr.port()
        }
        PeerAddress::Host(host, port) => {
            let len = u8::try_from(host.len())
                .ok()
                .filter(|&len| len > 0)
                .ok_or_else(|| TorrentError::ProxyError {
                    reason: format!("host name not usable with socks5: {host}"),
                })?;
            request.push(ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(host.as_bytes());
            *port
        }
    };
    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}
