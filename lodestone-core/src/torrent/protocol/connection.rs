//! Outbound peer connections and metadata extension negotiation

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::extension::{EXTENSION_HANDSHAKE_ID, ExtensionHandshake};
use super::handshake::exchange_handshake;
use super::messages::{read_message, write_message};
use super::proxy::socks5_connect;
use super::types::{PeerAddress, PeerHandshake, PeerMessage};
use crate::config::ProxyEndpoint;
use crate::torrent::TorrentError;

/// Opens TCP connections to peers, directly or through a SOCKS5 proxy.
#[derive(Debug, Clone)]
pub struct PeerConnector {
    proxy: Option<ProxyEndpoint>,
    connect_timeout: Duration,
}

impl PeerConnector {
    pub fn new(proxy: Option<ProxyEndpoint>, connect_timeout: Duration) -> Self {
        Self {
            proxy,
            connect_timeout,
        }
    }

    pub fn is_proxied(&self) -> bool {
        self.proxy.is_some()
    }

    /// Connects to `address` within the connect timeout.
    ///
    /// Through a proxy, host names are resolved by the proxy; otherwise they
    /// are looked up locally.
    ///
    /// # Errors
    ///
    /// - `TorrentError::PeerConnectionError` - If the connection fails or times out
    /// - `TorrentError::ProxyError` - If the proxy refuses the connection
    pub async fn connect(&self, address: &PeerAddress) -> Result<TcpStream, TorrentError> {
        let attempt = async {
            let direct = match (&self.proxy, address) {
                (Some(proxy), _) => return socks5_connect(proxy, address).await,
                (None, PeerAddress::Socket(socket)) => TcpStream::connect(*socket).await,
                (None, PeerAddress::Host(host, port)) => {
                    TcpStream::connect((host.as_str(), *port)).await
                }
            };
            direct.map_err(|e| TorrentError::PeerConnectionError {
                reason: format!("Failed to connect to {address}: {e}"),
            })
        };

        let stream = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| TorrentError::PeerConnectionError {
                reason: format!(
                    "Connection to {address} timed out after {:?}",
                    self.connect_timeout
                ),
            })??;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!("Failed to set TCP_NODELAY for {}: {}", address, e);
        }
        Ok(stream)
    }
}

/// Peer that completed both handshakes and offers `ut_metadata`.
#[derive(Debug)]
pub struct MetadataPeer<S> {
    pub stream: S,
    pub handshake: PeerHandshake,
    pub extension: ExtensionHandshake,
}

impl<S> MetadataPeer<S> {
    /// Extended message id the peer expects for `ut_metadata` messages.
    pub fn ut_metadata_id(&self) -> Option<u8> {
        self.extension.ut_metadata
    }

    /// Size the peer announced for the info dictionary.
    pub fn metadata_size(&self) -> Option<i64> {
        self.extension.metadata_size
    }
}

/// Runs the BEP 3 and BEP 10 handshakes on a fresh connection.
///
/// Waits up to `read_timeout` per message for the peer's extension
/// handshake, skipping unrelated messages such as bitfields. The peer must
/// announce both a `ut_metadata` id and a `metadata_size`.
///
/// # Errors
///
/// - `TorrentError::ProtocolError` - If a handshake is invalid or the peer cannot serve metadata
/// - `TorrentError::PeerConnectionError` - If the stream fails or goes idle
pub async fn negotiate_metadata_extension<S>(
    mut stream: S,
    ours: &PeerHandshake,
    local_extension: &ExtensionHandshake,
    read_timeout: Duration,
    max_frame_len: usize,
) -> Result<MetadataPeer<S>, TorrentError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = tokio::time::timeout(read_timeout, exchange_handshake(&mut stream, ours))
        .await
        .map_err(|_| TorrentError::PeerConnectionError {
            reason: "Handshake timed out".to_string(),
        })??;

    write_message(
        &mut stream,
        &PeerMessage::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            payload: local_extension.encode(),
        },
    )
    .await?;

    loop {
        let message = tokio::time::timeout(read_timeout, read_message(&mut stream, max_frame_len))
            .await
            .map_err(|_| TorrentError::PeerConnectionError {
                reason: "Timed out waiting for extension handshake".to_string(),
            })??;

        let PeerMessage::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            payload,
        } = message
        else {
            continue;
        };

        let extension = ExtensionHandshake::decode(&payload)?;
        if extension.ut_metadata.is_none() {
            return Err(TorrentError::ProtocolError {
                message: "Peer does not offer ut_metadata".to_string(),
            });
        }
        if extension.metadata_size.is_none() {
            return Err(TorrentError::ProtocolError {
                message: "Peer did not announce metadata_size".to_string(),
            });
        }

        return Ok(MetadataPeer {
            stream,
            handshake,
            extension,
        });
    }
}
