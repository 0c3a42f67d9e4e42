//! UDP tracker client (BEP 15)

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut};
use tokio::net::UdpSocket;
use url::Url;

use super::types::{AnnounceRequest, AnnounceResponse, TrackerClient, parse_compact_peers};
use crate::torrent::TorrentError;

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;
const CONNECT_RESPONSE_LEN: usize = 16;
const ANNOUNCE_HEADER_LEN: usize = 20;
const MAX_DATAGRAM: usize = 2048;

/// UDP tracker client.
///
/// Each announce runs a fresh connect/announce exchange; connection ids
/// are not cached since a resolution announces only a handful of times.
pub struct UdpTrackerClient {
    announce_url: String,
    host: String,
    port: u16,
    timeout: Duration,
}

impl UdpTrackerClient {
    /// Creates client for a `udp://host:port[/path]` URL.
    ///
    /// # Errors
    ///
    /// - `TorrentError::UrlParsing` - If the URL cannot be parsed
    /// - `TorrentError::TrackerConnectionFailed` - If the URL lacks a host or port
    pub fn new(announce_url: String, timeout: Duration) -> Result<Self, TorrentError> {
        let url = Url::parse(&announce_url)?;
        let invalid = |reason: &str| TorrentError::TrackerConnectionFailed {
            url: announce_url.clone(),
            reason: reason.to_string(),
        };

        if url.scheme() != "udp" {
            return Err(invalid("not a udp:// tracker"));
        }
        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url.port().ok_or_else(|| invalid("missing port"))?;

        Ok(Self {
            announce_url,
            host,
            port,
            timeout,
        })
    }

    async fn exchange(
        &self,
        socket: &UdpSocket,
        request: &[u8],
        expected_action: u32,
        transaction_id: u32,
        min_len: usize,
    ) -> Result<Vec<u8>, TorrentError> {
        socket.send(request).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let n = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
                .await
                .map_err(|_| self.failed("no response from tracker"))??;

            if n < 8 {
                continue;
            }
            let mut header = &buf[..8];
            let action = header.get_u32();
            let received_tx = header.get_u32();
            if received_tx != transaction_id {
                tracing::trace!("Ignoring stale datagram from {}", self.announce_url);
                continue;
            }

            if action == ACTION_ERROR {
                let message = String::from_utf8_lossy(&buf[8..n]).into_owned();
                return Err(self.failed(&format!("tracker error: {message}")));
            }
            if action != expected_action || n < min_len {
                return Err(self.failed(&format!("unexpected response (action {action}, {n} bytes)")));
            }

            buf.truncate(n);
            return Ok(buf);
        }
    }

    fn failed(&self, reason: &str) -> TorrentError {
        TorrentError::TrackerConnectionFailed {
            url: self.announce_url.clone(),
            reason: reason.to_string(),
        }
    }

    async fn resolve(&self) -> Result<SocketAddr, TorrentError> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| self.failed("host name did not resolve"))
    }
}

#[async_trait]
impl TrackerClient for UdpTrackerClient {
    async fn announce(&self, request: AnnounceRequest) -> Result<AnnounceResponse, TorrentError> {
        let address = self.resolve().await?;
        let bind: SocketAddr = if address.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(address).await?;
        tracing::debug!("Announcing to UDP tracker {} ({})", self.announce_url, address);

        let connect_tx: u32 = rand::random();
        let mut connect = Vec::with_capacity(16);
        connect.put_u64(PROTOCOL_ID);
        connect.put_u32(ACTION_CONNECT);
        connect.put_u32(connect_tx);
        let reply = self
            .exchange(&socket, &connect, ACTION_CONNECT, connect_tx, CONNECT_RESPONSE_LEN)
            .await?;
        let connection_id = (&reply[8..16]).get_u64();

        let announce_tx: u32 = rand::random();
        let mut announce = Vec::with_capacity(98);
        announce.put_u64(connection_id);
        announce.put_u32(ACTION_ANNOUNCE);
        announce.put_u32(announce_tx);
        announce.put_slice(request.info_hash.as_bytes());
        announce.put_slice(request.peer_id.as_bytes());
        announce.put_u64(request.downloaded);
        announce.put_u64(request.left);
        announce.put_u64(request.uploaded);
        announce.put_u32(request.event.as_udp_code());
        announce.put_u32(0); // IP address: sender's
        announce.put_u32(rand::random()); // key
        announce.put_u32(request.num_want);
        announce.put_u16(request.port);

        let reply = self
            .exchange(&socket, &announce, ACTION_ANNOUNCE, announce_tx, ANNOUNCE_HEADER_LEN)
            .await?;

        let mut header = &reply[8..ANNOUNCE_HEADER_LEN];
        let interval = header.get_u32();
        let incomplete = header.get_u32();
        let complete = header.get_u32();
        let peers = parse_compact_peers(&reply[ANNOUNCE_HEADER_LEN..])
            .map_err(|e| self.failed(&e.to_string()))?;

        tracing::debug!(
            "Announced to {}, received {} peers",
            self.announce_url,
            peers.len()
        );
        Ok(AnnounceResponse {
            interval,
            complete,
            incomplete,
            peers,
        })
    }

    fn tracker_url(&self) -> &str {
        &self.announce_url
    }
}
