//! HTTP tracker client with URL building and response parsing

use async_trait::async_trait;
use bencode_rs::Value;

use super::types::{
    AnnounceRequest, AnnounceResponse, TrackerClient, parse_compact_peers, parse_compact_peers6,
};
use crate::config::{NetworkConfig, ProxyEndpoint};
use crate::torrent::TorrentError;
use crate::torrent::bencode::parse_dictionary;

/// HTTP tracker client implementation
pub struct HttpTrackerClient {
    announce_url: String,
    client: reqwest::Client,
}

impl HttpTrackerClient {
    /// Creates HTTP tracker client.
    ///
    /// With a proxy every request goes through SOCKS5 and the tracker host
    /// name is resolved by the proxy.
    ///
    /// # Errors
    ///
    /// - `TorrentError::Http` - If the HTTP client or proxy cannot be configured
    pub fn new(
        announce_url: String,
        config: &NetworkConfig,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Self, TorrentError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.tracker_timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(3));

        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(format!("socks5h://{proxy}"))?);
        }

        Ok(Self {
            announce_url,
            client: builder.build()?,
        })
    }

    /// Build announce URL with query parameters
    ///
    /// Binary fields are percent-encoded by hand; `reqwest` query helpers
    /// would treat them as UTF-8 text.
    pub(super) fn build_announce_url(&self, request: &AnnounceRequest) -> String {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1&numwant={}",
            urlencoding::encode_binary(request.info_hash.as_bytes()),
            urlencoding::encode_binary(request.peer_id.as_bytes()),
            request.port,
            request.uploaded,
            request.downloaded,
            request.left,
            request.num_want,
        );
        if let Some(event) = request.event.as_http_param() {
            query.push_str("&event=");
            query.push_str(event);
        }

        let separator = if self.announce_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{query}", self.announce_url)
    }

    /// Parse tracker response from bencode data
    pub(super) fn parse_announce_response(
        response_bytes: &[u8],
    ) -> Result<AnnounceResponse, TorrentError> {
        let dict = parse_dictionary(response_bytes).map_err(|e| TorrentError::ProtocolError {
            message: format!("Failed to parse tracker response: {e}"),
        })?;

        if let Some(Value::Bytes(failure_reason)) = dict.get(b"failure reason".as_slice()) {
            return Err(TorrentError::ProtocolError {
                message: format!(
                    "Tracker refused announce: {}",
                    String::from_utf8_lossy(failure_reason)
                ),
            });
        }

        let integer = |key: &[u8]| match dict.get(key) {
            Some(Value::Integer(value)) => u32::try_from(*value).ok(),
            _ => None,
        };

        let mut peers = match dict.get(b"peers".as_slice()) {
            Some(Value::Bytes(peer_data)) => parse_compact_peers(peer_data)?,
            Some(Value::List(entries)) => parse_dictionary_peers(entries),
            _ => Vec::new(),
        };
        if let Some(Value::Bytes(peer_data)) = dict.get(b"peers6".as_slice()) {
            peers.extend(parse_compact_peers6(peer_data)?);
        }

        Ok(AnnounceResponse {
            interval: integer(b"interval").unwrap_or(1800),
            complete: integer(b"complete").unwrap_or(0),
            incomplete: integer(b"incomplete").unwrap_or(0),
            peers,
        })
    }
}

/// Non-compact peer list: dictionaries with `ip` and `port`.
fn parse_dictionary_peers(entries: &[Value<'_>]) -> Vec<std::net::SocketAddr> {
    entries
        .iter()
        .filter_map(|entry| {
            let Value::Dictionary(peer) = entry else {
                return None;
            };
            let ip = match peer.get(b"ip".as_slice()) {
                Some(Value::Bytes(ip)) => std::str::from_utf8(ip).ok()?.parse().ok()?,
                _ => return None,
            };
            let port = match peer.get(b"port".as_slice()) {
                Some(Value::Integer(port)) => u16::try_from(*port).ok()?,
                _ => return None,
            };
            Some(std::net::SocketAddr::new(ip, port))
        })
        .collect()
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn announce(&self, request: AnnounceRequest) -> Result<AnnounceResponse, TorrentError> {
        let url = self.build_announce_url(&request);
        tracing::debug!("Announcing to tracker: {}", self.announce_url);

        let failed = |reason: String| TorrentError::TrackerConnectionFailed {
            url: self.announce_url.clone(),
            reason,
        };

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                failed("request timed out".to_string())
            } else {
                failed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP status {status}")));
        }

        let response_bytes = response
            .bytes()
            .await
            .map_err(|e| failed(format!("Failed to read response body: {e}")))?;

        let parsed = Self::parse_announce_response(&response_bytes)
            .map_err(|e| failed(e.to_string()))?;
        tracing::debug!(
            "Announced to {}, received {} peers",
            self.announce_url,
            parsed.peers.len()
        );
        Ok(parsed)
    }

    fn tracker_url(&self) -> &str {
        &self.announce_url
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::torrent::InfoHash;
    use crate::torrent::protocol::PeerId;

    fn client(url: &str) -> HttpTrackerClient {
        HttpTrackerClient::new(url.to_string(), &NetworkConfig::default(), None).unwrap()
    }

    fn request() -> AnnounceRequest {
        let mut info_hash = [0u8; 20];
        info_hash[0] = 0x12;
        info_hash[1] = 0xfe;
        AnnounceRequest::started(InfoHash::new(info_hash), PeerId::new([b'a'; 20]), 6881)
    }

    #[test]
    fn test_build_announce_url() {
        let url = client("http://tracker.example/announce").build_announce_url(&request());

        assert!(url.starts_with("http://tracker.example/announce?info_hash=%12%FE%00"));
        assert!(url.contains("&peer_id=aaaaaaaaaaaaaaaaaaaa&"));
        assert!(url.contains("&port=6881&"));
        assert!(url.contains("&left=16384&"));
        assert!(url.contains("&compact=1"));
        assert!(url.ends_with("&event=started"));

        let regular = client("http://tracker.example/announce?key=abc")
            .build_announce_url(&request().regular());
        assert!(regular.starts_with("http://tracker.example/announce?key=abc&info_hash="));
        assert!(!regular.contains("event="));
    }

    #[test]
    fn test_parse_compact_response() {
        let body = b"d8:completei5e10:incompletei3e8:intervali900e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
        let response = HttpTrackerClient::parse_announce_response(body).unwrap();

        assert_eq!(response.interval, 900);
        assert_eq!(response.complete, 5);
        assert_eq!(response.incomplete, 3);
        assert_eq!(response.peers, vec!["127.0.0.1:6881".parse().unwrap()]);
    }

    #[test]
    fn test_parse_dictionary_peer_response() {
        let body = b"d8:intervali60e5:peersld2:ip8:10.0.0.24:porti51413eed2:ip3:bad4:porti1eeee";
        let response = HttpTrackerClient::parse_announce_response(body).unwrap();
        assert_eq!(response.peers, vec!["10.0.0.2:51413".parse().unwrap()]);
    }

    #[test]
    fn test_parse_failure_reason() {
        let body = b"d14:failure reason17:torrent not founde";
        let result = HttpTrackerClient::parse_announce_response(body);
        assert!(matches!(result, Err(TorrentError::ProtocolError { message }) if message.contains("torrent not found")));
    }

    #[tokio::test]
    async fn test_announce_against_local_tracker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let body = b"d8:intervali60e5:peers6:\x0a\x00\x00\x07\x00\x50e";
            let mut response =
                format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
            response.extend_from_slice(body);
            socket.write_all(&response).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        let tracker = client(&format!("http://{address}/announce"));
        let response = tracker.announce(request()).await.unwrap();
        assert_eq!(response.peers, vec!["10.0.0.7:80".parse().unwrap()]);
        assert_eq!(tracker.tracker_url(), format!("http://{address}/announce"));

        let seen = server.await.unwrap();
        assert!(seen.starts_with("GET /announce?info_hash=%12%FE"));
    }

    #[tokio::test]
    async fn test_announce_http_error_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .await;
        });

        let result = client(&format!("http://{address}/announce"))
            .announce(request())
            .await;
        assert!(matches!(
            result,
            Err(TorrentError::TrackerConnectionFailed { reason, .. }) if reason.contains("404")
        ));
    }
}
