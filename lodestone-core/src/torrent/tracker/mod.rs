//! BitTorrent tracker clients.
//!
//! HTTP trackers (BEP 3, compact peer lists) and UDP trackers (BEP 15)
//! behind one async trait.

pub mod http;
pub mod types;
pub mod udp;

use std::sync::Arc;

// Re-export public API
pub use http::HttpTrackerClient;
pub use types::{AnnounceEvent, AnnounceRequest, AnnounceResponse, TrackerClient};
pub use udp::UdpTrackerClient;

use crate::config::{NetworkConfig, ProxyEndpoint};
use crate::torrent::TorrentError;

/// Checks whether a tracker URL uses the UDP tracker protocol.
pub fn is_udp_tracker(url: &str) -> bool {
    url.get(..6)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("udp://"))
}

/// Orders trackers for announcing.
///
/// With `prefer_udp` the UDP trackers come first; otherwise, and within
/// each group, the original order is kept. Duplicates are dropped since
/// announcing twice to one tracker yields nothing new.
pub fn announce_order(trackers: &[String], prefer_udp: bool) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(trackers.len());
    for tracker in trackers {
        if !ordered.contains(tracker) {
            ordered.push(tracker.clone());
        }
    }
    if prefer_udp {
        // Stable sort keeps descriptor order inside each group
        ordered.sort_by_key(|tracker| !is_udp_tracker(tracker));
    }
    ordered
}

/// Creates the client for one tracker URL.
///
/// # Errors
///
/// - `TorrentError::TrackerConnectionFailed` - If the scheme is unsupported or the URL unusable
/// - `TorrentError::Http` - If the HTTP client cannot be configured
pub fn tracker_for_url(
    url: &str,
    config: &NetworkConfig,
    proxy: Option<&ProxyEndpoint>,
) -> Result<Arc<dyn TrackerClient>, TorrentError> {
    if is_udp_tracker(url) {
        if proxy.is_some() {
            return Err(TorrentError::TrackerConnectionFailed {
                url: url.to_string(),
                reason: "UDP trackers cannot be reached through the proxy".to_string(),
            });
        }
        return Ok(Arc::new(UdpTrackerClient::new(
            url.to_string(),
            config.tracker_timeout,
        )?));
    }

    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(Arc::new(HttpTrackerClient::new(
            url.to_string(),
            config,
            proxy,
        )?));
    }

    Err(TorrentError::TrackerConnectionFailed {
        url: url.to_string(),
        reason: "unsupported tracker scheme".to_string(),
    })
}
