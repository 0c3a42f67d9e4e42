//! Networked session implementation

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::driver::SwarmDriver;
use super::{AddTorrentParams, Session, SessionEvent, TorrentHandle, TorrentStatus};
use crate::config::{NetworkConfig, SessionConfig};
use crate::torrent::{TorrentError, TorrentInfoDict};

/// Session that joins real swarms over TCP.
///
/// Resolves one torrent per session. Submitting spawns a driver task on the
/// current tokio runtime; everything it learns arrives through the event
/// queue drained by [`Session::poll_events`].
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() {
/// use lodestone_core::session::{AddTorrentParams, Session, SwarmSession};
/// use lodestone_core::{MagnetDescriptor, SessionConfig};
///
/// let descriptor = MagnetDescriptor::parse(
///     "magnet:?xt=urn:btih:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA&tr=udp://tracker.example:80",
/// )
/// .unwrap();
/// let mut session = SwarmSession::open(SessionConfig::default());
/// let handle = session.submit(AddTorrentParams::metadata_only(descriptor));
/// let events = session.poll_events();
/// # let _ = (handle, events);
/// # }
/// ```
pub struct SwarmSession {
    config: SessionConfig,
    network: NetworkConfig,
    event_sender: mpsc::UnboundedSender<SessionEvent>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    driver: Option<JoinHandle<()>>,
    torrent: Option<TorrentHandle>,
    next_handle: u64,
    info: Option<TorrentInfoDict>,
    connected_peers: usize,
    closed: bool,
}

impl SwarmSession {
    /// Opens a session with default network settings.
    pub fn open(config: SessionConfig) -> Self {
        Self::with_network(config, NetworkConfig::default())
    }

    pub fn with_network(config: SessionConfig, network: NetworkConfig) -> Self {
        tracing::debug!(
            "Opening swarm session: transport {:?}, anonymous {}, proxy {:?}",
            config.transport_mode,
            config.anonymous,
            config.effective_proxy().map(|proxy| proxy.to_string())
        );
        let (event_sender, events) = mpsc::unbounded_channel();
        Self {
            config,
            network,
            event_sender,
            events,
            driver: None,
            torrent: None,
            next_handle: 0,
            info: None,
            connected_peers: 0,
            closed: false,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_sender.send(event);
    }

    fn refuse(&self, handle: TorrentHandle, reason: &str) {
        tracing::debug!("Refusing torrent {}: {}", handle, reason);
        self.emit(SessionEvent::TorrentError {
            detail: reason.to_string(),
        });
    }

    fn note_unsupported_discovery(&self) {
        let requested = [
            (self.config.dht_enabled(), "DHT"),
            (self.config.lsd_enabled(), "local service discovery"),
            (self.config.upnp_natpmp_enabled(), "UPnP/NAT-PMP"),
        ];
        for (_, feature) in requested.iter().filter(|(enabled, _)| *enabled) {
            self.emit(SessionEvent::Notice {
                message: format!("{feature} is not available, using trackers and peer hints"),
            });
        }
        if self.config.enable_outgoing_utp() {
            tracing::debug!("uTP is not available, peers are reached over TCP");
        }
    }
}

impl Session for SwarmSession {
    fn submit(&mut self, params: AddTorrentParams) -> TorrentHandle {
        self.next_handle += 1;
        let handle = TorrentHandle::new(self.next_handle);

        if self.closed {
            self.refuse(handle, "session is closed");
            return handle;
        }
        if !params.metadata_only {
            self.refuse(handle, "only metadata-only torrents are supported");
            return handle;
        }
        if self.torrent.is_some() {
            self.refuse(handle, "session already resolves a torrent");
            return handle;
        }

        self.torrent = Some(handle);
        self.note_unsupported_discovery();

        if !self.config.enable_outgoing_tcp() {
            let error = TorrentError::NoUsableTransport {
                reason: "TCP is disabled and uTP is not available".to_string(),
            };
            self.refuse(handle, &error.to_string());
            return handle;
        }

        tracing::info!("Joining swarm for {}", params.descriptor.info_hash);
        let driver = SwarmDriver::new(
            params.descriptor,
            &self.config,
            self.network.clone(),
            self.event_sender.clone(),
        );
        self.driver = Some(tokio::spawn(driver.run()));
        handle
    }

    fn poll_events(&mut self) -> Vec<SessionEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            match &event {
                SessionEvent::MetadataReceived { info } => self.info = Some(info.clone()),
                SessionEvent::PeerConnected { .. } => self.connected_peers += 1,
                SessionEvent::PeerDisconnected { .. } => {
                    self.connected_peers = self.connected_peers.saturating_sub(1);
                }
                _ => {}
            }
            drained.push(event);
        }
        drained
    }

    fn status(&self, handle: TorrentHandle) -> TorrentStatus {
        if self.torrent != Some(handle) {
            return TorrentStatus::default();
        }
        TorrentStatus {
            has_metadata: self.info.is_some(),
            connected_peers: self.connected_peers,
        }
    }

    fn torrent_info(&self, handle: TorrentHandle) -> Option<TorrentInfoDict> {
        if self.torrent != Some(handle) {
            return None;
        }
        self.info.clone()
    }

    fn pause(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
            tracing::debug!("Swarm session paused");
        }
        self.connected_peers = 0;
    }

    fn close(&mut self) {
        self.pause();
        self.closed = true;
        while self.events.try_recv().is_ok() {}
        tracing::debug!("Swarm session closed");
    }
}

impl Drop for SwarmSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}
