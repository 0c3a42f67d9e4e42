//! Driver actor behind [`super::SwarmSession`].
//!
//! One driver per submitted torrent owns the tracker schedule, the peer
//! table and the metadata buffer. Tracker announces and peer connections
//! run as tasks in a `JoinSet` and report back over a bounded channel, so
//! aborting the driver tears the whole swarm down.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use super::events::SessionEvent;
use super::peer::{PeerSettings, run_peer};
use crate::config::{NetworkConfig, SessionConfig};
use crate::torrent::protocol::{
    ExtensionHandshake, MAX_FRAME_LEN, PeerAddress, PeerConnector, PeerHandshake, PeerId,
};
use crate::torrent::tracker::{
    AnnounceRequest, TrackerClient, announce_order, is_udp_tracker, tracker_for_url,
};
use crate::torrent::{InfoHash, MagnetDescriptor, MetadataBuffer, TorrentInfoDict};

const DRIVER_QUEUE: usize = 256;

/// Messages from tracker and peer tasks to the driver.
#[derive(Debug)]
pub(super) enum DriverMessage {
    Announced {
        url: String,
        result: Result<Vec<SocketAddr>, String>,
    },
    PeerReady {
        address: PeerAddress,
        metadata_size: i64,
        client: Option<String>,
        requests: mpsc::Sender<u32>,
    },
    PieceData {
        address: PeerAddress,
        piece: u32,
        data: Bytes,
    },
    PieceRejected {
        address: PeerAddress,
        piece: u32,
    },
    PeerClosed {
        address: PeerAddress,
        reason: String,
    },
}

/// Negotiated peer that agreed on the metadata size.
#[derive(Debug)]
struct ConnectedPeer {
    requests: mpsc::Sender<u32>,
    in_flight: Option<u32>,
}

pub(super) struct SwarmDriver {
    info_hash: InfoHash,
    peer_hints: Vec<PeerAddress>,
    anonymous: bool,
    network: NetworkConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    settings: Arc<PeerSettings>,
    announce: AnnounceRequest,
    trackers: Vec<Arc<dyn TrackerClient>>,
    candidates: VecDeque<PeerAddress>,
    /// Queued or dialed; a peer leaves once its connection ends
    seen: HashSet<PeerAddress>,
    peer_tasks: HashSet<PeerAddress>,
    connected: HashMap<PeerAddress, ConnectedPeer>,
    buffer: Option<MetadataBuffer>,
    tasks: JoinSet<()>,
    done: bool,
}

impl SwarmDriver {
    pub(super) fn new(
        descriptor: MagnetDescriptor,
        config: &SessionConfig,
        network: NetworkConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let proxy = config.effective_proxy();
        let (peer_id, client) = if config.anonymous {
            (PeerId::anonymous(), None)
        } else {
            (
                PeerId::generate(),
                Some(concat!("lodestone/", env!("CARGO_PKG_VERSION")).to_string()),
            )
        };

        let settings = Arc::new(PeerSettings {
            connector: PeerConnector::new(proxy.clone(), network.connect_timeout),
            handshake: PeerHandshake::new(descriptor.info_hash, peer_id),
            extension: ExtensionHandshake::local(client),
            peer_timeout: network.peer_timeout,
            max_frame_len: MAX_FRAME_LEN,
        });

        let mut driver = Self {
            info_hash: descriptor.info_hash,
            peer_hints: Vec::new(),
            anonymous: config.anonymous,
            announce: AnnounceRequest::started(descriptor.info_hash, peer_id, network.announce_port),
            network,
            events,
            settings,
            trackers: Vec::new(),
            candidates: VecDeque::new(),
            seen: HashSet::new(),
            peer_tasks: HashSet::new(),
            connected: HashMap::new(),
            buffer: None,
            tasks: JoinSet::new(),
            done: false,
        };

        for hint in &descriptor.peer_hints {
            match hint.parse::<PeerAddress>() {
                Ok(address) => driver.peer_hints.push(address),
                Err(e) => driver.emit(SessionEvent::Notice {
                    message: format!("ignoring peer hint: {e}"),
                }),
            }
        }

        for url in announce_order(&descriptor.trackers, config.prefer_udp_trackers()) {
            if driver.anonymous && is_udp_tracker(&url) {
                driver.emit(SessionEvent::Notice {
                    message: format!("skipping {url}: UDP trackers bypass the proxy"),
                });
                continue;
            }
            match tracker_for_url(&url, &driver.network, proxy.as_ref()) {
                Ok(tracker) => driver.trackers.push(tracker),
                Err(e) => driver.emit(SessionEvent::TrackerError {
                    url,
                    reason: e.to_string(),
                }),
            }
        }

        driver
    }

    /// Runs until metadata is assembled, or forever if it never is; the
    /// owning session aborts the task when it is done with it.
    pub(super) async fn run(mut self) {
        let (sender, mut receiver) = mpsc::channel(DRIVER_QUEUE);
        tracing::debug!(
            "Swarm driver started for {} ({} trackers, {} peer hints)",
            self.info_hash,
            self.trackers.len(),
            self.peer_hints.len()
        );

        if self.trackers.is_empty() && self.peer_hints.is_empty() {
            self.emit(SessionEvent::Notice {
                message: "no usable trackers or peer hints".to_string(),
            });
        }
        self.announce_all(&sender, true);
        self.queue_hints(&sender);

        let period = self.network.reannounce_interval;
        let mut reannounce = tokio::time::interval_at(Instant::now() + period, period);
        reannounce.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.done {
            tokio::select! {
                Some(message) = receiver.recv() => self.handle_message(message, &sender),
                _ = reannounce.tick() => self.reannounce(&sender),
                Some(result) = self.tasks.join_next() => {
                    if let Err(e) = result
                        && e.is_panic()
                    {
                        tracing::warn!("Swarm task panicked: {}", e);
                    }
                }
            }
        }

        self.tasks.abort_all();
        tracing::debug!("Swarm driver stopped for {}", self.info_hash);
    }

    fn handle_message(&mut self, message: DriverMessage, sender: &mpsc::Sender<DriverMessage>) {
        match message {
            DriverMessage::Announced { url, result } => match result {
                Ok(peers) => {
                    self.emit(SessionEvent::TrackerReply {
                        url,
                        peers: peers.len(),
                    });
                    self.add_candidates(peers.into_iter().map(PeerAddress::from), sender);
                }
                Err(reason) => self.emit(SessionEvent::TrackerError { url, reason }),
            },
            DriverMessage::PeerReady {
                address,
                metadata_size,
                client,
                requests,
            } => self.accept_peer(address, metadata_size, client, requests),
            DriverMessage::PieceData {
                address,
                piece,
                data,
            } => self.store_piece(address, piece, data),
            DriverMessage::PieceRejected { address, piece } => {
                let owned = self.take_in_flight(&address, piece);
                self.drop_peer(address, owned, format!("rejected metadata piece {piece}"));
                self.assign_pieces();
            }
            DriverMessage::PeerClosed { address, reason } => {
                self.peer_tasks.remove(&address);
                // Dialable again once a tracker or hint names it
                self.seen.remove(&address);
                if self.connected.contains_key(&address) {
                    self.drop_peer(address, None, reason);
                }
                self.fill_connections(sender);
                self.assign_pieces();
            }
        }
    }

    fn announce_all(&mut self, sender: &mpsc::Sender<DriverMessage>, first: bool) {
        let request = if first {
            self.announce.clone()
        } else {
            self.announce.regular()
        };

        for tracker in &self.trackers {
            let tracker = Arc::clone(tracker);
            let request = request.clone();
            let sender = sender.clone();
            self.tasks.spawn(async move {
                let result = tracker
                    .announce(request)
                    .await
                    .map(|response| response.peers)
                    .map_err(|e| e.to_string());
                let url = tracker.tracker_url().to_string();
                let _ = sender.send(DriverMessage::Announced { url, result }).await;
            });
        }
    }

    /// Asks the trackers and the `x.pe` hints for peers again while no
    /// peer is serving metadata.
    fn reannounce(&mut self, sender: &mpsc::Sender<DriverMessage>) {
        if !self.connected.is_empty() {
            return;
        }
        tracing::debug!("No metadata peers connected, re-announcing");
        self.announce_all(sender, false);
        self.queue_hints(sender);
    }

    /// Queues `x.pe` hints. Host names are resolved when dialing, by the
    /// proxy in anonymous mode.
    fn queue_hints(&mut self, sender: &mpsc::Sender<DriverMessage>) {
        let hints = self.peer_hints.clone();
        self.add_candidates(hints, sender);
    }

    fn add_candidates(
        &mut self,
        peers: impl IntoIterator<Item = PeerAddress>,
        sender: &mpsc::Sender<DriverMessage>,
    ) {
        for peer in peers {
            if self.seen.insert(peer.clone()) {
                self.candidates.push_back(peer);
            }
        }
        self.fill_connections(sender);
    }

    fn fill_connections(&mut self, sender: &mpsc::Sender<DriverMessage>) {
        while !self.done && self.peer_tasks.len() < self.network.max_peer_connections {
            let Some(address) = self.candidates.pop_front() else {
                break;
            };
            tracing::trace!("Connecting to peer {}", address);
            self.peer_tasks.insert(address.clone());
            self.tasks
                .spawn(run_peer(address, Arc::clone(&self.settings), sender.clone()));
        }
    }

    /// Admits a negotiated peer. The first acceptable `metadata_size` fixes
    /// the buffer; peers disagreeing with it are let go by dropping their
    /// request channel.
    fn accept_peer(
        &mut self,
        address: PeerAddress,
        metadata_size: i64,
        client: Option<String>,
        requests: mpsc::Sender<u32>,
    ) {
        match &self.buffer {
            Some(buffer) => {
                if usize::try_from(metadata_size).ok() != Some(buffer.total_size()) {
                    tracing::debug!(
                        "Dropping {}: metadata_size {} differs from {}",
                        address,
                        metadata_size,
                        buffer.total_size()
                    );
                    return;
                }
            }
            None => match MetadataBuffer::new(metadata_size, self.network.max_metadata_size) {
                Ok(buffer) => {
                    tracing::debug!(
                        "Metadata is {} bytes in {} pieces",
                        buffer.total_size(),
                        buffer.piece_count()
                    );
                    self.buffer = Some(buffer);
                }
                Err(e) => {
                    tracing::debug!("Dropping {}: {}", address, e);
                    return;
                }
            },
        }

        self.connected.insert(
            address.clone(),
            ConnectedPeer {
                requests,
                in_flight: None,
            },
        );
        self.emit(SessionEvent::PeerConnected { address, client });
        self.assign_pieces();
    }

    fn store_piece(&mut self, address: PeerAddress, piece: u32, data: Bytes) {
        let owned = self.take_in_flight(&address, piece);
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };

        let stored = buffer.store_piece(piece, &data);
        let progress = SessionEvent::MetadataProgress {
            received: buffer.received_bytes(),
            total: buffer.total_size(),
        };
        match stored {
            Ok(true) => {
                self.emit(progress);
                self.finish();
                return;
            }
            Ok(false) => self.emit(progress),
            Err(e) => self.drop_peer(address, owned, e.to_string()),
        }
        self.assign_pieces();
    }

    fn take_in_flight(&mut self, address: &PeerAddress, piece: u32) -> Option<u32> {
        self.connected
            .get_mut(address)
            .and_then(|peer| peer.in_flight.take_if(|in_flight| *in_flight == piece))
    }

    /// Forgets a connected peer and returns its chunks to the pool.
    fn drop_peer(&mut self, address: PeerAddress, owned: Option<u32>, reason: String) {
        let in_flight = self
            .connected
            .remove(&address)
            .and_then(|peer| peer.in_flight);
        if let Some(buffer) = self.buffer.as_mut() {
            for piece in owned.into_iter().chain(in_flight) {
                buffer.release_piece(piece);
            }
        }
        self.emit(SessionEvent::PeerDisconnected { address, reason });
    }

    /// Gives every idle peer one missing chunk.
    fn assign_pieces(&mut self) {
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };

        for (address, peer) in self.connected.iter_mut() {
            if peer.in_flight.is_some() {
                continue;
            }
            let Some(piece) = buffer.reserve_piece() else {
                break;
            };
            if peer.requests.try_send(piece).is_ok() {
                tracing::trace!("Requesting metadata piece {} from {}", piece, address);
                peer.in_flight = Some(piece);
            } else {
                buffer.release_piece(piece);
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        let Some(buffer) = self.buffer.take() else {
            return;
        };

        let event = match buffer.into_bytes() {
            Ok(raw) => self.validate(raw),
            Err(_) => SessionEvent::TorrentError {
                detail: "metadata buffer finished incomplete".to_string(),
            },
        };
        self.emit(event);
    }

    /// Hashes the assembled bytes and decodes them.
    fn validate(&self, raw: Vec<u8>) -> SessionEvent {
        let actual = InfoHash::of_info_bytes(&raw);
        if actual != self.info_hash {
            return SessionEvent::MetadataRejected {
                reason: format!("info dictionary hashes to {actual}, expected {}", self.info_hash),
            };
        }

        match TorrentInfoDict::from_bytes(raw) {
            Ok(info) => SessionEvent::MetadataReceived { info },
            Err(e) => SessionEvent::MetadataRejected {
                reason: e.to_string(),
            },
        }
    }

    fn emit(&self, event: SessionEvent) {
        tracing::trace!(event = event.what(), "{}", event);
        let _ = self.events.send(event);
    }
}
