//! Swarm sessions.
//!
//! A [`Session`] hides the whole peer-to-peer side of a resolution behind a
//! small polling interface: submit a torrent, drain events, query status.
//! [`SwarmSession`] is the networked implementation; tests drive the
//! controller with scripted implementations instead.

mod driver;
pub mod events;
mod peer;
pub mod swarm;

use std::fmt;

pub use events::SessionEvent;
pub use swarm::SwarmSession;

use crate::torrent::{MagnetDescriptor, TorrentInfoDict};

/// Identifier of a torrent submitted to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TorrentHandle(u64);

impl TorrentHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TorrentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Torrent submission.
///
/// `metadata_only` must be set: sessions in this crate never download
/// payload data and refuse submissions that ask for it.
#[derive(Debug, Clone)]
pub struct AddTorrentParams {
    pub descriptor: MagnetDescriptor,
    pub metadata_only: bool,
}

impl AddTorrentParams {
    /// Submission that stops once the info dictionary is known.
    pub fn metadata_only(descriptor: MagnetDescriptor) -> Self {
        Self {
            descriptor,
            metadata_only: true,
        }
    }
}

/// Snapshot of one torrent inside a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TorrentStatus {
    pub has_metadata: bool,
    pub connected_peers: usize,
}

/// Polling interface over a swarm client.
///
/// Sessions are opened by a caller-supplied `FnOnce(SessionConfig) -> S`
/// and are driven from a single task. Failures after opening surface as
/// [`SessionEvent::TorrentError`], never as return values.
pub trait Session {
    /// Adds a torrent and starts joining its swarm.
    fn submit(&mut self, params: AddTorrentParams) -> TorrentHandle;

    /// Drains pending events without blocking, oldest first.
    fn poll_events(&mut self) -> Vec<SessionEvent>;

    fn status(&self, handle: TorrentHandle) -> TorrentStatus;

    /// Info dictionary once metadata has been received.
    fn torrent_info(&self, handle: TorrentHandle) -> Option<TorrentInfoDict>;

    /// Stops all network activity. Received metadata stays available.
    fn pause(&mut self);

    /// Pauses and releases everything, including undrained events.
    fn close(&mut self);
}
