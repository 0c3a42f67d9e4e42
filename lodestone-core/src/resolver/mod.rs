//! Resolution controller.
//!
//! Drives one magnet link from parsing to a written `.torrent` file: opens
//! a session, polls it until metadata arrives or the timeout passes,
//! re-validates the info dictionary and hands it to the serializer.

pub mod state;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use state::{ResolutionPhase, ResolutionState};

use crate::config::{LodestoneConfig, SessionConfig};
use crate::session::{AddTorrentParams, Session, SessionEvent, TorrentHandle};
use crate::torrent::{CreationMetadata, InfoHash, MagnetDescriptor, TorrentFile};
use crate::{ResolveError, Result};

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolveReport {
    pub info_hash: InfoHash,
    pub name: String,
    pub output_path: PathBuf,
    pub bytes_written: u64,
    pub elapsed: Duration,
}

/// Resolves magnet links into `.torrent` files.
///
/// Each call is one independent attempt with its own session; nothing is
/// retried.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    config: LodestoneConfig,
}

impl Resolver {
    pub fn new(config: LodestoneConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LodestoneConfig {
        &self.config
    }

    /// Resolves `magnet_uri` and writes the result to `output`.
    ///
    /// The URI is parsed before `open` is called, so a malformed link never
    /// touches the network.
    ///
    /// # Errors
    ///
    /// - `ResolveError::InvalidMagnetUri` - If the URI cannot be parsed
    /// - `ResolveError::Session` - If the session reports a torrent failure
    /// - `ResolveError::MetadataValidation` - If the received info dictionary is unusable
    /// - `ResolveError::Timeout` - If no metadata arrives within the configured timeout
    /// - `ResolveError::Io` - If the output file cannot be written
    pub async fn resolve<S, F>(
        &self,
        magnet_uri: &str,
        output: &Path,
        session_config: SessionConfig,
        open: F,
    ) -> Result<ResolveReport>
    where
        S: Session,
        F: FnOnce(SessionConfig) -> S,
    {
        self.resolve_until(
            magnet_uri,
            output,
            session_config,
            open,
            std::future::pending(),
        )
        .await
    }

    /// Like [`Resolver::resolve`], but gives up with
    /// `ResolveError::Interrupted` as soon as `cancel` completes.
    pub async fn resolve_until<S, F, C>(
        &self,
        magnet_uri: &str,
        output: &Path,
        session_config: SessionConfig,
        open: F,
        cancel: C,
    ) -> Result<ResolveReport>
    where
        S: Session,
        F: FnOnce(SessionConfig) -> S,
        C: Future<Output = ()>,
    {
        let descriptor =
            MagnetDescriptor::parse(magnet_uri).map_err(|e| ResolveError::InvalidMagnetUri {
                reason: e.to_string(),
            })?;
        tracing::info!(
            "Resolving {} ({})",
            descriptor.info_hash,
            descriptor.display_name.as_deref().unwrap_or("unnamed")
        );

        let mut state = ResolutionState::new();
        let mut session = open(session_config);
        let handle = session.submit(AddTorrentParams::metadata_only(descriptor.clone()));
        state.advance(ResolutionPhase::AwaitingMetadata);

        tokio::pin!(cancel);
        let outcome = tokio::select! {
            outcome = self.await_metadata(&mut session, handle, &state) => outcome,
            () = &mut cancel => Err(ResolveError::Interrupted),
        };

        let outcome = match outcome {
            Ok(()) => {
                state.advance(ResolutionPhase::Validating);
                self.write_torrent(&mut session, handle, &descriptor, output)
                    .await
            }
            Err(e) => Err(e),
        };
        session.close();

        match outcome {
            Ok((name, bytes_written)) => {
                state.advance(ResolutionPhase::Completed);
                tracing::info!(
                    "Wrote {} bytes for '{}' to {}",
                    bytes_written,
                    name,
                    output.display()
                );
                Ok(ResolveReport {
                    info_hash: descriptor.info_hash,
                    name,
                    output_path: output.to_path_buf(),
                    bytes_written,
                    elapsed: state.elapsed(),
                })
            }
            Err(e) => {
                if e.is_timeout() {
                    state.advance(ResolutionPhase::TimedOut);
                } else {
                    state.advance(ResolutionPhase::Failed(e.to_string()));
                }
                tracing::warn!("Resolution {}", state.phase());
                Err(e)
            }
        }
    }

    /// Polls until metadata is available, a failure event arrives or the
    /// timeout passes.
    async fn await_metadata<S: Session>(
        &self,
        session: &mut S,
        handle: TorrentHandle,
        state: &ResolutionState,
    ) -> Result<()> {
        let timeout = self.config.resolver.timeout;
        let poll_interval = self.config.resolver.poll_interval;

        loop {
            // First decisive event in queue order wins
            for event in session.poll_events() {
                log_event(&event);
                match event {
                    SessionEvent::MetadataReceived { .. } => return Ok(()),
                    SessionEvent::MetadataRejected { reason } => {
                        return Err(ResolveError::MetadataValidation { reason });
                    }
                    event if event.is_failure() => {
                        return Err(ResolveError::Session {
                            reason: event.to_string(),
                        });
                    }
                    _ => {}
                }
            }

            if session.status(handle).has_metadata {
                return Ok(());
            }

            let elapsed = state.elapsed();
            if elapsed >= timeout {
                return Err(ResolveError::Timeout { elapsed });
            }
            tokio::time::sleep(poll_interval.min(timeout - elapsed)).await;
        }
    }

    /// Re-validates the received info dictionary and writes the file.
    /// Returns the torrent name and the number of bytes written.
    async fn write_torrent<S: Session>(
        &self,
        session: &mut S,
        handle: TorrentHandle,
        descriptor: &MagnetDescriptor,
        output: &Path,
    ) -> Result<(String, u64)> {
        let info = session
            .torrent_info(handle)
            .ok_or_else(|| ResolveError::Session {
                reason: "session reported metadata but returned no info dictionary".to_string(),
            })?;

        if let Some(problem) = info.validation_error() {
            return Err(ResolveError::MetadataValidation { reason: problem });
        }
        let actual = info.info_hash();
        if actual != descriptor.info_hash {
            return Err(ResolveError::MetadataValidation {
                reason: format!(
                    "info dictionary hashes to {actual}, expected {}",
                    descriptor.info_hash
                ),
            });
        }

        session.pause();

        let mut creation = CreationMetadata::new(self.config.resolver.created_by.clone());
        if self.config.resolver.include_creation_date {
            creation = creation.stamped_now();
        }
        let name = info.name.clone();
        let torrent = TorrentFile::new(info, descriptor.trackers.clone(), creation);

        let bytes_written = torrent
            .write_to(output, self.config.storage.temp_file_suffix)
            .await
            .map_err(|source| ResolveError::Io {
                path: output.to_path_buf(),
                source,
            })?;
        Ok((name, bytes_written))
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::MetadataRejected { .. }
        | SessionEvent::TorrentError { .. }
        | SessionEvent::TorrentFinished => {
            tracing::warn!("{}: {}", event.what(), event)
        }
        SessionEvent::TrackerError { .. }
        | SessionEvent::Notice { .. }
        | SessionEvent::MetadataReceived { .. }
        | SessionEvent::PeerConnected { .. } => tracing::info!("{}: {}", event.what(), event),
        _ => tracing::debug!("{}: {}", event.what(), event),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;

    use super::*;
    use crate::session::TorrentStatus;
    use crate::torrent::TorrentInfoDict;
    use crate::torrent::info::test_support::single_file_info;

    const ZERO_MAGNET: &str = "magnet:?xt=urn:btih:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA&dn=test";

    /// What the scripted session was asked to do.
    #[derive(Debug, Default)]
    struct Calls {
        opened: usize,
        opened_with: Option<SessionConfig>,
        submitted: Vec<AddTorrentParams>,
        paused: bool,
        closed: bool,
    }

    /// Session double replaying one batch of events per poll.
    struct ScriptedSession {
        batches: VecDeque<Vec<SessionEvent>>,
        info: Option<TorrentInfoDict>,
        calls: Arc<Mutex<Calls>>,
    }

    impl ScriptedSession {
        fn opener(
            batches: Vec<Vec<SessionEvent>>,
            calls: &Arc<Mutex<Calls>>,
        ) -> impl FnOnce(SessionConfig) -> ScriptedSession {
            let calls = Arc::clone(calls);
            move |config| {
                let mut recorded = calls.lock().unwrap();
                recorded.opened += 1;
                recorded.opened_with = Some(config);
                drop(recorded);
                ScriptedSession {
                    batches: batches.into(),
                    info: None,
                    calls,
                }
            }
        }
    }

    impl Session for ScriptedSession {
        fn submit(&mut self, params: AddTorrentParams) -> TorrentHandle {
            self.calls.lock().unwrap().submitted.push(params);
            TorrentHandle::new(1)
        }

        fn poll_events(&mut self) -> Vec<SessionEvent> {
            let batch = self.batches.pop_front().unwrap_or_default();
            for event in &batch {
                if let SessionEvent::MetadataReceived { info } = event {
                    self.info = Some(info.clone());
                }
            }
            batch
        }

        fn status(&self, _handle: TorrentHandle) -> TorrentStatus {
            TorrentStatus {
                has_metadata: self.info.is_some(),
                connected_peers: 0,
            }
        }

        fn torrent_info(&self, _handle: TorrentHandle) -> Option<TorrentInfoDict> {
            self.info.clone()
        }

        fn pause(&mut self) {
            self.calls.lock().unwrap().paused = true;
        }

        fn close(&mut self) {
            self.calls.lock().unwrap().closed = true;
        }
    }

    fn test_info() -> TorrentInfoDict {
        TorrentInfoDict::from_bytes(single_file_info("test.txt", 10, 16384, &[[0x11; 20]])).unwrap()
    }

    fn magnet_for(info: &TorrentInfoDict) -> String {
        format!("magnet:?xt=urn:btih:{}&dn=test", info.info_hash())
    }

    fn metadata_batch(info: TorrentInfoDict) -> Vec<Vec<SessionEvent>> {
        vec![vec![
            SessionEvent::PeerConnected {
                address: "10.0.0.1:6881".parse().unwrap(),
                client: None,
            },
            SessionEvent::MetadataReceived { info },
        ]]
    }

    #[tokio::test]
    async fn test_resolve_writes_torrent() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.torrent");
        let calls = Arc::new(Mutex::new(Calls::default()));
        let info = test_info();

        let report = Resolver::default()
            .resolve(
                &magnet_for(&info),
                &output,
                SessionConfig::default(),
                ScriptedSession::opener(metadata_batch(info.clone()), &calls),
            )
            .await
            .unwrap();

        assert_eq!(report.name, "test.txt");
        assert_eq!(report.info_hash, info.info_hash());
        let written = std::fs::read(&output).unwrap();
        assert_eq!(report.bytes_written, written.len() as u64);
        assert!(
            written
                .windows(info.raw_bytes().len())
                .any(|window| window == info.raw_bytes())
        );

        let calls = calls.lock().unwrap();
        assert_eq!(calls.opened, 1);
        assert!(calls.submitted[0].metadata_only);
        assert!(calls.paused);
        assert!(calls.closed);
    }

    #[tokio::test]
    async fn test_all_a_magnet_rejects_foreign_metadata() {
        // A double answering the zero infohash with test.txt metadata must
        // fail: no info dictionary hashes to twenty zero bytes
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.torrent");
        let calls = Arc::new(Mutex::new(Calls::default()));

        let result = Resolver::default()
            .resolve(
                ZERO_MAGNET,
                &output,
                SessionConfig::default(),
                ScriptedSession::opener(metadata_batch(test_info()), &calls),
            )
            .await;

        assert!(matches!(result, Err(ResolveError::MetadataValidation { .. })));
        assert!(!output.exists());
        assert_eq!(
            calls.lock().unwrap().submitted[0].descriptor.info_hash,
            InfoHash::new([0u8; 20])
        );
        assert!(calls.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let info = test_info();
        let mut outputs = Vec::new();

        for attempt in 0..2 {
            let output = dir.path().join(format!("run{attempt}.torrent"));
            let calls = Arc::new(Mutex::new(Calls::default()));
            Resolver::default()
                .resolve(
                    &magnet_for(&info),
                    &output,
                    SessionConfig::default(),
                    ScriptedSession::opener(metadata_batch(info.clone()), &calls),
                )
                .await
                .unwrap();
            outputs.push(std::fs::read(&output).unwrap());
        }

        assert_eq!(outputs[0], outputs[1]);
    }

    #[tokio::test]
    async fn test_invalid_magnet_opens_no_session() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(Mutex::new(Calls::default()));

        for uri in [
            "magnet:?xt=urn:btih:0123456789abcdef",
            "magnet:?xt=urn:btih:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "magnet:?dn=no-hash",
            "http://example.com/?xt=urn:btih:0123456789abcdef0123456789abcdef01234567",
        ] {
            let result = Resolver::default()
                .resolve(
                    uri,
                    &dir.path().join("out.torrent"),
                    SessionConfig::default(),
                    ScriptedSession::opener(Vec::new(), &calls),
                )
                .await;
            assert!(matches!(result, Err(ResolveError::InvalidMagnetUri { .. })), "{uri}");
        }
        assert_eq!(calls.lock().unwrap().opened, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_exactly_at_ceiling() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(Mutex::new(Calls::default()));
        let started = tokio::time::Instant::now();

        let result = Resolver::default()
            .resolve(
                ZERO_MAGNET,
                &dir.path().join("out.torrent"),
                SessionConfig::default(),
                ScriptedSession::opener(Vec::new(), &calls),
            )
            .await;

        match result {
            Err(ResolveError::Timeout { elapsed }) => {
                assert_eq!(elapsed, Duration::from_secs(60));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        assert!(calls.lock().unwrap().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_clamped_to_remaining_time() {
        let mut config = LodestoneConfig::default();
        config.resolver.timeout = Duration::from_millis(2500);
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(Mutex::new(Calls::default()));

        let result = Resolver::new(config)
            .resolve(
                ZERO_MAGNET,
                &dir.path().join("out.torrent"),
                SessionConfig::default(),
                ScriptedSession::opener(Vec::new(), &calls),
            )
            .await;
        assert!(matches!(
            result,
            Err(ResolveError::Timeout { elapsed }) if elapsed == Duration::from_millis(2500)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_on_later_poll() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.torrent");
        let calls = Arc::new(Mutex::new(Calls::default()));
        let info = test_info();

        let mut batches = vec![Vec::new(); 5];
        batches.extend(metadata_batch(info.clone()));
        let report = Resolver::default()
            .resolve(
                &magnet_for(&info),
                &output,
                SessionConfig::default(),
                ScriptedSession::opener(batches, &calls),
            )
            .await
            .unwrap();
        assert_eq!(report.elapsed, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_torrent_error_event_fails() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(Mutex::new(Calls::default()));

        let result = Resolver::default()
            .resolve(
                ZERO_MAGNET,
                &dir.path().join("out.torrent"),
                SessionConfig::from_flags(false, true, false),
                ScriptedSession::opener(
                    vec![vec![
                        SessionEvent::TorrentError {
                            detail: "No usable peer transport: TCP is disabled".to_string(),
                        },
                        SessionEvent::MetadataReceived { info: test_info() },
                    ]],
                    &calls,
                ),
            )
            .await;

        assert!(matches!(
            result,
            Err(ResolveError::Session { reason }) if reason.contains("No usable peer transport")
        ));
        assert!(!calls.lock().unwrap().paused);
    }

    #[tokio::test]
    async fn test_udp_only_session_is_opened_without_tcp() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(Mutex::new(Calls::default()));

        let _ = Resolver::default()
            .resolve(
                ZERO_MAGNET,
                &dir.path().join("out.torrent"),
                SessionConfig::from_flags(false, true, false),
                ScriptedSession::opener(vec![vec![SessionEvent::TorrentFinished]], &calls),
            )
            .await;

        let calls = calls.lock().unwrap();
        let config = calls.opened_with.as_ref().unwrap();
        assert!(!config.enable_outgoing_tcp());
        assert!(!config.enable_incoming_tcp());
        assert!(config.prefer_udp_trackers());
    }

    #[tokio::test]
    async fn test_rejected_metadata_is_validation_error() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out.torrent");
        let calls = Arc::new(Mutex::new(Calls::default()));

        let result = Resolver::default()
            .resolve(
                ZERO_MAGNET,
                &output,
                SessionConfig::default(),
                ScriptedSession::opener(
                    vec![vec![SessionEvent::MetadataRejected {
                        reason: "info dictionary hashes to something else".to_string(),
                    }]],
                    &calls,
                ),
            )
            .await;

        match result {
            Err(error @ ResolveError::MetadataValidation { .. }) => {
                assert_eq!(error.kind(), "metadata-validation-failure");
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        assert!(!output.exists());
        assert!(calls.lock().unwrap().closed);
    }

    #[tokio::test]
    async fn test_finished_without_metadata_fails() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(Mutex::new(Calls::default()));

        let result = Resolver::default()
            .resolve(
                ZERO_MAGNET,
                &dir.path().join("out.torrent"),
                SessionConfig::default(),
                ScriptedSession::opener(vec![vec![SessionEvent::TorrentFinished]], &calls),
            )
            .await;
        assert!(matches!(result, Err(ResolveError::Session { .. })));
    }

    #[tokio::test]
    async fn test_unwritable_output_is_io_error() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("missing").join("out.torrent");
        let calls = Arc::new(Mutex::new(Calls::default()));
        let info = test_info();

        let result = Resolver::default()
            .resolve(
                &magnet_for(&info),
                &output,
                SessionConfig::default(),
                ScriptedSession::opener(metadata_batch(info), &calls),
            )
            .await;

        match result {
            Err(error @ ResolveError::Io { .. }) => {
                assert_eq!(error.kind(), "io-error");
                assert!(error.to_string().contains("out.torrent"));
            }
            other => panic!("expected io error, got {other:?}"),
        }
        assert!(calls.lock().unwrap().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(Mutex::new(Calls::default()));

        let result = Resolver::default()
            .resolve_until(
                ZERO_MAGNET,
                &dir.path().join("out.torrent"),
                SessionConfig::default(),
                ScriptedSession::opener(Vec::new(), &calls),
                tokio::time::sleep(Duration::from_secs(3)),
            )
            .await;

        assert!(matches!(result, Err(ResolveError::Interrupted)));
        assert!(calls.lock().unwrap().closed);
    }
}
