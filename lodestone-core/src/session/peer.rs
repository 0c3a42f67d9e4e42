//! Per-peer task: connect, negotiate `ut_metadata` and relay chunks

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use super::driver::DriverMessage;
use crate::torrent::TorrentError;
use crate::torrent::protocol::{
    ExtensionHandshake, LOCAL_UT_METADATA_ID, MetadataMessage, MetadataPeer, PeerAddress,
    PeerConnector, PeerHandshake, PeerMessage, negotiate_metadata_extension, read_message,
    write_message,
};

/// Settings shared by every peer task of one torrent.
#[derive(Debug)]
pub(super) struct PeerSettings {
    pub connector: PeerConnector,
    pub handshake: PeerHandshake,
    pub extension: ExtensionHandshake,
    pub peer_timeout: Duration,
    pub max_frame_len: usize,
}

/// Runs one peer connection until it fails or the driver lets go of it.
///
/// Always ends by reporting `PeerClosed` so the driver can reclaim the
/// connection slot and any chunk still in flight.
pub(super) async fn run_peer(
    address: PeerAddress,
    settings: Arc<PeerSettings>,
    driver: mpsc::Sender<DriverMessage>,
) {
    let result = async {
        let stream = settings.connector.connect(&address).await?;
        let peer = negotiate_metadata_extension(
            stream,
            &settings.handshake,
            &settings.extension,
            settings.peer_timeout,
            settings.max_frame_len,
        )
        .await?;
        serve_metadata(&address, peer, &settings, &driver).await
    }
    .await;

    let reason = match result {
        Ok(()) => "released".to_string(),
        Err(e) => e.to_string(),
    };
    tracing::debug!("Peer {} closed: {}", address, reason);
    let _ = driver
        .send(DriverMessage::PeerClosed { address, reason })
        .await;
}

/// Registers a negotiated peer with the driver and relays `ut_metadata`
/// traffic until either side stops.
///
/// Requests come from the driver one chunk at a time; data and reject
/// replies go back to it. Returns `Ok` when the driver drops the request
/// channel.
pub(super) async fn serve_metadata<S>(
    address: &PeerAddress,
    peer: MetadataPeer<S>,
    settings: &PeerSettings,
    driver: &mpsc::Sender<DriverMessage>,
) -> Result<(), TorrentError>
where
    S: AsyncRead + AsyncWrite,
{
    let remote_id = peer
        .ut_metadata_id()
        .ok_or_else(|| TorrentError::ProtocolError {
            message: "Peer does not offer ut_metadata".to_string(),
        })?;
    let metadata_size = peer
        .metadata_size()
        .ok_or_else(|| TorrentError::ProtocolError {
            message: "Peer did not announce metadata_size".to_string(),
        })?;

    let (requests, request_receiver) = mpsc::channel(2);
    driver
        .send(DriverMessage::PeerReady {
            address: address.clone(),
            metadata_size,
            client: peer.extension.client.clone(),
            requests,
        })
        .await
        .map_err(|_| driver_gone())?;

    let (reader, writer) = tokio::io::split(peer.stream);
    // Each loop owns its half; the first to finish ends the connection
    tokio::select! {
        result = read_replies(address, reader, settings, driver) => result,
        result = send_requests(writer, remote_id, request_receiver) => result,
    }
}

async fn read_replies<R>(
    address: &PeerAddress,
    mut reader: R,
    settings: &PeerSettings,
    driver: &mpsc::Sender<DriverMessage>,
) -> Result<(), TorrentError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let message = tokio::time::timeout(
            settings.peer_timeout,
            read_message(&mut reader, settings.max_frame_len),
        )
        .await
        .map_err(|_| TorrentError::PeerConnectionError {
            reason: format!("No message for {:?}", settings.peer_timeout),
        })??;

        let PeerMessage::Extended {
            id: LOCAL_UT_METADATA_ID,
            payload,
        } = message
        else {
            continue;
        };

        let reply = match MetadataMessage::decode(&payload)? {
            MetadataMessage::Data { piece, data, .. } => DriverMessage::PieceData {
                address: address.clone(),
                piece,
                data,
            },
            MetadataMessage::Reject { piece } => DriverMessage::PieceRejected {
                address: address.clone(),
                piece,
            },
            MetadataMessage::Request { piece } => {
                // We announce no metadata_size, so nobody should ask
                tracing::trace!("Ignoring metadata request for piece {} from {}", piece, address);
                continue;
            }
        };
        driver.send(reply).await.map_err(|_| driver_gone())?;
    }
}

async fn send_requests<W>(
    mut writer: W,
    remote_id: u8,
    mut requests: mpsc::Receiver<u32>,
) -> Result<(), TorrentError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(piece) = requests.recv().await {
        let message = PeerMessage::Extended {
            id: remote_id,
            payload: MetadataMessage::Request { piece }.encode(),
        };
        write_message(&mut writer, &message).await?;
    }
    Ok(())
}

fn driver_gone() -> TorrentError {
    TorrentError::PeerConnectionError {
        reason: "session driver stopped".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::duplex;

    use super::*;
    use crate::torrent::InfoHash;
    use crate::torrent::protocol::{MAX_FRAME_LEN, PeerId};

    fn settings() -> PeerSettings {
        let info_hash = InfoHash::new([5u8; 20]);
        PeerSettings {
            connector: PeerConnector::new(None, Duration::from_secs(1)),
            handshake: PeerHandshake::new(info_hash, PeerId::new([1u8; 20])),
            extension: ExtensionHandshake::local(None),
            peer_timeout: Duration::from_secs(5),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    fn metadata_peer<S>(stream: S, metadata_size: i64) -> MetadataPeer<S> {
        MetadataPeer {
            stream,
            handshake: PeerHandshake::new(InfoHash::new([5u8; 20]), PeerId::new([2u8; 20])),
            extension: ExtensionHandshake {
                ut_metadata: Some(7),
                metadata_size: Some(metadata_size),
                client: Some("remote/1.0".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn test_requests_and_replies_are_relayed() {
        let (local, mut remote) = duplex(64 * 1024);
        let (driver, mut inbox) = mpsc::channel(8);
        let address: PeerAddress = "10.1.2.3:6881".parse().unwrap();

        let settings = settings();
        let task = tokio::spawn(async move {
            serve_metadata(&address, metadata_peer(local, 5), &settings, &driver).await
        });

        let Some(DriverMessage::PeerReady {
            metadata_size,
            client,
            requests,
            ..
        }) = inbox.recv().await
        else {
            panic!("expected PeerReady");
        };
        assert_eq!(metadata_size, 5);
        assert_eq!(client.as_deref(), Some("remote/1.0"));

        requests.send(0).await.unwrap();
        let request = read_message(&mut remote, MAX_FRAME_LEN).await.unwrap();
        assert_eq!(
            request,
            PeerMessage::Extended {
                id: 7,
                payload: MetadataMessage::Request { piece: 0 }.encode(),
            }
        );

        let data = MetadataMessage::Data {
            piece: 0,
            total_size: 5,
            data: Bytes::from_static(b"hello"),
        };
        write_message(
            &mut remote,
            &PeerMessage::Extended {
                id: LOCAL_UT_METADATA_ID,
                payload: data.encode(),
            },
        )
        .await
        .unwrap();

        match inbox.recv().await {
            Some(DriverMessage::PieceData { piece, data, .. }) => {
                assert_eq!(piece, 0);
                assert_eq!(data.as_ref(), b"hello");
            }
            _ => panic!("expected PieceData"),
        }

        // Dropping the request channel releases the peer
        drop(requests);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_remote_close_ends_connection() {
        let (local, remote) = duplex(1024);
        let (driver, mut inbox) = mpsc::channel(8);
        let address: PeerAddress = "10.1.2.3:6881".parse().unwrap();

        let settings = settings();
        let task = tokio::spawn(async move {
            serve_metadata(&address, metadata_peer(local, 5), &settings, &driver).await
        });

        let Some(DriverMessage::PeerReady { requests, .. }) = inbox.recv().await else {
            panic!("expected PeerReady");
        };
        drop(remote);

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(TorrentError::PeerConnectionError { .. })
        ));
        drop(requests);
    }
}
