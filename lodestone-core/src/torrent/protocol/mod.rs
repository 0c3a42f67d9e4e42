//! BitTorrent wire protocol for metadata exchange.
//!
//! BEP 3 handshake and message framing, the BEP 10 extension handshake,
//! BEP 9 `ut_metadata` messages and SOCKS5 dialing for anonymous mode.

pub mod connection;
pub mod extension;
pub mod handshake;
pub mod messages;
pub mod proxy;
pub mod types;

// Re-export public API
pub use connection::{MetadataPeer, PeerConnector, negotiate_metadata_extension};
pub use extension::{ExtensionHandshake, LOCAL_UT_METADATA_ID, MetadataMessage};
pub use messages::{MAX_FRAME_LEN, read_message, write_message};
pub use types::{PeerAddress, PeerHandshake, PeerId, PeerMessage};
