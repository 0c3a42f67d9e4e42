//! Magnet link parsing utilities

use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::torrent::{InfoHash, TorrentError};

const BTIH_PREFIX: &str = "urn:btih:";

/// Parsed magnet link.
///
/// Immutable once parsed. Trackers and peer hints keep the order and
/// duplicates of the original URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetDescriptor {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
    /// `x.pe` values, `host:port` peers to contact directly
    pub peer_hints: Vec<String>,
}

impl MagnetDescriptor {
    /// Creates descriptor for an info hash with no other parameters.
    pub fn new(info_hash: InfoHash) -> Self {
        Self {
            info_hash,
            display_name: None,
            trackers: Vec::new(),
            peer_hints: Vec::new(),
        }
    }

    /// Parses magnet URI into a descriptor.
    ///
    /// Accepts the info hash as 40 hex characters (any case) or 32 base32
    /// characters. Query values are percent-decoded and unknown parameters
    /// are ignored. The first `urn:btih:` exact topic wins.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidMagnetLink` - Not a magnet URI, no btih exact topic, or malformed hash
    pub fn parse(uri: &str) -> Result<Self, TorrentError> {
        let url = Url::parse(uri.trim()).map_err(|e| TorrentError::InvalidMagnetLink {
            reason: format!("Not a URI: {e}"),
        })?;

        if url.scheme() != "magnet" {
            return Err(TorrentError::InvalidMagnetLink {
                reason: format!("Expected magnet: scheme, got {}:", url.scheme()),
            });
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();
        let mut peer_hints = Vec::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" if info_hash.is_none() => {
                    if let Some(encoded) = strip_btih_prefix(&value) {
                        info_hash = Some(decode_info_hash(encoded)?);
                    }
                }
                "dn" if display_name.is_none() => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                "x.pe" => peer_hints.push(value.into_owned()),
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or_else(|| TorrentError::InvalidMagnetLink {
            reason: "Missing xt=urn:btih: parameter".to_string(),
        })?;

        Ok(Self {
            info_hash,
            display_name,
            trackers,
            peer_hints,
        })
    }

    /// Formats the descriptor back into a magnet URI with a hex info hash.
    pub fn to_uri(&self) -> String {
        let mut uri = format!("magnet:?xt={BTIH_PREFIX}{}", self.info_hash);

        let params = self
            .display_name
            .iter()
            .map(|name| ("dn", name))
            .chain(self.trackers.iter().map(|tracker| ("tr", tracker)))
            .chain(self.peer_hints.iter().map(|peer| ("x.pe", peer)));

        for (key, value) in params {
            uri.push('&');
            uri.push_str(key);
            uri.push('=');
            uri.extend(byte_serialize(value.as_bytes()));
        }

        uri
    }
}

fn strip_btih_prefix(value: &str) -> Option<&str> {
    let head = value.get(..BTIH_PREFIX.len())?;
    head.eq_ignore_ascii_case(BTIH_PREFIX)
        .then(|| &value[BTIH_PREFIX.len()..])
}

/// Decodes a hex or base32 info hash into exactly 20 bytes.
fn decode_info_hash(encoded: &str) -> Result<InfoHash, TorrentError> {
    let bytes = match encoded.len() {
        40 => hex::decode(encoded).map_err(|e| TorrentError::InvalidMagnetLink {
            reason: format!("Invalid hex info hash {encoded}: {e}"),
        })?,
        32 => data_encoding::BASE32
            .decode(encoded.to_ascii_uppercase().as_bytes())
            .map_err(|e| TorrentError::InvalidMagnetLink {
                reason: format!("Invalid base32 info hash {encoded}: {e}"),
            })?,
        other => {
            return Err(TorrentError::InvalidMagnetLink {
                reason: format!("Invalid info hash length: {other} (expected 40 hex or 32 base32)"),
            });
        }
    };

    InfoHash::from_slice(&bytes)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const HEX_HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn test_parse_hex_magnet_with_trackers() {
        let uri = format!(
            "magnet:?xt=urn:btih:{HEX_HASH}&dn=Some%20File&tr=udp%3A%2F%2Ftracker.one%3A80&tr=http%3A%2F%2Ftracker.two%2Fannounce&tr=udp%3A%2F%2Ftracker.one%3A80"
        );
        let descriptor = MagnetDescriptor::parse(&uri).unwrap();

        assert_eq!(descriptor.info_hash.to_string(), HEX_HASH);
        assert_eq!(descriptor.display_name.as_deref(), Some("Some File"));
        assert_eq!(
            descriptor.trackers,
            vec![
                "udp://tracker.one:80",
                "http://tracker.two/announce",
                "udp://tracker.one:80"
            ]
        );
        assert!(descriptor.peer_hints.is_empty());
    }

    #[test]
    fn test_parse_uppercase_hex() {
        let uri = format!("magnet:?xt=urn:btih:{}", HEX_HASH.to_uppercase());
        let descriptor = MagnetDescriptor::parse(&uri).unwrap();
        assert_eq!(descriptor.info_hash.to_string(), HEX_HASH);
    }

    #[test]
    fn test_parse_base32_all_a_is_zero_hash() {
        let descriptor =
            MagnetDescriptor::parse("magnet:?xt=urn:btih:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")
                .unwrap();
        assert_eq!(descriptor.info_hash, InfoHash::new([0u8; 20]));
        assert!(descriptor.trackers.is_empty());
        assert_eq!(descriptor.display_name, None);
    }

    #[test]
    fn test_parse_lowercase_base32() {
        let upper = MagnetDescriptor::parse("magnet:?xt=urn:btih:MFRGGZDFMZTWQ2LKNNWG23TPOBYXE43U")
            .unwrap();
        let lower = MagnetDescriptor::parse("magnet:?xt=urn:btih:mfrggzdfmztwq2lknnwg23tpobyxe43u")
            .unwrap();
        assert_eq!(upper.info_hash, lower.info_hash);
    }

    #[test]
    fn test_parse_peer_hints() {
        let uri = format!("magnet:?xt=urn:btih:{HEX_HASH}&x.pe=10.0.0.1%3A6881&x.pe=peer.local:51413");
        let descriptor = MagnetDescriptor::parse(&uri).unwrap();
        assert_eq!(descriptor.peer_hints, vec!["10.0.0.1:6881", "peer.local:51413"]);
    }

    #[test]
    fn test_first_btih_exact_topic_wins() {
        let other = "ffffffffffffffffffffffffffffffffffffffff";
        let uri = format!("magnet:?xt=urn:sha1:XYZ&xt=urn:btih:{HEX_HASH}&xt=urn:btih:{other}");
        let descriptor = MagnetDescriptor::parse(&uri).unwrap();
        assert_eq!(descriptor.info_hash.to_string(), HEX_HASH);
    }

    #[test]
    fn test_unknown_parameters_ignored() {
        let uri = format!("magnet:?xt=urn:btih:{HEX_HASH}&xl=1024&ws=http%3A%2F%2Fseed&so=0-3");
        assert!(MagnetDescriptor::parse(&uri).is_ok());
    }

    #[test]
    fn test_invalid_magnets_rejected() {
        let cases = [
            "http://example.com/?xt=urn:btih:0123456789abcdef0123456789abcdef01234567",
            "magnet:?dn=no-hash",
            "magnet:?xt=urn:btih:0123456789abcdef",
            "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef0123456789",
            "magnet:?xt=urn:btih:zz23456789abcdef0123456789abcdef01234567",
            "magnet:?xt=urn:btih:1AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            "not a uri at all",
        ];

        for uri in cases {
            let result = MagnetDescriptor::parse(uri);
            assert!(
                matches!(result, Err(TorrentError::InvalidMagnetLink { .. })),
                "expected rejection for {uri}"
            );
        }
    }

    #[test]
    fn test_to_uri_encodes_reserved_characters() {
        let descriptor = MagnetDescriptor {
            info_hash: InfoHash::new([0xab; 20]),
            display_name: Some("a&b=c d".to_string()),
            trackers: vec!["http://t.example/announce?key=1&x=2".to_string()],
            peer_hints: Vec::new(),
        };
        let parsed = MagnetDescriptor::parse(&descriptor.to_uri()).unwrap();
        assert_eq!(parsed, descriptor);
    }

    proptest! {
        #[test]
        fn test_magnet_round_trip(
            hash in prop::array::uniform20(any::<u8>()),
            name in proptest::option::of("[ -~]{1,24}"),
            trackers in prop::collection::vec("(udp|http)://[a-z]{1,10}\\.[a-z]{2,3}(:[0-9]{2,5})?(/announce)?", 0..5),
            peers in prop::collection::vec("[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}:[0-9]{1,5}", 0..3),
        ) {
            let descriptor = MagnetDescriptor {
                info_hash: InfoHash::new(hash),
                display_name: name,
                trackers,
                peer_hints: peers,
            };

            let parsed = MagnetDescriptor::parse(&descriptor.to_uri()).unwrap();
            prop_assert_eq!(parsed, descriptor);
        }
    }
}
