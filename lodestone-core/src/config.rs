//! Centralized configuration for Lodestone.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Central configuration for a resolution run.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct LodestoneConfig {
    pub resolver: ResolverConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

/// Poll loop and output settings for the resolution controller.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Sleep between two polls of the session event queue
    pub poll_interval: Duration,
    /// Wall-clock ceiling for the metadata wait
    pub timeout: Duration,
    /// Value of the `created by` field in written torrents
    pub created_by: String,
    /// Whether written torrents carry a `creation date` field
    pub include_creation_date: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
            created_by: concat!("lodestone/", env!("CARGO_PKG_VERSION")).to_string(),
            include_creation_date: false,
        }
    }
}

/// Network communication and tracker configuration.
///
/// Controls tracker and peer timeouts, connection limits and the
/// metadata size ceiling enforced against untrusted peers.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Timeout for a single tracker announce (HTTP or UDP)
    pub tracker_timeout: Duration,
    /// Interval between tracker announces while no peer is connected
    pub reannounce_interval: Duration,
    /// TCP (or proxy) connect timeout for peers
    pub connect_timeout: Duration,
    /// Idle read timeout on an established peer connection
    pub peer_timeout: Duration,
    /// User agent for HTTP tracker requests
    pub user_agent: &'static str,
    /// Maximum concurrent peer connections
    pub max_peer_connections: usize,
    /// Port reported to trackers
    pub announce_port: u16,
    /// Largest `metadata_size` a peer may announce
    pub max_metadata_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tracker_timeout: Duration::from_secs(15),
            reannounce_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            peer_timeout: Duration::from_secs(20),
            user_agent: concat!("lodestone/", env!("CARGO_PKG_VERSION")),
            max_peer_connections: 50,
            announce_port: 6881,
            max_metadata_size: 16 * 1024 * 1024, // 16 MiB
        }
    }
}

/// Output file handling.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Suffix of the sibling file written before the final rename
    pub temp_file_suffix: &'static str,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_file_suffix: ".tmp",
        }
    }
}

impl LodestoneConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`; unparsable values are ignored and
    /// zero poll intervals or peer limits are raised to one.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(interval) = lookup("LODESTONE_POLL_INTERVAL_MS")
            && let Ok(millis) = interval.parse::<u64>()
        {
            config.resolver.poll_interval = Duration::from_millis(millis.max(1));
        }

        if let Some(timeout) = lookup("LODESTONE_TIMEOUT_SECS")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.resolver.timeout = Duration::from_secs(seconds);
        }

        if let Some(max_peers) = lookup("LODESTONE_MAX_PEERS")
            && let Ok(count) = max_peers.parse::<usize>()
        {
            config.network.max_peer_connections = count.max(1);
        }

        if let Some(timeout) = lookup("LODESTONE_TRACKER_TIMEOUT_SECS")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.network.tracker_timeout = Duration::from_secs(seconds);
        }

        config
    }
}

/// Which peer transports a session may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// TCP only, uTP disabled
    TcpOnly,
    /// uTP only, TCP disabled in both directions
    UdpOnly,
    /// Both transports, UDP trackers tried first
    BothPreferringUdp,
    /// Both transports, no preference
    #[default]
    Both,
}

impl TransportMode {
    /// Maps the `--tcp` / `--udp` flag pair onto a transport mode.
    ///
    /// Neither flag permits both with no preference. Both flags keep TCP
    /// available but prefer UDP trackers. Exactly one flag disables the other.
    pub fn from_flags(tcp: bool, udp: bool) -> Self {
        match (tcp, udp) {
            (false, false) => TransportMode::Both,
            (true, false) => TransportMode::TcpOnly,
            (false, true) => TransportMode::UdpOnly,
            (true, true) => TransportMode::BothPreferringUdp,
        }
    }
}

/// Proxy host and port used in anonymous mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

impl ProxyEndpoint {
    /// Creates proxy endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for ProxyEndpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", 9050)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ProxyEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("Invalid proxy address: {s}"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| format!("Missing proxy port: {s}"))?;
            (host, port)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| format!("Missing proxy port: {s}"))?
        };

        if host.is_empty() {
            return Err(format!("Invalid proxy address: {s}"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("Invalid proxy port: {s}"))?;

        Ok(Self::new(host, port))
    }
}

/// Session settings for one resolution attempt.
///
/// Built once from parsed options and passed by value into session
/// creation. The accessor methods are the effective settings: anonymity
/// overrides the individual discovery flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionConfig {
    pub transport_mode: TransportMode,
    pub anonymous: bool,
    pub proxy_endpoint: Option<ProxyEndpoint>,
    pub enable_dht: bool,
    pub enable_lsd: bool,
    pub enable_upnp_natpmp: bool,
}

impl SessionConfig {
    /// Creates session configuration from transport flags and anonymity.
    ///
    /// Anonymous mode without an explicit proxy routes through the default
    /// local SOCKS5 endpoint.
    pub fn from_flags(tcp: bool, udp: bool, anonymous: bool) -> Self {
        Self {
            transport_mode: TransportMode::from_flags(tcp, udp),
            anonymous,
            proxy_endpoint: anonymous.then(ProxyEndpoint::default),
            ..Self::default()
        }
    }

    pub fn enable_outgoing_tcp(&self) -> bool {
        self.transport_mode != TransportMode::UdpOnly
    }

    pub fn enable_incoming_tcp(&self) -> bool {
        self.transport_mode != TransportMode::UdpOnly
    }

    pub fn enable_outgoing_utp(&self) -> bool {
        self.transport_mode != TransportMode::TcpOnly
    }

    pub fn enable_incoming_utp(&self) -> bool {
        self.transport_mode != TransportMode::TcpOnly
    }

    pub fn prefer_udp_trackers(&self) -> bool {
        matches!(
            self.transport_mode,
            TransportMode::UdpOnly | TransportMode::BothPreferringUdp
        )
    }

    pub fn dht_enabled(&self) -> bool {
        self.enable_dht && !self.anonymous
    }

    pub fn lsd_enabled(&self) -> bool {
        self.enable_lsd && !self.anonymous
    }

    pub fn upnp_natpmp_enabled(&self) -> bool {
        self.enable_upnp_natpmp && !self.anonymous
    }

    /// Proxy that peer and tracker connections must route through.
    ///
    /// `None` outside anonymous mode; the default local endpoint when
    /// anonymous mode is on but no endpoint was configured.
    pub fn effective_proxy(&self) -> Option<ProxyEndpoint> {
        if !self.anonymous {
            return None;
        }
        Some(self.proxy_endpoint.clone().unwrap_or_default())
    }
}
