/// Well-known static DDP sockets.
pub const RTMP_SOCKET: u8 = 1;
pub const NBP_SOCKET: u8 = 2;
pub const ECHO_SOCKET: u8 = 4;
pub const ZIP_SOCKET: u8 = 6;

/// DDP protocol type numbers.
pub const DDP_TYPE_RTMP_DATA: u8 = 1;
pub const DDP_TYPE_NBP: u8 = 2;
pub const DDP_TYPE_ATP: u8 = 3;
pub const DDP_TYPE_ECHO: u8 = 4;
pub const DDP_TYPE_RTMP_REQUEST: u8 = 5;
pub const DDP_TYPE_ZIP: u8 = 6;

/// The largest DDP payload a single datagram may carry.
pub const MAX_DDP_PAYLOAD: usize = 586;

/// The largest link-layer payload any driver has to accept. DDP header plus
/// payload plus link framing always fits below this.
pub const MAX_LINK_PAYLOAD: usize = 600;

pub const MAX_HOP_COUNT: u8 = 15;

/// Network numbers 1-65279 are assignable. 65280-65534 form the startup
/// range used transiently by nodes which have not learned their network yet.
pub const FIRST_VALID_NETWORK: u16 = 1;
pub const LAST_VALID_NETWORK: u16 = 65279;
pub const STARTUP_RANGE_FIRST: u16 = 65280;
pub const STARTUP_RANGE_LAST: u16 = 65534;

pub const BROADCAST_NODE: u8 = 255;

/// Node 0 addresses "any router" on the destination network.
pub const ANY_ROUTER_NODE: u8 = 0;

pub const RTMP_SEND_INTERVAL_SECS: u64 = 10;
pub const ROUTE_AGING_INTERVAL_SECS: u64 = 20;

pub const ZIP_SEND_INTERVAL_SECS: u64 = 1;
pub const ZIP_QUERY_TIMEOUT_SECS: u64 = 10;

pub const PROBE_INTERVAL_MS: u64 = 200;
pub const PROBE_ATTEMPTS: u32 = 10;

/// Candidate node addresses tried before a port gives up with `AddressInUse`.
pub const MAX_NODE_CANDIDATES: u32 = 32;

pub const AMT_ENTRY_TTL_SECS: u64 = 30;

pub const NETWORK_DISCOVERY_TIMEOUT_SECS: u64 = 60;
pub const NETWORK_DISCOVERY_RETRY_SECS: u64 = 5;

/// How long `Router::stop` waits for every task to settle.
pub const STOP_SETTLE_TIMEOUT_SECS: u64 = 2;
