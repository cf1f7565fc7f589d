//! Fixed policy constants. These must match bit-for-bit between the eBPF
//! programs and the userspace tooling.

/// 169.254.169.254 as a host-order integer.
pub const METADATA_ADDR: u32 = 0xA9FE_A9FE;

pub const METADATA_PORT: u16 = 80;

/// The only method that may reach the metadata service.
pub const TOKEN_METHOD: &[u8; 3] = b"PUT";

/// IMDSv2 token bootstrap path.
pub const TOKEN_PATH: &[u8; 17] = b"/latest/api/token";

/// Token path followed by the request-line separator. The matcher compares
/// all 18 bytes, so `/latest/api/tokens` is rejected.
pub const TOKEN_PATH_MATCH: &[u8; 18] = b"/latest/api/token ";

/// Lookahead for the method/path separator, counted from the payload start.
pub const REQUEST_LINE_WINDOW: usize = 200;

/// Distinct sources tracked by the blocked-attempts store.
pub const BLOCKED_ATTEMPTS_CAPACITY: u32 = 1000;

/// Distinct sources tracked by the allowed-token-requests store.
pub const TOKEN_REQUESTS_CAPACITY: u32 = 100;

// Map and program names shared with the loader
pub const BLOCKED_ATTEMPTS_MAP: &str = "BLOCKED_ATTEMPTS";
pub const TOKEN_REQUESTS_MAP: &str = "TOKEN_REQUESTS";
pub const XDP_PROGRAM: &str = "xdp_metadata_blocker";
pub const TC_PROGRAM: &str = "tc_metadata_blocker";
pub const SOCKET_PROGRAM: &str = "socket_metadata_filter";
