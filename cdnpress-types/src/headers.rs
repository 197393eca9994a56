//! Header names and values of the client/server wire contract.

/// Requested response body size in bytes, sent by the client.
pub const PRESS_SIZE: &str = "x-press-size";

/// Default name of the header carrying an opaque request id for log correlation.
pub const DEFAULT_REQUEST_ID: &str = "trace-id";

/// Default name of the response header that indicates a cache hit.
pub const DEFAULT_CACHE_INDICATOR: &str = "x-cache";

/// Substring of the cache indicator header that marks a hit.
pub const CACHE_HIT_MARKER: &str = "HIT";

/// Hex encoded MD5 digest of the response bytes as they were sent on the wire.
pub const CONTENT_MD5: &str = "x-content-md5";

/// Prefix of the `User-Agent` sent by load generator workers.
pub const USER_AGENT_PREFIX: &str = "PressureTestClient";
