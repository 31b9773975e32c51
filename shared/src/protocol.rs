/// mDNS service type for bridge self-advertisement
pub const BRIDGE_SERVICE_TYPE: &str = "_guestswitch._tcp.local.";

/// TXT record keys used in bridge self-advertisement
pub const TXT_API_PORT: &str = "api";
pub const TXT_VERSION: &str = "version";

/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// Port the hypervisor management API listens on unless configured otherwise
pub const DEFAULT_PVE_PORT: u16 = 8006;

/// User for password authentication when none is configured
pub const DEFAULT_PVE_USER: &str = "root@pam";

/// A cached power state younger than this is served without an upstream query
pub const FRESHNESS_WINDOW_SECS: u64 = 10;

/// Polling intervals below this floor disable polling
pub const MIN_POLLING_INTERVAL_SECS: u64 = 10;
