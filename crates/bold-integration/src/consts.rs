//! Constants shared by the Bold integration

use std::time::Duration;

pub const DOMAIN: &str = "bold";
pub const MANUFACTURER: &str = "Bold";

// Entry data keys
pub const CONF_EMAIL: &str = "email";
pub const CONF_PASSWORD: &str = "password";
pub const CONF_TOKEN: &str = "token";
pub const CONF_EXPIRATION_TIME: &str = "expiration_time";
pub const CONF_VERIFICATION_CODE: &str = "verification_code";
pub const CONF_VALIDATION_ID: &str = "validation_id";
pub const CONF_AUTH_IMPLEMENTATION: &str = "auth_implementation";

/// Polling interval for session-token entries
pub const SESSION_SCAN_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Polling interval for OAuth2 entries
pub const OAUTH_SCAN_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Per-request timeout for coordinator and config flow calls
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before retrying a token refresh that could not reach the server
pub const TOKEN_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Longest activation window accepted from the server
pub const MAX_ACTIVATION_SECS: u64 = 24 * 60 * 60;

/// OAuth2 tokens expiring within this many seconds are refreshed first
pub const OAUTH_CLOCK_SKEW_SECS: i64 = 20;

/// Subtracted from the server's token expiration to get the refresh instant
pub const EXPIRATION_MARGIN_HOURS: i64 = 3;

// Entity attributes
pub const ATTR_BATTERY_LAST_MEASUREMENT: &str = "battery_last_measurement";
pub const ATTR_BATTERY_LEVEL: &str = "battery_level";
pub const ATTR_DEVICE_ID: &str = "device_id";
pub const ATTR_GATEWAY_ID: &str = "gateway_id";
pub const ATTR_UPDATE_AVAILABLE: &str = "update_available";
pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";
pub const ATTR_ICON: &str = "icon";

pub const ICON_UNLOCKED: &str = "mdi:door-open";
pub const ICON_LOCKED: &str = "mdi:door-closed-lock";
