//! Token expiration parsing

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::consts::EXPIRATION_MARGIN_HOURS;

const SERVER_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Convert the server's `expirationTime` into the instant the token should
/// be refreshed, which is the server expiry minus a fixed margin.
pub fn convert_expiration_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let expires = NaiveDateTime::parse_from_str(raw, SERVER_TIME_FORMAT)?.and_utc();
    Ok(expires - Duration::hours(EXPIRATION_MARGIN_HOURS))
}

/// Parse an `expiration_time` read back from entry data.
///
/// Entries written by this integration hold RFC 3339. Older entries may hold
/// a naive ISO timestamp, read as UTC.
pub fn parse_stored_expiration(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
