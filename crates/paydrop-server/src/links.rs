use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};

/// Opaque share link: 6 random bytes as URL-safe base64 (8 characters).
pub fn generate_share_link() -> String {
    let bytes: [u8; 6] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn calculate_expiry(now: DateTime<Utc>, duration_days: i64) -> DateTime<Utc> {
    now + Duration::days(duration_days)
}

/// The expiry instant itself counts as expired.
pub fn is_expired(expiry: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= expiry
}
