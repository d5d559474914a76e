//! Document identifiers: 12 bytes rendered as 24 lowercase hex characters.
//!
//! The first four bytes are the big-endian creation time in seconds, the
//! remaining eight are random.

use chrono::Utc;
use rand::RngCore;

/// Length of an identifier in hex characters
pub const IDENTIFIER_LEN: usize = 24;

/// Whether `s` has the identifier shape
pub fn is_identifier(s: &str) -> bool {
    s.len() == IDENTIFIER_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Generate a fresh identifier
pub fn generate_identifier() -> String {
    let mut bytes = [0u8; 12];
    let seconds = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
    bytes[..4].copy_from_slice(&seconds.to_be_bytes());
    rand::thread_rng().fill_bytes(&mut bytes[4..]);

    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
