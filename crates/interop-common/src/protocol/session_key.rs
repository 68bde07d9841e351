//! Locally generated session key identifiers
//!
//! A 1.1 Join Server may leave `SessionKeyID` out of a JoinAns. The Network
//! Server then needs an identifier anyway, so one is synthesized from a fixed
//! prefix and a ULID.

use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Buffer;

/// Prefix of every synthesized session key ID
pub const GENERATED_SESSION_KEY_ID_PREFIX: &[u8] = b"ttn-lw-interop-generated:";

/// Length of a ULID in bytes
const ULID_LEN: usize = 16;

/// 48-bit big-endian millisecond timestamp followed by 80 random bits
fn ulid() -> [u8; ULID_LEN] {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let mut id = [0u8; ULID_LEN];
    id[..6].copy_from_slice(&millis.to_be_bytes()[2..]);
    rand::thread_rng().fill_bytes(&mut id[6..]);
    id
}

/// Synthesize a session key ID
pub fn generate_session_key_id() -> Buffer {
    let mut id = Vec::with_capacity(GENERATED_SESSION_KEY_ID_PREFIX.len() + ULID_LEN);
    id.extend_from_slice(GENERATED_SESSION_KEY_ID_PREFIX);
    id.extend_from_slice(&ulid());
    Buffer(id)
}

/// Whether a session key ID was synthesized by [`generate_session_key_id`]
pub fn is_generated_session_key_id(id: &[u8]) -> bool {
    id.starts_with(GENERATED_SESSION_KEY_ID_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids() {
        let a = generate_session_key_id();
        let b = generate_session_key_id();
        assert_eq!(a.len(), GENERATED_SESSION_KEY_ID_PREFIX.len() + 16);
        assert!(is_generated_session_key_id(a.as_slice()));
        assert_ne!(a, b);
        assert!(!is_generated_session_key_id(&[0x01, 0x02, 0x03]));
        assert!(!is_generated_session_key_id(b"ttn-lw-interop-generated"));
    }
}
