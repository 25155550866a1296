//! # meshwire-protocol
//!
//! Wire protocol for the meshwire cluster messaging transport.
//!
//! This crate provides:
//! - Request/Reply message envelopes and status codes
//! - The 6-byte connection handshake frame
//! - Versioned, length-delimited binary framing
//! - Streaming encoder/decoder bound to a negotiated version

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod version;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{Handshake, HANDSHAKE_LEN};
pub use message::{Address, ProtocolMessage, Reply, Request, Status};
pub use version::ProtocolVersion;

/// Maximum message payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Computes a stable 32-bit hash of a string.
///
/// Both sides of a connection derive the handshake preamble from the cluster
/// name with this function, and the channel pool derives slot offsets from
/// subjects with it, so it must produce identical values on every peer. It is
/// the classic 31-based polynomial over the UTF-8 bytes with wrapping
/// arithmetic; do not change it without a protocol version bump.
pub fn hash32(s: &str) -> i32 {
    let mut h: i32 = 0;
    for b in s.bytes() {
        h = h.wrapping_mul(31).wrapping_add(b as i32);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash32_deterministic() {
        assert_eq!(hash32("cluster-a"), hash32("cluster-a"));
        assert_ne!(hash32("cluster-a"), hash32("cluster-b"));
        assert_eq!(hash32(""), 0);
    }

    #[test]
    fn test_hash32_known_values() {
        // Pinned so an accidental change to the hash shows up in CI rather
        // than as a cross-version handshake failure.
        assert_eq!(hash32("a"), 97);
        assert_eq!(hash32("ab"), 97 * 31 + 98);
    }

    #[test]
    fn test_hash32_spreads_modulo_pool_size() {
        // Single-letter subjects land in distinct slots of an 8-wide pool.
        let offsets: std::collections::HashSet<i32> = ["a", "b", "c", "d", "e", "f", "g", "h"]
            .iter()
            .map(|s| (hash32(s) % 8).abs())
            .collect();
        assert_eq!(offsets.len(), 8);
    }
}
