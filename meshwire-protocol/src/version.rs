//! Protocol version tags and negotiation.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    /// Original frame layout.
    V1,
    /// V1 plus a reserved flags byte in every message frame.
    V2,
}

impl ProtocolVersion {
    /// All versions this build can speak, ascending.
    pub const ALL: [ProtocolVersion; 2] = [ProtocolVersion::V1, ProtocolVersion::V2];

    /// Wire tag carried in the handshake frame.
    pub const fn number(self) -> u16 {
        match self {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
        }
    }

    pub fn from_number(n: u16) -> Option<Self> {
        match n {
            1 => Some(ProtocolVersion::V1),
            2 => Some(ProtocolVersion::V2),
            _ => None,
        }
    }

    /// The newest version this build can speak.
    pub fn latest() -> Self {
        ProtocolVersion::V2
    }

    /// Picks the highest supported version not above the peer's offer.
    ///
    /// Returns `None` when the peer is older than everything we speak, in
    /// which case the connection cannot proceed.
    pub fn negotiate(peer_version: u16) -> Option<Self> {
        Self::ALL
            .into_iter()
            .filter(|v| v.number() <= peer_version)
            .max_by_key(|v| v.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_roundtrip() {
        for v in ProtocolVersion::ALL {
            assert_eq!(ProtocolVersion::from_number(v.number()), Some(v));
        }
        assert_eq!(ProtocolVersion::from_number(0), None);
        assert_eq!(ProtocolVersion::from_number(99), None);
    }

    #[test]
    fn test_negotiate_prefers_highest_common() {
        // Peer speaks everything we do: pick the newest.
        assert_eq!(
            ProtocolVersion::negotiate(ProtocolVersion::latest().number()),
            Some(ProtocolVersion::V2)
        );
        // Peer is capped at V1: meet it there.
        assert_eq!(ProtocolVersion::negotiate(1), Some(ProtocolVersion::V1));
        // Peer is newer than this build: still the newest we speak.
        assert_eq!(ProtocolVersion::negotiate(50), Some(ProtocolVersion::V2));
    }

    #[test]
    fn test_negotiate_rejects_older_peer() {
        assert_eq!(ProtocolVersion::negotiate(0), None);
    }
}
