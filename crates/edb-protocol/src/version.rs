//! Protocol version negotiation.

use core::fmt;

/// Binary protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    /// Major version.
    pub major: u16,
    /// Minor version.
    pub minor: u16,
}

impl ProtocolVersion {
    /// Version 1.0, the version this client requests.
    pub const V1_0: Self = Self::new(1, 0);

    /// Oldest version the client accepts from a server.
    pub const MIN_SUPPORTED: Self = Self::V1_0;

    /// Create a version.
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Whether the client can speak this version.
    ///
    /// Servers answer the handshake with the version they picked; only the
    /// major version has to match, a lower or higher minor is accepted.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        self.major == Self::MIN_SUPPORTED.major
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V1_0
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_support() {
        assert!(ProtocolVersion::V1_0.is_supported());
        assert!(ProtocolVersion::new(1, 3).is_supported());
        assert!(!ProtocolVersion::new(0, 13).is_supported());
        assert!(!ProtocolVersion::new(2, 0).is_supported());
    }

    #[test]
    fn test_version_display() {
        assert_eq!(ProtocolVersion::new(1, 2).to_string(), "1.2");
    }
}
