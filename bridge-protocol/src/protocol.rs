use std::fmt::Display;

/// The version of the XVC protocol.
/// A version always consists of a major and a minor part.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Version {
    major: usize,
    minor: usize,
}

impl Version {
    /// Version 1.0 of the protocol
    pub const V1_0: Version = Version { major: 1, minor: 0 };

    /// The major part of the version
    pub fn major(&self) -> usize {
        self.major
    }

    /// The minor part of the version
    pub fn minor(&self) -> usize {
        self.minor
    }
}

#[test]
fn version_ordering() {
    assert!(Version { major: 1, minor: 0 } < Version { major: 1, minor: 1 });
    assert!(Version { major: 2, minor: 0 } > Version { major: 1, minor: 0 });
}

impl Default for Version {
    fn default() -> Self {
        Self::V1_0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Shift capacity of the bridge, in bytes per vector.
///
/// A shift carries a TMS and a TDI vector, so the session buffer holds twice this amount.
pub const DEFAULT_MAX_VECTOR_LEN: u32 = 512;

/// An XVC request sent from the client to the bridge.
///
/// The bridge answers every message before reading the next one.
/// Only one XVC client is served at a time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    /// Requests the protocol version and the shift capacity of the bridge.
    GetInfo,
    /// Requests a TCK period. The bridge clocks at a fixed rate and echoes the request back.
    SetTck { period_ns: u32 },
    /// Shifts JTAG vectors through the target.
    Shift {
        /// number of TCK cycles to clock
        num_bits: u32,
        /// TMS bits, LSB first, `num_bits` rounded up to whole bytes
        tms: Box<[u8]>,
        /// TDI bits, LSB first, `num_bits` rounded up to whole bytes
        tdi: Box<[u8]>,
    },
}

/// The reply to [`Message::GetInfo`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct XvcInfo {
    version: Version,
    max_vector_len: u32,
}

impl XvcInfo {
    /// Creates a new info object from version and the maximum receivable vector length.
    pub fn new(version: Version, max_vector_len: u32) -> XvcInfo {
        XvcInfo {
            version,
            max_vector_len,
        }
    }

    /// The version of the protocol
    pub fn version(&self) -> Version {
        self.version
    }

    /// the max width of a single vector, in bytes, that can be shifted into the bridge
    pub fn max_vector_len(&self) -> u32 {
        self.max_vector_len
    }
}

impl Default for XvcInfo {
    fn default() -> XvcInfo {
        XvcInfo {
            version: Version::default(),
            max_vector_len: DEFAULT_MAX_VECTOR_LEN,
        }
    }
}
