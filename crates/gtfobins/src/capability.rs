use std::fmt;
use std::ops::BitOr;

/// Bitflag set of capabilities a catalog binary offers.
///
/// A binary may carry several methods per capability; the set summarizes
/// what any of its methods can do.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Capability(u8);

impl Capability {
    /// File read.
    pub const READ: Self = Self(1);
    /// File write.
    pub const WRITE: Self = Self(1 << 1);
    /// Shell access.
    pub const SHELL: Self = Self(1 << 2);
    /// Every capability; the catalog-wide search default.
    pub const ALL: Self = Self(0b111);

    /// Whether every capability in `other` is present in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether `self` and `other` share any capability.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Parses a catalog `type` field. Unknown values are load-time errors.
    #[must_use]
    pub fn from_catalog_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "read" => Some(Self::READ),
            "write" => Some(Self::WRITE),
            "shell" => Some(Self::SHELL),
            _ => None,
        }
    }
}

impl BitOr for Capability {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::READ) {
            names.push("read");
        }
        if self.contains(Self::WRITE) {
            names.push("write");
        }
        if self.contains(Self::SHELL) {
            names.push("shell");
        }
        f.write_str(&names.join("|"))
    }
}

/// The streaming discipline a single method uses to move bytes through the
/// text-oriented shell.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stream {
    /// Data appears verbatim in terminal-visible output. Only safe for
    /// content that round-trips through line printing; writes are guarded
    /// against non-printable bytes before anything is sent.
    Print,
    /// Exact byte-for-byte passthrough. Writes require a known length up
    /// front: a raw byte channel has no other EOF signal.
    Raw,
    /// Base64 text on the wire, decoded/encoded around the raw stream.
    Base64,
    /// Hex text on the wire, decoded/encoded around the raw stream.
    Hex,
}

impl Stream {
    /// Whether the mode needs a codec adapter around the raw stream.
    #[must_use]
    pub const fn is_encoded(self) -> bool {
        matches!(self, Self::Base64 | Self::Hex)
    }

    /// Whether a write through this mode needs the total length declared.
    #[must_use]
    pub const fn requires_length_for_write(self) -> bool {
        matches!(self, Self::Raw)
    }

    /// Parses a catalog `stream` field. Unknown values are load-time errors.
    #[must_use]
    pub fn from_catalog_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "print" => Some(Self::Print),
            "raw" => Some(Self::Raw),
            "base64" => Some(Self::Base64),
            "hex" => Some(Self::Hex),
            _ => None,
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Print => 1,
            Self::Raw => 1 << 1,
            Self::Base64 => 1 << 2,
            Self::Hex => 1 << 3,
        }
    }
}

/// Bitflag filter over [`Stream`] modes used when searching the catalog.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct StreamSet(u8);

impl StreamSet {
    /// Accepts every stream mode.
    pub const ANY: Self = Self(0b1111);
    /// Accepts no stream mode; useful as a fold seed.
    pub const NONE: Self = Self(0);

    /// Set containing exactly `mode`.
    #[must_use]
    pub const fn only(mode: Stream) -> Self {
        Self(mode.bit())
    }

    /// Whether `mode` is accepted by this filter.
    #[must_use]
    pub const fn accepts(self, mode: Stream) -> bool {
        self.0 & mode.bit() != 0
    }

    /// Returns the filter with `mode` removed.
    #[must_use]
    pub const fn without(self, mode: Stream) -> Self {
        Self(self.0 & !mode.bit())
    }

    /// Returns the filter with `mode` added.
    #[must_use]
    pub const fn with(self, mode: Stream) -> Self {
        Self(self.0 | mode.bit())
    }
}

impl Default for StreamSet {
    fn default() -> Self {
        Self::ANY
    }
}
