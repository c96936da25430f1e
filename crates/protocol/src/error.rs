use std::fmt;
use std::io;

/// Errors raised while synchronizing the reader against sentinel boundaries.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FramingError {
    /// The channel reported an orderly disconnect while a response was
    /// mandatory.
    Disconnected {
        /// Bytes accumulated before the transport closed.
        received: usize,
    },
    /// The deadline expired before the awaited delimiter arrived.
    SyncTimeout {
        /// The delimiter bytes the reader was waiting for.
        needle: Vec<u8>,
        /// Bytes accumulated before the deadline expired.
        received: usize,
    },
}

impl FramingError {
    /// Returns the number of bytes read before the failure.
    ///
    /// Callers diagnosing a desynchronized session log this to show how far
    /// the capture progressed before the transport gave out; exposing it here
    /// keeps them from parsing the rendered message.
    #[must_use]
    pub const fn received(&self) -> usize {
        match self {
            Self::Disconnected { received } | Self::SyncTimeout { received, .. } => *received,
        }
    }

    /// Returns the delimiter that was being awaited, if the failure was a
    /// timeout.
    #[must_use]
    pub fn needle(&self) -> Option<&[u8]> {
        match self {
            Self::SyncTimeout { needle, .. } => Some(needle.as_slice()),
            Self::Disconnected { .. } => None,
        }
    }
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected { received } => {
                write!(
                    f,
                    "channel disconnected while awaiting a mandatory response ({received} bytes read)"
                )
            }
            Self::SyncTimeout { needle, received } => {
                write!(
                    f,
                    "timed out waiting for delimiter {:?} ({received} bytes read)",
                    String::from_utf8_lossy(needle)
                )
            }
        }
    }
}

impl std::error::Error for FramingError {}

impl From<FramingError> for io::Error {
    fn from(err: FramingError) -> Self {
        let kind = match &err {
            FramingError::Disconnected { .. } => io::ErrorKind::UnexpectedEof,
            FramingError::SyncTimeout { .. } => io::ErrorKind::TimedOut,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reports_progress() {
        let err = FramingError::SyncTimeout {
            needle: b"f00dfeed".to_vec(),
            received: 42,
        };
        assert_eq!(
            err.to_string(),
            "timed out waiting for delimiter \"f00dfeed\" (42 bytes read)"
        );
    }

    #[test]
    fn io_conversion_preserves_kind() {
        let disconnected: io::Error = FramingError::Disconnected { received: 7 }.into();
        assert_eq!(disconnected.kind(), io::ErrorKind::UnexpectedEof);

        let timeout: io::Error = FramingError::SyncTimeout {
            needle: vec![1, 2],
            received: 0,
        }
        .into();
        assert_eq!(timeout.kind(), io::ErrorKind::TimedOut);
    }
}
