use std::fmt;
use std::fmt::Write as _;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};

/// Length in characters of every sentinel token.
pub const TOKEN_LEN: usize = 20;

/// Process-wide counter folded into every token.
///
/// The counter prefix makes sequential tokens distinct by construction, not
/// merely by collision probability: two tokens generated by the same process
/// can never render the same text until the counter wraps.
static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A random alphanumeric sentinel marking one boundary of a command's output.
///
/// Tokens are lowercase hex, [`TOKEN_LEN`] characters: an 8-character counter
/// prefix followed by 12 characters of a digest over the counter, the current
/// time, and the process id. A token appearing verbatim in normal command
/// output is an accepted, astronomically unlikely correctness risk; no
/// mitigation beyond token length and unpredictability is attempted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SentinelToken(String);

impl SentinelToken {
    /// Generates a fresh token.
    #[must_use]
    pub fn generate() -> Self {
        let counter = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut material = [0u8; 24];
        material[..8].copy_from_slice(&counter.to_le_bytes());
        material[8..16].copy_from_slice(&timestamp.as_secs().to_le_bytes());
        material[16..20].copy_from_slice(&timestamp.subsec_micros().to_le_bytes());
        material[20..24].copy_from_slice(&process::id().to_le_bytes());

        let mut hasher = Md5::new();
        hasher.update(material);
        let digest = hasher.finalize();

        let mut text = String::with_capacity(TOKEN_LEN);
        write!(text, "{:08x}", (counter & u64::from(u32::MAX)) as u32)
            .expect("writing to a String cannot fail");
        for byte in digest.iter().take(6) {
            write!(text, "{byte:02x}").expect("writing to a String cannot fail");
        }
        debug_assert_eq!(text.len(), TOKEN_LEN);

        Self(text)
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the token bytes as they appear on the wire.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for SentinelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The start/end sentinel pair framing one command invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SentinelPair {
    /// Token echoed immediately before the command's output begins.
    pub start: SentinelToken,
    /// Token echoed after the command terminates, on success and failure.
    pub end: SentinelToken,
}

impl SentinelPair {
    /// Generates a fresh, distinct start/end pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            start: SentinelToken::generate(),
            end: SentinelToken::generate(),
        }
    }
}
