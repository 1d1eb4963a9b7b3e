use crate::error::{Result, SigguardError};
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out `"<pid>/<counter>"` identifiers, unique within one running process.
///
/// Uniqueness across restarts is only as good as the OS's pid reuse policy.
#[derive(Debug, Default)]
pub struct ProcessIdentity {
    counter: AtomicU64,
}

impl ProcessIdentity {
    /// Creates an identity source whose counter starts at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next identifier for this process.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}/{}", std::process::id(), n)
    }
}

/// Encodes `number` as lowercase hex, zero-padded to at least `padding` digits.
pub fn encode_id(number: u64, padding: usize) -> String {
    format!("{:0width$x}", number, width = padding)
}

/// Parses an identifier produced by [`encode_id`].
pub fn decode_id(s: &str) -> Result<u64> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.starts_with('+') {
        return Err(SigguardError::InvalidId(s.to_owned()));
    }
    u64::from_str_radix(trimmed, 16).map_err(|e| SigguardError::InvalidId(format!("{}: {}", s, e)))
}
