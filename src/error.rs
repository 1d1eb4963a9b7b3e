use thiserror::Error;

/// Defines the set of errors that can occur within the `sigguard` library.
///
/// Nothing on the fatal-signal path produces one of these: that path has no caller to
/// report to and degrades silently instead (see `CrashReporter::dump`).
#[derive(Error, Debug)]
pub enum SigguardError {
    /// The operating system's entropy source could not deliver the requested bytes.
    ///
    /// This is a hard failure. `SecureRandom::secure_bytes` never hands out a short or
    /// zero-filled buffer in its place.
    #[error("Entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    /// Installing or restoring a signal disposition failed.
    /// Contains the signal name and the OS error description.
    #[error("Signal registration failed: {0}")]
    SignalRegistration(String),

    /// A handler of the given kind has already been installed by this manager.
    #[error("Signal handlers already installed: {0}")]
    AlreadyInstalled(&'static str),

    /// The pre-formatted debugger hint did not fit its fixed-capacity buffer.
    #[error("Crash hint exceeds {0} bytes")]
    CrashHintOverflow(usize),

    /// A process id that does not name a single process (zero or negative).
    #[error("Invalid process id: {0}")]
    InvalidPid(i32),

    /// A string handed to `decode_id` was not a hexadecimal identifier.
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// An I/O error, for instance when signalling another process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) type Result<T> = std::result::Result<T, SigguardError>;
