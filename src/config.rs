//! Runtime configuration, resolved once at setup time.
//!
//! Nothing here is consulted from inside a signal handler; handlers only see the
//! values that were copied out of a `Config` when they were installed.

use log::warn;
use std::time::Duration;

/// Environment variable enabling debug mode: when set and non-empty, the fatal-signal
/// handler prints debugger-attach instructions and pauses before dumping.
pub const DEBUG_ENV_VAR: &str = "SIGGUARD_DEBUG";

/// Optional override, in whole seconds, for the debug-mode pause.
pub const DEBUG_PAUSE_ENV_VAR: &str = "SIGGUARD_DEBUG_PAUSE_SECS";

/// Default length of the debug-mode pause.
pub const DEFAULT_DEBUG_PAUSE: Duration = Duration::from_secs(30);

/// Upper bound on the number of frames captured in a crash backtrace.
pub const MAX_FRAMES: usize = 50;

/// Settings for the signal and crash-reporting machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Label placed at the front of every signal-context log line.
    pub log_name: String,
    /// Descriptor that signal-context log lines and backtraces are written to.
    pub log_fd: i32,
    /// Whether the fatal handler prints the attach hint and pauses.
    pub debug_mode: bool,
    /// How long the fatal handler pauses in debug mode.
    pub debug_pause: Duration,
    /// Frames to capture per backtrace; clamped to [`MAX_FRAMES`].
    pub max_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_name: "sigguard".to_owned(),
            log_fd: libc::STDERR_FILENO,
            debug_mode: false,
            debug_pause: DEFAULT_DEBUG_PAUSE,
            max_frames: MAX_FRAMES,
        }
    }
}

impl Config {
    /// Builds a configuration from the process environment on top of the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup. Used by `from_env` and by tests
    /// that must not mutate the real environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.debug_mode = lookup(DEBUG_ENV_VAR).is_some_and(|v| !v.is_empty());

        if let Some(raw) = lookup(DEBUG_PAUSE_ENV_VAR) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.debug_pause = Duration::from_secs(secs),
                Err(e) => warn!(
                    "Ignoring {}={:?}: {}; keeping {:?}",
                    DEBUG_PAUSE_ENV_VAR, raw, e, config.debug_pause
                ),
            }
        }

        config
    }

    /// Sets the label used in signal-context log lines.
    pub fn with_log_name(mut self, name: impl Into<String>) -> Self {
        self.log_name = name.into();
        self
    }

    /// Redirects signal-context output to `fd`.
    pub fn with_log_fd(mut self, fd: i32) -> Self {
        self.log_fd = fd;
        self
    }

    /// Sets the number of frames captured per backtrace.
    pub fn with_max_frames(mut self, frames: usize) -> Self {
        self.max_frames = frames;
        self
    }

    /// Frame budget actually used by the crash reporter.
    pub(crate) fn frame_budget(&self) -> usize {
        self.max_frames.min(MAX_FRAMES)
    }

    /// The debug pause in whole seconds, as `sleep(3)` expects it.
    pub(crate) fn pause_secs(&self) -> u32 {
        u32::try_from(self.debug_pause.as_secs()).unwrap_or(u32::MAX)
    }
}
