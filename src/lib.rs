//! # sigguard
//!
//! `sigguard` gives a long-running Unix service three pieces of process-level plumbing:
//!
//! - **Cooperative termination**: hangup, interrupt, quit and terminate set a flag that the
//!   host polls, and log a single line the first time.
//! - **Crash diagnostics**: segmentation faults, bus errors, aborts, illegal instructions
//!   and floating-point exceptions log the signal, optionally print debugger-attach
//!   instructions and pause, dump a symbolised backtrace, then re-raise so the default
//!   action (core dump, termination status) still happens.
//! - **Secure randomness**: a thread-safe generator for numeric draws, plus tokens for
//!   filenames and directory names taken straight from the OS entropy source.
//!
//! Signal-context code is confined to a small set of allocation-free, lock-free helpers;
//! everything the handlers read is prepared when they are installed.
//!
//! ## Key Components
//!
//! - `ProcessContext`: the termination flag, identifier counter and generator, built
//!   explicitly or shared through `ProcessContext::global()`.
//! - `SignalManager` and `HandlerTable`: install and remove handlers.
//! - `CrashReporter`: a signal-safe backtrace writer.
//! - `SecureRandom`: random integers, bytes, strings and directory tokens.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sigguard::{HandlerTable, ProcessContext, SignalManager, SigguardError};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), SigguardError> {
//!     let context = ProcessContext::global();
//!     let signals = SignalManager::new(context.clone());
//!     signals.install(&HandlerTable::standard())?;
//!
//!     let work_dir = context.random().directory_token_default()?;
//!     println!("working in /tmp/{}", work_dir);
//!
//!     while !context.is_termination_requested() {
//!         // serve one request
//!         std::thread::sleep(Duration::from_millis(100));
//!     }
//!
//!     signals.uninstall()
//! }
//! ```

mod config;
mod error;
mod identity;
mod random;

#[cfg(unix)]
mod context;
#[cfg(unix)]
mod crash;
#[cfg(unix)]
mod signal_log;
#[cfg(unix)]
mod signal_names;
#[cfg(unix)]
mod signal_safe;
#[cfg(unix)]
mod signals;

#[cfg(all(test, unix))]
mod test_utils;

pub use config::{Config, DEBUG_ENV_VAR, DEBUG_PAUSE_ENV_VAR, DEFAULT_DEBUG_PAUSE, MAX_FRAMES};
pub use error::SigguardError;
pub use identity::{decode_id, encode_id, ProcessIdentity};
pub use random::{EntropySource, OsEntropy, ReseedSource, SecureRandom, DEFAULT_TOKEN_LEN};

#[cfg(unix)]
pub use context::ProcessContext;
#[cfg(unix)]
pub use crash::{CrashReporter, DumpOutcome};
#[cfg(unix)]
pub use signal_names::signal_name;
#[cfg(unix)]
pub use signals::{
    request_termination, HandlerKind, HandlerTable, SignalManager, FATAL_SIGNALS,
    TERMINATION_SIGNALS,
};

#[cfg(test)]
use ctor::ctor;

#[cfg(test)]
#[ctor]
fn test_init() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
