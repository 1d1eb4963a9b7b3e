//! Process-wide state, gathered in one explicitly constructed object.

use crate::config::Config;
use crate::identity::ProcessIdentity;
use crate::random::SecureRandom;
use crate::signal_log::SignalLogger;
use crate::signal_names::signal_name;
use crate::signal_safe::current_pid;
use libc::c_int;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static GLOBAL: Lazy<Arc<ProcessContext>> =
    Lazy::new(|| Arc::new(ProcessContext::new(Config::from_env())));

/// The termination flag and the logger its handler writes through.
///
/// Shared with the graceful signal handlers, so everything reachable from `on_signal` must
/// stay async-signal-safe.
pub(crate) struct TerminationState {
    requested: AtomicBool,
    logger: SignalLogger,
}

impl TerminationState {
    /// Sets the flag; only the call that flips it from false to true logs a line.
    pub(crate) fn on_signal(&self, signum: c_int) -> bool {
        if self
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        let _ = self.logger.line(&[
            &b"Termination signal received: "[..],
            signal_name(signum).as_bytes(),
        ]);
        true
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }
}

/// Owns the termination flag, the instance counter and the shared generator.
///
/// Most programs use [`ProcessContext::global`]; tests build isolated instances with
/// [`ProcessContext::new`].
pub struct ProcessContext {
    config: Config,
    termination: Arc<TerminationState>,
    identity: ProcessIdentity,
    random: SecureRandom,
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("config", &self.config)
            .field("termination_requested", &self.is_termination_requested())
            .finish_non_exhaustive()
    }
}

impl ProcessContext {
    /// Builds a context. The signal-context log prefix is formatted here, once.
    pub fn new(config: Config) -> Self {
        Self::with_random(config, SecureRandom::new())
    }

    /// Builds a context around an existing generator, e.g. one with an injected entropy
    /// source.
    pub fn with_random(config: Config, random: SecureRandom) -> Self {
        let logger = SignalLogger::new(&config.log_name, current_pid(), config.log_fd);
        Self {
            termination: Arc::new(TerminationState {
                requested: AtomicBool::new(false),
                logger,
            }),
            identity: ProcessIdentity::new(),
            random,
            config,
        }
    }

    /// The process-wide context, configured from the environment on first use.
    pub fn global() -> Arc<ProcessContext> {
        Arc::clone(&GLOBAL)
    }

    /// Configuration this context was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// True once any monitored termination signal has been delivered.
    ///
    /// Advisory only: visibility is eventual, and how often to poll is up to the host.
    pub fn is_termination_requested(&self) -> bool {
        self.termination.is_requested()
    }

    /// Body of the graceful signal handler, callable directly with a simulated signal.
    /// Returns true only for the delivery that set the flag.
    pub fn on_termination_signal(&self, signum: c_int) -> bool {
        self.termination.on_signal(signum)
    }

    /// Next `"<pid>/<counter>"` identifier.
    pub fn next_id(&self) -> String {
        self.identity.next_id()
    }

    /// The shared generator.
    pub fn random(&self) -> &SecureRandom {
        &self.random
    }

    pub(crate) fn termination_state(&self) -> Arc<TerminationState> {
        Arc::clone(&self.termination)
    }
}
