//! Installation of termination and fatal signal handlers.
//!
//! Handlers are described by a [`HandlerTable`] that maps each signal to a
//! [`HandlerKind`].
//!
//! - **Graceful** signals (hangup, interrupt, quit, terminate) set the context's
//!   termination flag and log one line, the first time only. They are registered through
//!   `signal-hook`, which chains to any previously installed handler.
//! - **Fatal** signals (segmentation fault, bus error, abort, illegal instruction,
//!   floating-point exception) log the signal, optionally print debugger-attach
//!   instructions and pause, restore the default disposition, dump a backtrace and
//!   re-raise so the OS default action (core dump, termination) runs.
//!
//! Everything the fatal handler reads is prepared at installation time and published
//! through an atomic pointer; the handler itself never allocates, locks or formats.

use crate::config::Config;
use crate::context::ProcessContext;
use crate::crash::{CrashReporter, DumpOutcome};
use crate::error::{Result, SigguardError};
use crate::signal_log::SignalLogger;
use crate::signal_names::signal_name;
use crate::signal_safe::{current_pid, pause_for, reraise, restore_default_disposition, StackBuf};
use libc::c_int;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use signal_hook::SigId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Signals that request a graceful shutdown.
pub const TERMINATION_SIGNALS: [c_int; 4] =
    [libc::SIGHUP, libc::SIGINT, libc::SIGQUIT, libc::SIGTERM];

/// Signals that indicate the process is beyond recovery.
pub const FATAL_SIGNALS: [c_int; 5] = [
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGABRT,
    libc::SIGILL,
    libc::SIGFPE,
];

const CRASH_HINT_CAPACITY: usize = 256;

/// What a signal's handler does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Request cooperative shutdown through the termination flag.
    Graceful,
    /// Report a crash and let the default action terminate the process.
    Fatal,
}

impl HandlerKind {
    fn label(self) -> &'static str {
        match self {
            HandlerKind::Graceful => "termination",
            HandlerKind::Fatal => "fatal",
        }
    }
}

/// Mapping from signal numbers to handler kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerTable {
    entries: Vec<(c_int, HandlerKind)>,
}

impl HandlerTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The termination set tagged `Graceful` plus the fatal set tagged `Fatal`.
    pub fn standard() -> Self {
        let mut table = Self::termination();
        table.entries.extend(Self::fatal().entries);
        table
    }

    /// Only the termination set.
    pub fn termination() -> Self {
        TERMINATION_SIGNALS
            .iter()
            .fold(Self::new(), |t, &sig| t.with(sig, HandlerKind::Graceful))
    }

    /// Only the fatal set.
    pub fn fatal() -> Self {
        FATAL_SIGNALS
            .iter()
            .fold(Self::new(), |t, &sig| t.with(sig, HandlerKind::Fatal))
    }

    /// Maps `signum` to `kind`, replacing any earlier mapping for it.
    pub fn with(mut self, signum: c_int, kind: HandlerKind) -> Self {
        self.entries.retain(|(sig, _)| *sig != signum);
        self.entries.push((signum, kind));
        self
    }

    /// The kind mapped to `signum`, if any.
    pub fn kind_of(&self, signum: c_int) -> Option<HandlerKind> {
        self.entries
            .iter()
            .find(|(sig, _)| *sig == signum)
            .map(|(_, kind)| *kind)
    }

    /// All `(signal, kind)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (c_int, HandlerKind)> + '_ {
        self.entries.iter().copied()
    }

    /// Signals mapped to `kind`.
    pub fn signals_of(&self, kind: HandlerKind) -> Vec<c_int> {
        self.iter()
            .filter(|(_, k)| *k == kind)
            .map(|(sig, _)| sig)
            .collect()
    }
}

/// Everything the fatal handler needs, built before the handler can run.
struct FatalContext {
    logger: SignalLogger,
    reporter: CrashReporter,
    hint: StackBuf<CRASH_HINT_CAPACITY>,
    debug_mode: bool,
    pause_secs: u32,
}

impl FatalContext {
    fn new(config: &Config) -> Result<Self> {
        let pid = current_pid();
        Ok(Self {
            logger: SignalLogger::new(&config.log_name, pid, config.log_fd),
            reporter: CrashReporter::from_config(config),
            hint: crash_hint(pid)?,
            debug_mode: config.debug_mode,
            pause_secs: config.pause_secs(),
        })
    }

    /// Runs in signal context. The disposition must be back to default before the re-raise.
    fn handle(&self, signum: c_int) {
        let _ = self
            .logger
            .line(&[&b"Fatal signal received: "[..], signal_name(signum).as_bytes()]);

        if self.debug_mode {
            let _ = self.logger.raw(self.hint.as_bytes());
            pause_for(self.pause_secs);
        }

        restore_default_disposition(signum);

        match self.reporter.dump() {
            DumpOutcome::Partial { .. } | DumpOutcome::Failed { .. } => {
                let _ = self
                    .logger
                    .line(&[&b"Failed to dump backtrace to stderr."[..]]);
            }
            DumpOutcome::NoFrames | DumpOutcome::Written { .. } => {}
        }

        reraise(signum);
    }
}

/// Pre-formats the debugger-attach instructions for `pid`.
fn crash_hint(pid: u64) -> Result<StackBuf<CRASH_HINT_CAPACITY>> {
    let mut hint = StackBuf::new();
    hint.push_str("\nFatal signal! Attach debugger with:\nsudo gdb --pid=")
        .push_decimal(pid)
        .push_str("\n or \nsudo gdb --q --n --ex 'thread apply all backtrace full' --batch --pid=")
        .push_decimal(pid)
        .push_str("\n");
    if hint.overflowed() {
        return Err(SigguardError::CrashHintOverflow(CRASH_HINT_CAPACITY));
    }
    Ok(hint)
}

// Null, or a pointer obtained from `Box::into_raw`.
static FATAL_CONTEXT: AtomicPtr<FatalContext> = AtomicPtr::new(ptr::null_mut());

extern "C" fn fatal_signal_handler(signum: c_int) {
    let ctx = FATAL_CONTEXT.load(Ordering::SeqCst);
    if ctx.is_null() {
        restore_default_disposition(signum);
        reraise(signum);
        return;
    }
    // SAFETY: the pointer came from `Box::into_raw` in `publish_fatal_context` and is only
    // freed after the handlers referencing it have been removed.
    let ctx = unsafe { &*ctx };
    ctx.handle(signum);
}

// Published contexts are never freed: a fatal signal on another thread may still be
// reading a replaced one.
fn publish_fatal_context(ctx: FatalContext) -> usize {
    let raw = Box::into_raw(Box::new(ctx));
    FATAL_CONTEXT.swap(raw, Ordering::SeqCst);
    raw as usize
}

fn retract_fatal_context(expected: usize) {
    let expected = expected as *mut FatalContext;
    let _ = FATAL_CONTEXT.compare_exchange(
        expected,
        ptr::null_mut(),
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
}

/// What a graceful signal's disposition was before any manager hooked it, and the
/// disposition signal-hook installed for it.
struct GracefulDisposition {
    original: libc::sigaction,
    hooked: libc::sigaction,
    users: usize,
}

// signal-hook only installs its OS handler the first time a signal is registered, and
// unregistering never removes it. The dispositions are tracked here so the last manager
// to let go restores the original one and the next registration puts the hook back.
static GRACEFUL_DISPOSITIONS: Lazy<Mutex<HashMap<c_int, GracefulDisposition>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn current_disposition(signum: c_int) -> Result<libc::sigaction> {
    // SAFETY: a null new action only queries; `current` is fully written on success.
    unsafe {
        let mut current: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signum, ptr::null(), &mut current) != 0 {
            return Err(registration_error(signum));
        }
        Ok(current)
    }
}

fn set_disposition(signum: c_int, action: &libc::sigaction) -> Result<()> {
    // SAFETY: `action` was previously returned by sigaction for this signal.
    if unsafe { libc::sigaction(signum, action, ptr::null_mut()) } != 0 {
        return Err(registration_error(signum));
    }
    Ok(())
}

#[derive(Default)]
struct Installed {
    graceful: Vec<(c_int, SigId)>,
    fatal: Vec<(c_int, libc::sigaction)>,
    // Address of the published `FatalContext`, kept as an integer so the manager stays
    // `Send + Sync`.
    fatal_context: Option<usize>,
}

/// Installs and removes the handlers described by a [`HandlerTable`].
///
/// Graceful handlers act on this manager's [`ProcessContext`]. Fatal handling is
/// process-wide by nature: the most recently installed fatal configuration is the one the
/// handler uses.
pub struct SignalManager {
    context: Arc<ProcessContext>,
    installed: Mutex<Installed>,
}

impl std::fmt::Debug for SignalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalManager")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl SignalManager {
    /// Creates a manager acting on `context`. Nothing is installed yet.
    pub fn new(context: Arc<ProcessContext>) -> Self {
        Self {
            context,
            installed: Mutex::new(Installed::default()),
        }
    }

    /// The context graceful handlers act on.
    pub fn context(&self) -> &Arc<ProcessContext> {
        &self.context
    }

    /// Registers the termination set (hangup, interrupt, quit, terminate).
    pub fn install_termination_handling(&self) -> Result<()> {
        self.install(&HandlerTable::termination())
    }

    /// Registers the fatal set and pre-builds the crash hint.
    pub fn install_fatal_handling(&self) -> Result<()> {
        self.install(&HandlerTable::fatal())
    }

    /// Installs every entry of `table`.
    ///
    /// # Errors
    ///
    /// `AlreadyInstalled` if this manager already holds handlers of a kind present in
    /// `table`; `SignalRegistration` if the OS rejects a disposition. On error, handlers
    /// registered by this call so far stay installed and are removed by `uninstall`.
    pub fn install(&self, table: &HandlerTable) -> Result<()> {
        let mut installed = self
            .installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let graceful = table.signals_of(HandlerKind::Graceful);
        let fatal = table.signals_of(HandlerKind::Fatal);

        if !graceful.is_empty() && !installed.graceful.is_empty() {
            return Err(SigguardError::AlreadyInstalled(HandlerKind::Graceful.label()));
        }
        if !fatal.is_empty() && !installed.fatal.is_empty() {
            return Err(SigguardError::AlreadyInstalled(HandlerKind::Fatal.label()));
        }

        for signum in graceful {
            let id = self.register_graceful(signum)?;
            installed.graceful.push((signum, id));
        }

        if !fatal.is_empty() {
            let ctx = FatalContext::new(self.context.config())?;
            installed.fatal_context = Some(publish_fatal_context(ctx));
            for signum in fatal {
                let previous = register_fatal(signum)?;
                installed.fatal.push((signum, previous));
            }
        }

        info!(
            "Installed signal handlers: {}",
            table
                .iter()
                .map(|(sig, kind)| format!("{}={}", signal_name(sig), kind.label()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    /// Removes every handler installed through this manager and restores the dispositions
    /// that were in place before. A graceful signal goes back to its original disposition
    /// once no manager handles it any more.
    pub fn uninstall(&self) -> Result<()> {
        let mut installed = self
            .installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut first_error = None;
        for (signum, id) in installed.graceful.drain(..) {
            if !signal_hook::low_level::unregister(id) {
                debug!("{} handler was already unregistered", signal_name(signum));
            }
            if let Err(e) = release_graceful(signum) {
                first_error.get_or_insert(e);
            }
        }

        for (signum, previous) in installed.fatal.drain(..) {
            // SAFETY: `previous` is exactly what sigaction handed back when we installed.
            let rc = unsafe { libc::sigaction(signum, &previous, ptr::null_mut()) };
            if rc != 0 {
                first_error.get_or_insert_with(|| registration_error(signum));
            }
        }

        if let Some(addr) = installed.fatal_context.take() {
            retract_fatal_context(addr);
        }

        first_error.map_or(Ok(()), Err)
    }

    fn register_graceful(&self, signum: c_int) -> Result<SigId> {
        if signal_hook::consts::FORBIDDEN.contains(&signum) {
            return Err(SigguardError::SignalRegistration(format!(
                "{} cannot be handled gracefully",
                signal_name(signum)
            )));
        }
        let mut dispositions = GRACEFUL_DISPOSITIONS
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = current_disposition(signum)?;

        let termination = self.context.termination_state();
        // SAFETY: the action only performs an atomic compare-exchange and one `writev`
        // through a logger whose prefix was formatted before registration.
        let registered = unsafe {
            signal_hook::low_level::register(signum, move || {
                termination.on_signal(signum);
            })
        };
        let id = registered.map_err(|e| {
            SigguardError::SignalRegistration(format!("{}: {}", signal_name(signum), e))
        })?;

        let entry = match dispositions.entry(signum) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => match current_disposition(signum) {
                Ok(hooked) => vacant.insert(GracefulDisposition {
                    original: before,
                    hooked,
                    users: 0,
                }),
                Err(e) => {
                    let _ = signal_hook::low_level::unregister(id);
                    return Err(e);
                }
            },
        };
        if entry.users == 0 {
            entry.original = before;
            if let Err(e) = set_disposition(signum, &entry.hooked) {
                let _ = signal_hook::low_level::unregister(id);
                return Err(e);
            }
        }
        entry.users += 1;
        Ok(id)
    }
}

/// Drops one manager's claim on `signum`; the last one restores the original disposition.
fn release_graceful(signum: c_int) -> Result<()> {
    let mut dispositions = GRACEFUL_DISPOSITIONS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    match dispositions.get_mut(&signum) {
        Some(entry) if entry.users > 0 => {
            entry.users -= 1;
            if entry.users == 0 {
                set_disposition(signum, &entry.original)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn register_fatal(signum: c_int) -> Result<libc::sigaction> {
    // SAFETY: the handler only reads the published `FatalContext` and calls the helpers in
    // `signal_safe`.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        let mut previous: libc::sigaction = std::mem::zeroed();
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        action.sa_sigaction = fatal_signal_handler as libc::sighandler_t;
        if libc::sigaction(signum, &action, &mut previous) != 0 {
            return Err(registration_error(signum));
        }
        Ok(previous)
    }
}

fn registration_error(signum: c_int) -> SigguardError {
    SigguardError::SignalRegistration(format!(
        "{}: {}",
        signal_name(signum),
        std::io::Error::last_os_error()
    ))
}

/// Asks process `pid` to terminate by sending it `SIGTERM`.
///
/// # Errors
///
/// `InvalidPid` for zero or negative values, which `kill(2)` would treat as process groups
/// or as every process the caller may signal. `Io` if the signal cannot be sent.
pub fn request_termination(pid: i32) -> Result<()> {
    if pid <= 0 {
        warn!("Refusing to request termination of pid {}", pid);
        return Err(SigguardError::InvalidPid(pid));
    }
    // SAFETY: kill has no memory preconditions.
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        let err = std::io::Error::last_os_error();
        warn!("Failed to request termination of pid {}: {}", pid, err);
        return Err(SigguardError::Io(err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Pipe;
    use nix::sys::signal::{raise, Signal};
    use serial_test::serial;

    #[test]
    fn test_standard_table() {
        let table = HandlerTable::standard();
        for sig in TERMINATION_SIGNALS {
            assert_eq!(table.kind_of(sig), Some(HandlerKind::Graceful));
        }
        for sig in FATAL_SIGNALS {
            assert_eq!(table.kind_of(sig), Some(HandlerKind::Fatal));
        }
        assert_eq!(table.kind_of(libc::SIGUSR1), None);
        assert_eq!(table.iter().count(), 9);
    }

    #[test]
    fn test_with_replaces_mapping() {
        let table = HandlerTable::termination().with(libc::SIGHUP, HandlerKind::Fatal);
        assert_eq!(table.kind_of(libc::SIGHUP), Some(HandlerKind::Fatal));
        assert_eq!(table.signals_of(HandlerKind::Graceful).len(), 3);
        assert_eq!(table.signals_of(HandlerKind::Fatal), vec![libc::SIGHUP]);
    }

    #[test]
    fn test_crash_hint_contents() {
        let hint = crash_hint(4242).expect("hint fits");
        let text = std::str::from_utf8(hint.as_bytes()).expect("ascii");
        assert!(text.starts_with("\nFatal signal! Attach debugger with:\n"));
        assert!(text.contains("sudo gdb --pid=4242\n"));
        assert!(text.contains("--batch --pid=4242\n"));
        assert!(!hint.overflowed());
    }

    #[test]
    fn test_forbidden_signal_rejected_for_graceful() {
        let manager = SignalManager::new(Arc::new(ProcessContext::new(Config::default())));
        let table = HandlerTable::new().with(libc::SIGSEGV, HandlerKind::Graceful);
        assert!(matches!(
            manager.install(&table),
            Err(SigguardError::SignalRegistration(_))
        ));
    }

    #[test]
    #[serial]
    fn test_sighup_twice_logs_once() {
        let pipe = Pipe::new();
        let context = Arc::new(ProcessContext::new(
            Config::default().with_log_fd(pipe.write_fd()),
        ));
        let manager = SignalManager::new(Arc::clone(&context));

        manager.install_termination_handling().expect("install");
        assert!(matches!(
            manager.install_termination_handling(),
            Err(SigguardError::AlreadyInstalled("termination"))
        ));

        // raise() delivers synchronously to the calling thread.
        raise(Signal::SIGHUP).expect("raise");
        assert!(context.is_termination_requested());
        raise(Signal::SIGHUP).expect("raise");

        let out = pipe.drain();
        assert_eq!(out.lines().count(), 1, "got {:?}", out);
        assert!(out.ends_with("Termination signal received: SIGHUP\n"));

        manager.uninstall().expect("uninstall");
        manager
            .install(&HandlerTable::new().with(libc::SIGUSR1, HandlerKind::Graceful))
            .expect("reinstall after uninstall");
        manager.uninstall().expect("uninstall");
    }

    #[test]
    fn test_request_termination_of_missing_pid() {
        // Pid values this large are outside every platform's pid range.
        assert!(matches!(
            request_termination(i32::MAX),
            Err(SigguardError::Io(_))
        ));
    }

    #[test]
    fn test_request_termination_rejects_group_targets() {
        for pid in [0, -1, i32::MIN] {
            assert!(matches!(
                request_termination(pid),
                Err(SigguardError::InvalidPid(p)) if p == pid
            ));
        }
    }

    #[test]
    #[serial]
    fn test_uninstall_restores_default_and_reinstall_rehooks() {
        let context = Arc::new(ProcessContext::new(Config::default().with_log_fd(-1)));
        let manager = SignalManager::new(Arc::clone(&context));
        let table = HandlerTable::new().with(libc::SIGUSR2, HandlerKind::Graceful);

        let original = current_disposition(libc::SIGUSR2).expect("query").sa_sigaction;

        manager.install(&table).expect("install");
        assert_ne!(
            current_disposition(libc::SIGUSR2).expect("query").sa_sigaction,
            original
        );

        manager.uninstall().expect("uninstall");
        assert_eq!(
            current_disposition(libc::SIGUSR2).expect("query").sa_sigaction,
            original
        );

        // Left at the default disposition, this raise would end the test binary.
        manager.install(&table).expect("reinstall");
        raise(Signal::SIGUSR2).expect("raise");
        assert!(context.is_termination_requested());
        manager.uninstall().expect("uninstall");
    }

    #[test]
    #[serial]
    fn test_disposition_kept_while_another_manager_holds_it() {
        let first = SignalManager::new(Arc::new(ProcessContext::new(
            Config::default().with_log_fd(-1),
        )));
        let second_context = Arc::new(ProcessContext::new(Config::default().with_log_fd(-1)));
        let second = SignalManager::new(Arc::clone(&second_context));
        let table = HandlerTable::new().with(libc::SIGUSR2, HandlerKind::Graceful);
        let original = current_disposition(libc::SIGUSR2).expect("query").sa_sigaction;

        first.install(&table).expect("install first");
        second.install(&table).expect("install second");
        first.uninstall().expect("uninstall first");

        raise(Signal::SIGUSR2).expect("raise");
        assert!(second_context.is_termination_requested());

        second.uninstall().expect("uninstall second");
        assert_eq!(
            current_disposition(libc::SIGUSR2).expect("query").sa_sigaction,
            original
        );
    }

    #[test]
    #[serial]
    fn test_replaced_fatal_context_stays_readable() {
        let mut debug_config = Config::default();
        debug_config.debug_mode = true;
        let first = publish_fatal_context(FatalContext::new(&debug_config).expect("context"));
        let second =
            publish_fatal_context(FatalContext::new(&Config::default()).expect("context"));

        // SAFETY: replaced contexts are never freed.
        let replaced = unsafe { &*(first as *const FatalContext) };
        assert!(replaced.debug_mode);

        retract_fatal_context(first);
        assert_eq!(FATAL_CONTEXT.load(Ordering::SeqCst) as usize, second);
        retract_fatal_context(second);
        assert!(FATAL_CONTEXT.load(Ordering::SeqCst).is_null());
    }
}
