//! Static, allocation-free mapping from signal numbers to their canonical names.
//!
//! Safe to call from a signal handler: the table is a `static` slice and lookups
//! never format or allocate.

use libc::c_int;

const UNKNOWN: &str = "unknown";

static SIGNAL_NAMES: &[(c_int, &str)] = &[
    (libc::SIGHUP, "SIGHUP"),
    (libc::SIGINT, "SIGINT"),
    (libc::SIGQUIT, "SIGQUIT"),
    (libc::SIGILL, "SIGILL"),
    (libc::SIGABRT, "SIGABRT"),
    (libc::SIGFPE, "SIGFPE"),
    (libc::SIGKILL, "SIGKILL"),
    (libc::SIGSEGV, "SIGSEGV"),
    (libc::SIGPIPE, "SIGPIPE"),
    (libc::SIGALRM, "SIGALRM"),
    (libc::SIGTERM, "SIGTERM"),
    (libc::SIGUSR1, "SIGUSR1"),
    (libc::SIGUSR2, "SIGUSR2"),
    (libc::SIGCHLD, "SIGCHLD"),
    (libc::SIGCONT, "SIGCONT"),
    (libc::SIGSTOP, "SIGSTOP"),
    (libc::SIGTSTP, "SIGTSTP"),
    (libc::SIGTTIN, "SIGTTIN"),
    (libc::SIGTTOU, "SIGTTOU"),
    (libc::SIGBUS, "SIGBUS"),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (libc::SIGPOLL, "SIGPOLL"),
    (libc::SIGPROF, "SIGPROF"),
    (libc::SIGSYS, "SIGSYS"),
    (libc::SIGTRAP, "SIGTRAP"),
    (libc::SIGURG, "SIGURG"),
    (libc::SIGVTALRM, "SIGVTALRM"),
    (libc::SIGXCPU, "SIGXCPU"),
    (libc::SIGXFSZ, "SIGXFSZ"),
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    (libc::SIGEMT, "SIGEMT"),
    #[cfg(all(
        any(target_os = "linux", target_os = "android"),
        not(any(target_arch = "mips", target_arch = "mips64", target_arch = "sparc64"))
    ))]
    (libc::SIGSTKFLT, "SIGSTKFLT"),
    // On Linux SIGIO aliases SIGPOLL, which is already listed.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    (libc::SIGIO, "SIGIO"),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    (libc::SIGPWR, "SIGPWR"),
    (libc::SIGWINCH, "SIGWINCH"),
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    (libc::SIGINFO, "SIGINFO"),
];

/// Returns the canonical uppercase name of `signum` (e.g. `"SIGSEGV"`), or `"unknown"`.
pub fn signal_name(signum: c_int) -> &'static str {
    SIGNAL_NAMES
        .iter()
        .find(|(num, _)| *num == signum)
        .map_or(UNKNOWN, |(_, name)| *name)
}
