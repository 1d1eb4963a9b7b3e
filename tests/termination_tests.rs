#[cfg(unix)] // Relies on POSIX signals.
mod termination_tests {
    use nix::sys::signal::{kill, raise, Signal};
    use nix::unistd::Pid;
    use serial_test::serial;
    use sigguard::{
        request_termination, Config, HandlerKind, HandlerTable, ProcessContext, SignalManager,
    };
    use std::os::unix::process::ExitStatusExt;
    use std::process::{Command, Stdio};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    // Set in the environment of the re-executed test binary.
    const CHILD_ENV: &str = "SIGGUARD_UNINSTALL_CHILD";

    fn quiet_context() -> Arc<ProcessContext> {
        // Log lines go to a closed descriptor so the test output stays clean.
        Arc::new(ProcessContext::new(Config::default().with_log_fd(-1)))
    }

    fn wait_for(context: &ProcessContext) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if context.is_termination_requested() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    #[serial]
    fn test_sighup_sets_flag_once() {
        let context = quiet_context();
        let manager = SignalManager::new(Arc::clone(&context));
        manager.install_termination_handling().expect("install");

        assert!(!context.is_termination_requested());
        raise(Signal::SIGHUP).expect("raise");
        assert!(context.is_termination_requested());

        // Further deliveries are absorbed without changing anything.
        raise(Signal::SIGHUP).expect("raise");
        raise(Signal::SIGTERM).expect("raise");
        assert!(context.is_termination_requested());
        assert!(!context.on_termination_signal(libc::SIGINT));

        manager.uninstall().expect("uninstall");
    }

    #[test]
    #[serial]
    fn test_signal_from_another_thread_is_observed() {
        let context = quiet_context();
        let manager = SignalManager::new(Arc::clone(&context));
        manager
            .install(&HandlerTable::new().with(libc::SIGINT, HandlerKind::Graceful))
            .expect("install");

        let sender = std::thread::spawn(|| {
            kill(Pid::this(), Signal::SIGINT).expect("kill");
        });
        sender.join().expect("sender thread panicked");

        assert!(wait_for(&context), "termination flag never observed");
        manager.uninstall().expect("uninstall");
    }

    #[test]
    #[serial]
    fn test_request_termination_of_self() {
        let context = quiet_context();
        let manager = SignalManager::new(Arc::clone(&context));
        manager.install_termination_handling().expect("install");

        request_termination(std::process::id() as i32).expect("send SIGTERM");

        assert!(wait_for(&context), "termination flag never observed");
        manager.uninstall().expect("uninstall");
    }

    #[test]
    #[serial]
    fn test_managers_do_not_share_flags() {
        let watched = quiet_context();
        let bystander = quiet_context();
        let manager = SignalManager::new(Arc::clone(&watched));
        manager.install_termination_handling().expect("install");

        raise(Signal::SIGQUIT).expect("raise");

        assert!(watched.is_termination_requested());
        assert!(!bystander.is_termination_requested());
        manager.uninstall().expect("uninstall");
    }

    /// Body of the child process. Does nothing unless re-executed by
    /// `test_uninstall_restores_default_termination`.
    #[test]
    fn uninstalled_child() {
        if std::env::var_os(CHILD_ENV).is_none() {
            return;
        }
        let manager = SignalManager::new(quiet_context());
        manager.install_termination_handling().expect("install");
        manager.uninstall().expect("uninstall");

        kill(Pid::this(), Signal::SIGTERM).expect("kill");
        // Still alive after this means SIGTERM was swallowed.
        std::thread::sleep(Duration::from_secs(5));
    }

    #[test]
    fn test_uninstall_restores_default_termination() {
        let exe = std::env::current_exe().expect("test binary path");
        let output = Command::new(exe)
            .args(["termination_tests::uninstalled_child", "--exact", "--test-threads=1"])
            .env(CHILD_ENV, "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .expect("run child");

        assert_eq!(
            output.status.signal(),
            Some(libc::SIGTERM),
            "child survived SIGTERM after uninstall: {:?}\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
}
