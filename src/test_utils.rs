//! Helpers shared by the unit tests.

use libc::c_int;

/// An anonymous pipe whose read end is non-blocking, so tests can collect whatever a
/// signal-context writer produced without risking a hang.
pub(crate) struct Pipe {
    read: c_int,
    write: c_int,
}

impl Pipe {
    pub(crate) fn new() -> Self {
        let mut fds = [0 as c_int; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0, "pipe failed");
        unsafe {
            let flags = libc::fcntl(fds[0], libc::F_GETFL);
            libc::fcntl(fds[0], libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        Self {
            read: fds[0],
            write: fds[1],
        }
    }

    pub(crate) fn write_fd(&self) -> c_int {
        self.write
    }

    /// Reads everything currently buffered in the pipe.
    pub(crate) fn drain(&self) -> String {
        let mut out = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let n = unsafe { libc::read(self.read, chunk.as_mut_ptr().cast(), chunk.len()) };
            if n <= 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n as usize]);
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}
