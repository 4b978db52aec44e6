use nix::unistd::close;
use std::ops::Deref;
use std::os::unix::io::RawFd;

/// An owned raw fd, closed on drop. Used for the pty endpoints handed
/// back by openpty() before they are transferred to a child process or
/// wrapped in a File.
pub struct ScopedFd {
    fd: RawFd,
}

impl ScopedFd {
    pub fn new() -> Self {
        ScopedFd { fd: -1 }
    }

    pub fn from_raw(fd: RawFd) -> Self {
        ScopedFd { fd }
    }

    pub fn close(&mut self) {
        if self.fd >= 0 {
            close(self.fd).unwrap();
        }

        self.fd = -1;
    }

    pub fn is_open(&self) -> bool {
        self.fd >= 0
    }

    pub fn get(&self) -> RawFd {
        self.fd
    }

    /// Give up ownership without closing.
    pub fn extract(&mut self) -> RawFd {
        let result = self.fd;
        self.fd = -1;
        result
    }
}

impl Drop for ScopedFd {
    fn drop(&mut self) {
        self.close()
    }
}

impl Deref for ScopedFd {
    type Target = i32;

    fn deref(&self) -> &i32 {
        &self.fd
    }
}
