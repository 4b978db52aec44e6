use crate::scoped_fd::ScopedFd;
use nix::pty::openpty;
use nix::unistd::dup;
use std::fs::File;
use std::io;
use std::os::unix::io::FromRawFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Start a child with all three stdio streams attached to the slave side of
/// a fresh pty and hand back the master side. The child adopts the pty as
/// its controlling terminal, so bytes written to the master behave like
/// keystrokes; in particular 0x03 acts as Ctrl-C.
pub fn spawn_in_pty(cmd: &mut Command) -> io::Result<(File, Child)> {
    let pty = openpty(None, None).map_err(nix_to_io)?;
    let mut master = ScopedFd::from_raw(pty.master);
    let mut slave = ScopedFd::from_raw(pty.slave);

    let slave_out = dup(slave.get()).map_err(nix_to_io)?;
    let slave_err = dup(slave.get()).map_err(nix_to_io)?;
    unsafe {
        cmd.stdin(Stdio::from_raw_fd(slave.extract()));
        cmd.stdout(Stdio::from_raw_fd(slave_out));
        cmd.stderr(Stdio::from_raw_fd(slave_err));
        cmd.pre_exec(|| {
            // New session, then adopt the pty (already dup2'ed onto fd 0)
            // as the controlling terminal.
            if libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::ioctl(0, libc::TIOCSCTTY, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    Ok((unsafe { File::from_raw_fd(master.extract()) }, child))
}
