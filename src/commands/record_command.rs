use crate::commands::dontbug_options::{DontbugOptions, DontbugSubCommand};
use crate::commands::{exit_result::ExitResult, DontbugCommand};
use crate::dbgp::read_dbgp_frame;
use crate::log::LogInfo;
use crate::pty::spawn_in_pty;
use crate::util;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::ffi::OsStr;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;

const RECORD_LISTEN_ADDR: &str = "127.0.0.1:9000";
const PHP_SERVER_ADDR: &str = "127.0.0.1:8088";

pub struct RecordCommand {
    docroot: PathBuf,
}

impl RecordCommand {
    pub fn new(options: &DontbugOptions) -> RecordCommand {
        match options.cmd.clone() {
            DontbugSubCommand::Record { docroot } => RecordCommand {
                docroot: docroot.unwrap_or_else(|| {
                    println!(
                        "dontbug: no PHP built-in cli server docroot path provided. Assuming \".\""
                    );
                    PathBuf::from(".")
                }),
            },
            _ => panic!("Unexpected DontbugSubCommand variant. Not a Record variant!"),
        }
    }

    fn do_record_session(&self, rr_path: &Path) -> ExitResult<()> {
        let docroot = match util::abs_no_symlink_path(&self.docroot) {
            Ok(dir) => dir,
            Err(e) => clean_fatal!("{:?} is not a usable docroot: {}", self.docroot, e),
        };

        let mut cmd = Command::new(rr_path);
        cmd.arg("record")
            .arg("php")
            .arg("-S")
            .arg(PHP_SERVER_ADDR)
            .arg("-t")
            .arg(&docroot);

        let (master, mut child) = match spawn_in_pty(&mut cmd) {
            Ok(spawned) => spawned,
            Err(e) => clean_fatal!("Could not start the rr recording session: {}", e),
        };

        println!(
            "dontbug: Successfully started recording session... Press Ctrl-C to terminate recording"
        );

        // If we let the default SIGINT disposition kill us, rr terminates
        // abruptly and the trace is not saved properly. Forward the Ctrl-C
        // to the recording's tty instead and wait for a natural exit.
        RECORD_TTY_FD.store(master.as_raw_fd(), Ordering::SeqCst);
        let sa = SigAction::new(
            SigHandler::Handler(handle_sigint_in_record),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        if let Err(e) = unsafe { sigaction(Signal::SIGINT, &sa) } {
            fatal!("Couldn't set sigaction for SIGINT: {:?}", e);
        }

        let pump = match master.try_clone() {
            Ok(m) => m,
            Err(e) => fatal!("Couldn't clone the recording tty: {}", e),
        };
        thread::spawn(move || {
            let mut from = pump;
            // A pty read errors with EIO once the child side is gone;
            // either way the pump is done.
            let _ = io::copy(&mut from, &mut io::stdout());
        });

        match child.wait() {
            Ok(status) if status.success() => {
                println!(
                    "dontbug: Closed cleanly after terminating the PHP built-in cli server. Replay should work properly"
                );
                ExitResult::Ok(())
            }
            Ok(status) => ExitResult::err_from(
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("rr record did not exit cleanly: {}", status),
                ),
                1,
            ),
            Err(e) => ExitResult::err_from(e, 1),
        }
    }
}

impl DontbugCommand for RecordCommand {
    fn run(&mut self) -> ExitResult<()> {
        let rr_path = util::check_executable(OsStr::new("rr"), "rr");
        start_basic_debugger_client();
        self.do_record_session(&rr_path)
    }
}

static RECORD_TTY_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn handle_sigint_in_record(sig: i32) {
    debug_assert_eq!(sig, libc::SIGINT);
    let fd = RECORD_TTY_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        // Ctrl-C is ASCII code 3. write() is async-signal-safe.
        let byte: [u8; 1] = [3];
        unsafe { libc::write(fd, byte.as_ptr() as *const libc::c_void, 1) };
    }
}

/// While recording, PHP connects back to us believing we are an IDE. Answer
/// everything with `run` so the request runs to completion under rr.
fn start_basic_debugger_client() {
    let listener = match TcpListener::bind(RECORD_LISTEN_ADDR) {
        Ok(listener) => listener,
        Err(e) => clean_fatal!("Could not listen on {}: {}", RECORD_LISTEN_ADDR, e),
    };

    println!(
        "dontbug: Dontbug DBGp debugger client is listening on {} for connections from PHP",
        RECORD_LISTEN_ADDR
    );

    thread::spawn(move || {
        for conn in listener.incoming() {
            let conn = match conn {
                Ok(conn) => conn,
                Err(e) => fatal!("Could not accept a debugger engine connection: {}", e),
            };
            thread::spawn(move || auto_answer_connection(conn));
        }
    });
}

fn auto_answer_connection(conn: TcpStream) {
    let reader = match conn.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(e) => fatal!("Could not clone debugger engine connection: {}", e),
    };
    if let Err(e) = answer_frames(reader, conn) {
        fatal!("Could not auto-answer the debugger engine: {}", e);
    }
}

/// Reply `run -i <seq>` to every inbound frame, with seq counting up from 1,
/// until the peer hangs up.
fn answer_frames<R: BufRead, W: Write>(mut reader: R, mut writer: W) -> io::Result<()> {
    let mut seq: i64 = 0;
    loop {
        let frame = match read_dbgp_frame(&mut reader)? {
            Some(frame) => frame,
            None => return Ok(()),
        };
        log!(LogInfo, "dontbug <- {}", String::from_utf8_lossy(&frame));

        seq += 1;
        let reply = run_packet(seq);
        log!(LogInfo, "dontbug -> {}", String::from_utf8_lossy(&reply[..reply.len() - 1]));
        writer.write_all(&reply)?;
    }
}

/// `run -i <seq>` with the trailing NUL, the only thing the record-mode
/// listener ever says.
fn run_packet(seq: i64) -> Vec<u8> {
    format!("run -i {}\x00", seq).into_bytes()
}

#[cfg(test)]
mod test {
    use crate::commands::record_command::{answer_frames, run_packet};
    use crate::dbgp::construct_dbgp_packet;
    use std::io::Cursor;

    #[test]
    fn run_packet_shape() {
        assert_eq!(run_packet(1), b"run -i 1\x00".to_vec());
        assert_eq!(run_packet(42), b"run -i 42\x00".to_vec());
    }

    #[test]
    fn every_frame_is_answered_with_run() {
        let mut input: Vec<u8> = Vec::new();
        input.extend(construct_dbgp_packet("<init appid=\"7\"></init>"));
        input.extend(construct_dbgp_packet("<response command=\"run\"></response>"));

        let mut output: Vec<u8> = Vec::new();
        answer_frames(Cursor::new(input), &mut output).unwrap();

        let mut expected = run_packet(1);
        expected.extend(run_packet(2));
        assert_eq!(output, expected);
    }

    #[test]
    fn garbage_input_is_an_error() {
        let mut output: Vec<u8> = Vec::new();
        assert!(answer_frames(Cursor::new(b"not a frame".to_vec()), &mut output).is_err());
    }
}
