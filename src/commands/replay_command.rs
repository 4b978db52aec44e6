use crate::break_map::{construct_breakpoint_loc_map, read_generation_params, BreakpointLocMap};
use crate::codegen::{BREAK_FILE_NAME, STARTUP_LINE, STEP_LINE};
use crate::commands::dontbug_options::{
    DontbugOptions, DontbugSubCommand, DEFAULT_EXT_DIR, DEFAULT_GDB_REMOTE_PORT,
    DEFAULT_REPLAY_PORT,
};
use crate::commands::{exit_result::ExitResult, DontbugCommand};
use crate::dbgp::construct_dbgp_packet;
use crate::engine::{breakpoint_number, truncated, EngineState, Settings, MASTER_BREAKPOINT};
use crate::flags::Flags;
use crate::mi::{parse_gdb_string_response, MiRecord, MiSession};
use crate::pty::spawn_in_pty;
use crate::util;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{self, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How long we wait for rr to print its gdb connection banner.
const RR_STARTUP_DEADLINE: Duration = Duration::from_secs(10);

pub struct ReplayCommand {
    ext_dir: PathBuf,
    replay_port: u16,
    gdb_remote_port: u16,
    rr_executable: PathBuf,
    gdb_executable: PathBuf,
    trace_dir: Option<PathBuf>,
}

impl ReplayCommand {
    pub fn new(options: &DontbugOptions) -> ReplayCommand {
        match options.cmd.clone() {
            DontbugSubCommand::Replay {
                ext_dir,
                replay_port,
                gdb_remote_port,
                with_rr,
                with_gdb,
                trace_dir,
            } => {
                let ext_dir = ext_dir.unwrap_or_else(|| {
                    println!(
                        "dontbug: No --ext-dir provided, assuming \"{}\"",
                        DEFAULT_EXT_DIR
                    );
                    PathBuf::from(DEFAULT_EXT_DIR)
                });

                ReplayCommand {
                    ext_dir,
                    replay_port: replay_port.unwrap_or(DEFAULT_REPLAY_PORT),
                    gdb_remote_port: gdb_remote_port.unwrap_or(DEFAULT_GDB_REMOTE_PORT),
                    rr_executable: with_rr.unwrap_or_else(|| PathBuf::from("rr")),
                    gdb_executable: with_gdb.unwrap_or_else(|| PathBuf::from("gdb")),
                    trace_dir,
                }
            }
            _ => panic!("Unexpected DontbugSubCommand variant. Not a Replay variant!"),
        }
    }

    /// Spawn `rr replay` in a pty, harvest the gdb connection banner from
    /// its output and hand over to gdb.
    fn start_replay_in_rr(
        &self,
        rr_path: &Path,
        gdb_path: &Path,
        bp_map: BreakpointLocMap,
    ) -> EngineState {
        let mut cmd = Command::new(rr_path);
        cmd.arg("replay").arg("-s").arg(self.gdb_remote_port.to_string());
        if let Some(ref trace_dir) = self.trace_dir {
            match util::abs_no_symlink_path(trace_dir) {
                Ok(dir) => {
                    cmd.arg(dir);
                }
                Err(e) => clean_fatal!("{:?} is not a usable trace directory: {}", trace_dir, e),
            }
        } else {
            println!("dontbug: No trace directory provided, latest-trace trace directory assumed");
        }

        let (master, _replay_session) = match spawn_in_pty(&mut cmd) {
            Ok(spawned) => spawned,
            Err(e) => clean_fatal!("Could not start the rr replay session: {}", e),
        };
        println!("dontbug: Successfully started replay session");

        // rr prints, among other banner text, a line of the form
        //   (re)spawning: gdb ... -ex 'target extended-remote :9999' /path/to/hardlink
        // The hardlink path after the first '/' is what gdb must load.
        let reader_master = match master.try_clone() {
            Ok(m) => m,
            Err(e) => fatal!("Couldn't clone the rr tty: {}", e),
        };
        let (banner_tx, banner_rx) = mpsc::channel::<String>();
        thread::spawn(move || {
            let mut reader = BufReader::new(reader_master);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {
                        print!("{}", line);
                        if line.contains("target extended-remote") {
                            let _ = banner_tx.send(line);
                            return;
                        }
                    }
                }
            }
        });

        let banner_line = match banner_rx.recv_timeout(RR_STARTUP_DEADLINE) {
            Ok(line) => line,
            Err(_) => {
                clean_fatal!("Could not find the gdb connection string that is given by rr")
            }
        };

        // Keep echoing whatever rr says from here on.
        thread::spawn(move || {
            let mut from = master;
            let _ = io::copy(&mut from, &mut io::stdout());
        });

        let slash_at = match banner_line.find('/') {
            Some(at) => at,
            None => fatal!(
                "No hardlink path in the rr connection string: {:?}",
                banner_line
            ),
        };
        let hardlink_file = banner_line[slash_at..].trim().to_owned();

        self.start_gdb_and_init_engine_state(gdb_path, &hardlink_file, bp_map)
    }

    /// Attach gdb to the rr backend, plant the stepping and startup
    /// breakpoints, run to the first PHP line event and construct the
    /// engine state around the halted inferior.
    fn start_gdb_and_init_engine_state(
        &self,
        gdb_path: &Path,
        hardlink_file: &str,
        bp_map: BreakpointLocMap,
    ) -> EngineState {
        let gdb_args: Vec<OsString> = vec![
            "-l".into(),
            "-1".into(),
            "-ex".into(),
            format!("target extended-remote :{}", self.gdb_remote_port).into(),
            "--interpreter".into(),
            "mi".into(),
            hardlink_file.into(),
        ];
        println!(
            "dontbug: Starting gdb with the following string: {} {}",
            gdb_path.display(),
            gdb_args
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect::<Vec<String>>()
                .join(" ")
        );

        let session = match MiSession::spawn(gdb_path, &gdb_args) {
            Ok(session) => session,
            Err(e) => clean_fatal!("Could not start gdb: {}", e),
        };
        let gdb = Arc::new(Mutex::new(session));

        let entry_file_php;
        {
            let mut session = gdb.lock().unwrap();

            // This is our usual stepping breakpoint. Initially disabled.
            let result = send_or_die(
                &mut session,
                "break-insert",
                &format!("-f -d --source {} --line {}", BREAK_FILE_NAME, STEP_LINE),
            );
            let step_bp = breakpoint_number(&result);
            if step_bp != MASTER_BREAKPOINT {
                fatal!(
                    "Expected the stepping breakpoint to be numbered {}, gdb says {}",
                    MASTER_BREAKPOINT,
                    step_bp
                );
            }

            // Note that this is a temporary breakpoint, just to get things
            // started.
            send_or_die(
                &mut session,
                "break-insert",
                &format!("-t -f --source {} --line {}", BREAK_FILE_NAME, STARTUP_LINE),
            );

            // Unlimited print length in gdb so that results are not
            // "chopped" off.
            send_or_die(&mut session, "gdb-set", "print elements 0");

            // Runs up to the startup breakpoint, i.e. the first PHP line
            // event of the recording.
            if let Err(e) = session.continue_execution(false) {
                fatal!("Could not run to the startup breakpoint: {}", e);
            }

            let result = send_or_die(&mut session, "data-evaluate-expression", "filename");
            let value = match result.payload_const("value") {
                Some(value) => value.to_owned(),
                None => fatal!("No value when evaluating the entry filename"),
            };
            entry_file_php = match parse_gdb_string_response(&value) {
                Ok(filename) => filename,
                Err(e) => fatal!("{}", e),
            };
        }

        EngineState::new(
            gdb,
            entry_file_php,
            bp_map,
            Settings {
                verbose: Flags::get().verbose,
            },
        )
    }

    /// The main event loop: owns the engine state, reads the IDE socket and
    /// replies in request order.
    fn debugger_ide_cmd_loop(&self, mut es: EngineState) -> ! {
        println!("dontbug: Trying to connect to debugger IDE");
        let conn = match TcpStream::connect(("127.0.0.1", self.replay_port)) {
            Ok(conn) => conn,
            Err(e) => clean_fatal!(
                "Could not connect to a debugger IDE on port {}. Is it listening? ({})",
                self.replay_port,
                e
            ),
        };
        println!("dontbug: Connected to debugger IDE (aka \"client\")");

        let payload = es.init_packet();
        let mut writer = match conn.try_clone() {
            Ok(clone) => clone,
            Err(e) => fatal!("Couldn't clone the IDE connection: {}", e),
        };
        if let Err(e) = writer.write_all(&construct_dbgp_packet(&payload)) {
            fatal!("Could not send the init packet to the IDE: {}", e);
        }
        println!("dontbug -> ide:\n{}", payload);

        let reverse = Arc::new(AtomicBool::new(false));
        {
            let gdb = es.gdb.clone();
            let reverse = reverse.clone();
            thread::spawn(move || operator_loop(gdb, reverse));
        }

        let mut reader = BufReader::new(conn);
        loop {
            let mut buf: Vec<u8> = Vec::new();
            match reader.read_until(0, &mut buf) {
                Ok(0) => fatal!("The IDE closed the connection"),
                Ok(_) => (),
                Err(e) => fatal!("Could not read from the IDE: {}", e),
            }
            if buf.last() == Some(&0) {
                buf.pop();
            } else {
                fatal!("IDE command was not NUL terminated");
            }

            let command = String::from_utf8_lossy(&buf).into_owned();
            println!("\nide -> dontbug: {}", command);

            let payload = es.handle_ide_request(&command, reverse.load(Ordering::SeqCst));
            if let Err(e) = writer.write_all(&construct_dbgp_packet(&payload)) {
                fatal!("Could not reply to the IDE: {}", e);
            }
            println!("dontbug -> ide:\n{}", truncated(&payload, 300));
            print!("dontbug prompt>");
            let _ = io::stdout().flush();
        }
    }
}

impl DontbugCommand for ReplayCommand {
    fn run(&mut self) -> ExitResult<()> {
        let rr_path = util::check_executable(self.rr_executable.as_os_str(), "rr");
        let gdb_path = util::check_executable(self.gdb_executable.as_os_str(), "gdb");

        let ext_dir = match util::abs_no_symlink_path(&self.ext_dir) {
            Ok(dir) => dir,
            Err(e) => clean_fatal!(
                "{:?} does not seem to be a valid dontbug extension directory: {}",
                self.ext_dir,
                e
            ),
        };

        println!(
            "dontbug: Looking for {} in {}",
            BREAK_FILE_NAME,
            ext_dir.display()
        );
        let bp_map = match construct_breakpoint_loc_map(&ext_dir) {
            Ok(map) => map,
            Err(e) => clean_fatal!(
                "Could not read {}: {}. You need to run 'dontbug generate' first",
                BREAK_FILE_NAME,
                e
            ),
        };
        match read_generation_params(&ext_dir) {
            Ok((num_files, _max_stack_depth)) => {
                if num_files != bp_map.len() {
                    clean_fatal!(
                        "{} says it covers {} files but {} breakpoint lines were found. \
                         The file has been modified; rerun 'dontbug generate'",
                        BREAK_FILE_NAME,
                        num_files,
                        bp_map.len()
                    );
                }
            }
            Err(e) => clean_fatal!("Could not read the {} preamble: {}", BREAK_FILE_NAME, e),
        }
        println!(
            "dontbug: Completed building association of filename and linenumbers for breakpoints"
        );

        let es = self.start_replay_in_rr(&rr_path, &gdb_path, bp_map);
        self.debugger_ide_cmd_loop(es)
    }
}

fn send_or_die(session: &mut MiSession, operation: &str, arguments: &str) -> MiRecord {
    if Flags::get().verbose {
        println!("dontbug -> gdb: {} {}", operation, arguments);
    }
    match session.send(operation, arguments) {
        Ok(record) => {
            if record.class != "done" {
                fatal!(
                    "Could not execute the gdb/mi command: {} {} (gdb said {:?})",
                    operation,
                    arguments,
                    record
                );
            }
            record
        }
        Err(e) => fatal!(
            "Could not execute the gdb/mi command: {} {}: {}",
            operation,
            arguments,
            e
        ),
    }
}

/// The operator side channel on stdin. `t` toggles between forward and
/// reverse debugging, `-<mi-command>` is raw gdb/mi passthrough, `q` quits.
/// The direction flag is the only state shared with the dispatcher that is
/// not behind the gdb mutex.
fn operator_loop(gdb: Arc<Mutex<MiSession>>, reverse: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("dontbug prompt>");
        let _ = io::stdout().flush();

        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => return,
            Ok(_) => (),
        }
        let input = line.trim();

        if input.starts_with('t') {
            let now_reverse = !reverse.load(Ordering::SeqCst);
            reverse.store(now_reverse, Ordering::SeqCst);
            if now_reverse {
                println!("CHANGED TO: reverse debugging mode");
            } else {
                println!("CHANGED TO: forward debugging mode");
            }
        } else if let Some(passthrough) = input.strip_prefix('-') {
            let mut parts = passthrough.splitn(2, char::is_whitespace);
            let operation = parts.next().unwrap_or("");
            let arguments = parts.next().unwrap_or("").trim();
            if operation.is_empty() {
                continue;
            }

            let result = gdb.lock().unwrap().send(operation, arguments);
            match result {
                Ok(record) => match serde_json::to_string_pretty(&record) {
                    Ok(json) => println!("{}", json),
                    Err(e) => fatal!("Could not render the gdb response: {}", e),
                },
                Err(e) => fatal!(
                    "Could not execute the gdb/mi command: {} {}: {}",
                    operation,
                    arguments,
                    e
                ),
            }
        } else if input.starts_with('q') {
            gdb.lock().unwrap().exit();
            process::exit(0);
        } else if reverse.load(Ordering::SeqCst) {
            println!("CURRENTLY IN: reverse debugging mode");
        } else {
            println!("CURRENTLY IN: forward debugging mode");
        }
    }
}
