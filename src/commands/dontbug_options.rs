use std::error::Error;
use std::path::PathBuf;
use structopt::{clap, clap::AppSettings, StructOpt};

pub const DEFAULT_EXT_DIR: &str = "ext/dontbug";
pub const DEFAULT_REPLAY_PORT: u16 = 9000;
pub const DEFAULT_GDB_REMOTE_PORT: u16 = 9999;
pub const DEFAULT_MAX_STACK_DEPTH: u32 = 256;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "dontbug",
    about = "The reversible debugger for PHP",
    after_help = "Use DONTBUG_LOG to control logging; e.g. DONTBUG_LOG=all:warn,mi:debug"
)]
#[structopt(global_settings =
&[AppSettings::AllowNegativeNumbers, AppSettings::UnifiedHelpMessage])]
pub struct DontbugOptions {
    #[structopt(
        short = "v",
        long = "verbose",
        help = "Echo traffic with gdb, rr and the IDE while running."
    )]
    pub verbose: bool,

    #[structopt(
        short = "g",
        long = "gdb-notify",
        help = "Show async notification records coming from gdb."
    )]
    pub gdb_notify: bool,

    #[structopt(subcommand)]
    pub cmd: DontbugSubCommand,
}

#[derive(StructOpt, Debug, Clone)]
pub enum DontbugSubCommand {
    /// Scan a PHP source tree, generate dontbug_break.c in the extension
    /// directory and compile the dontbug zend extension.
    #[structopt(name = "generate")]
    Generate {
        /// Directory of the dontbug zend extension sources
        #[structopt(long = "ext-dir")]
        ext_dir: Option<PathBuf>,

        /// Maximum PHP stack depth the location ladder covers. Must match
        /// the value the extension was built with at record time.
        #[structopt(long = "max-stack-depth", parse(try_from_str = parse_stack_depth))]
        max_stack_depth: Option<u32>,

        /// The PHP executable; phpize and php-config are expected next to it
        #[structopt(long = "with-php")]
        with_php: Option<PathBuf>,

        /// Root of the PHP source tree to index. Defaults to the current
        /// directory
        root_dir: Option<PathBuf>,
    },

    /// Start the built in PHP server and record an execution under rr.
    #[structopt(name = "record")]
    Record {
        /// Docroot for the PHP built-in cli server
        docroot: Option<PathBuf>,
    },

    /// Replay a recorded execution to a PHP IDE, forwards or backwards.
    #[structopt(name = "replay")]
    Replay {
        /// Directory of the dontbug zend extension sources
        #[structopt(long = "ext-dir")]
        ext_dir: Option<PathBuf>,

        /// dbgp port the IDE is listening on
        #[structopt(long = "replay-port", parse(try_from_str = parse_port))]
        replay_port: Option<u16>,

        /// Port at which the rr backend is made available to gdb
        #[structopt(long = "gdb-remote-port", parse(try_from_str = parse_port))]
        gdb_remote_port: Option<u16>,

        /// The rr (>= 4.3) executable (default is to assume rr exists in $PATH)
        #[structopt(long = "with-rr")]
        with_rr: Option<PathBuf>,

        /// The gdb (>= 7.11.1) executable (default is to assume gdb exists in $PATH)
        #[structopt(long = "with-gdb")]
        with_gdb: Option<PathBuf>,

        /// Which trace to replay? If omitted the latest rr trace is used
        trace_dir: Option<PathBuf>,
    },
}

fn parse_port(maybe_port: &str) -> Result<u16, Box<dyn Error>> {
    match maybe_port.trim().parse::<u16>() {
        Err(e) => Err(Box::new(e)),
        Ok(0) => Err(Box::new(clap::Error::with_description(
            "Port cannot be 0",
            clap::ErrorKind::InvalidValue,
        ))),
        Ok(port) => Ok(port),
    }
}

fn parse_stack_depth(maybe_depth: &str) -> Result<u32, Box<dyn Error>> {
    match maybe_depth.trim().parse::<u32>() {
        Err(e) => Err(Box::new(e)),
        Ok(0) => Err(Box::new(clap::Error::with_description(
            "Maximum stack depth must be at least 1",
            clap::ErrorKind::InvalidValue,
        ))),
        Ok(depth) => Ok(depth),
    }
}
