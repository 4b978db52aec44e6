use crate::commands::dontbug_options::DontbugOptions;
use structopt::StructOpt;

lazy_static! {
    static ref FLAGS: Flags = init_flags();
}

/// Process-wide immutable snapshot of the global command line options.
/// Session-scoped code should copy what it needs into its own settings
/// record at construction time rather than reaching for this directly.
#[derive(Copy, Clone)]
pub struct Flags {
    /// Echo everything: gdb/rr traffic, IDE traffic, toolchain output.
    pub verbose: bool,
    /// Show async notification records coming from gdb.
    pub gdb_notify: bool,
}

impl Flags {
    pub fn get() -> &'static Flags {
        &*FLAGS
    }
}

fn init_flags() -> Flags {
    let options = DontbugOptions::from_args();

    Flags {
        verbose: options.verbose,
        gdb_notify: options.gdb_notify,
    }
}
