#![allow(dead_code)]

#[macro_use]
extern crate lazy_static;

#[macro_use]
mod log;

mod break_map;
mod codegen;
mod commands;
mod dbgp;
mod engine;
mod flags;
mod hash;
mod mi;
mod pty;
mod scan;
mod scoped_fd;
mod util;

use crate::commands::dontbug_options::{DontbugOptions, DontbugSubCommand};
use crate::commands::exit_result::ExitResult;
use crate::commands::generate_command::GenerateCommand;
use crate::commands::record_command::RecordCommand;
use crate::commands::replay_command::ReplayCommand;
use crate::commands::DontbugCommand;
use structopt::StructOpt;

fn main() -> ExitResult<()> {
    let options = DontbugOptions::from_args();

    match options.cmd {
        DontbugSubCommand::Generate { .. } => GenerateCommand::new(&options).run(),
        DontbugSubCommand::Record { .. } => RecordCommand::new(&options).run(),
        DontbugSubCommand::Replay { .. } => ReplayCommand::new(&options).run(),
    }
}
