use exit_result::ExitResult;

pub mod dontbug_options;
pub mod exit_result;
pub mod generate_command;
pub mod record_command;
pub mod replay_command;

pub trait DontbugCommand {
    fn run(&mut self) -> ExitResult<()>;
}
