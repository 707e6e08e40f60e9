use std::process::ExitCode;

fn main() -> ExitCode {
    skillflow_cli::run()
}
