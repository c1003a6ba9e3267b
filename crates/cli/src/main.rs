use std::process::ExitCode;

fn main() -> ExitCode {
    cswflow_cli::run()
}
