use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(err) = swift_scip_index::cli::run() {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
