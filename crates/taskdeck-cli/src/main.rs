use std::process::ExitCode;

fn main() -> ExitCode {
    match taskdeck_core::run(std::env::args_os().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("taskdeck: {err:#}");
            ExitCode::FAILURE
        }
    }
}
