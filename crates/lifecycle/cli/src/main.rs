//! `lifecycle` binary

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match lifecycle_cli::run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            lifecycle_cli::print_error(&e.to_string());
            ExitCode::from(e.exit_code())
        }
    }
}
