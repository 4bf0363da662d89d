use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match prestarter_lib::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("prestarter: {err}");
            ExitCode::FAILURE
        }
    }
}
