use std::process::ExitCode;

use clap::Parser;

use summit::{Args, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let hardware_client = args.hardware_client();
    let options = args.run_options();
    let run_result = run(args.into_command(), &mut stdout, hardware_client, options).await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
