use std::process::ExitCode;

use clap::Parser;
use common::logging::init_logging;
use tracing::error;

use mbclient::bootstrap::Args;
use mbclient::functions::usage_table;
use mbclient::output::{format_success, format_write_data, FAILURE_LINE};
use mbclient::{build_plan, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.service.log_config("mbclient")) {
        eprintln!("Error: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let plan = match build_plan(&args) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("Error: {}\n\nFunction types:\n{}", e, usage_table());
            return ExitCode::FAILURE;
        },
    };

    if args.service.debug {
        if let Some(line) = format_write_data(&plan) {
            println!("{}", line);
        }
    }

    match run(&plan).await {
        Ok(response) => match format_success(&plan, &response) {
            Some(line) => {
                println!("{}", line);
                ExitCode::SUCCESS
            },
            None => {
                println!("{}", FAILURE_LINE);
                eprintln!(
                    "Error: expected {} element(s), reply carried {}",
                    plan.expected_count(),
                    response.count()
                );
                ExitCode::FAILURE
            },
        },
        Err(e) => {
            error!("{}", e);
            println!("{}", FAILURE_LINE);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        },
    }
}
