use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use common::logging::init_logging;
use common::shutdown::{spawn_force_exit_watcher, wait_for_shutdown, InterruptCounter};
use errors::MbuResult;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mbsrv::bootstrap::Args;
use mbsrv::{create_session, Multiplexer, RegisterStore, ServerSettings, SessionContext};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.service.log_config("mbsrv")) {
        eprintln!("Error: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        },
    }
}

async fn run(args: Args) -> MbuResult<()> {
    let transport = args.transport_config()?;
    let settings = ServerSettings::load(args.config.as_deref(), &args.overrides()?)?;

    let store = Arc::new(RegisterStore::new(settings.banks));
    if args.service.debug {
        println!("{}", store.describe_ranges());
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        let counter = InterruptCounter::new();
        counter.record();
        info!("Shutdown signal received, closing connections");
        signal_token.cancel();
        spawn_force_exit_watcher(counter);
    });

    info!("Starting mbsrv v{} ({})", env!("CARGO_PKG_VERSION"), transport);
    let options = settings.multiplexer_options();
    match create_session(&transport) {
        SessionContext::Network(backend) => {
            Multiplexer::new(backend.with_backlog(settings.backlog), store, options)
                .run(shutdown)
                .await?
        },
        SessionContext::Serial(backend) => {
            Multiplexer::new(backend, store, options).run(shutdown).await?
        },
    }

    info!("mbsrv stopped");
    Ok(())
}
