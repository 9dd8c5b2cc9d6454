use notesd::daemon::{
    DaemonConfig, DaemonRuntime, describe_outcome, open_store, read_status,
};
use notesd::sync::engine::SyncOutcome;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    SyncOnce,
    Status,
    ClearQueue,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--sync-once" => mode = CliMode::SyncOnce,
            "--status" => mode = CliMode::Status,
            "--clear-queue" => mode = CliMode::ClearQueue,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        println!("Usage: notesd [--sync-once | --status | --clear-queue]");
        println!("  --sync-once     Run one sync pass and exit");
        println!("  --status        Print note count and pending queue length");
        println!("  --clear-queue   Drop every pending change without sending it");
        return Ok(());
    }

    let config = DaemonConfig::from_env()?;
    match mode {
        CliMode::Status => {
            let store = open_store(&config).await?;
            let status = read_status(&store).await?;
            println!("notes: {}", status.notes);
            println!("queued changes: {}", status.queued);
            store.close().await;
        }
        CliMode::ClearQueue => {
            let store = open_store(&config).await?;
            let removed = store.clear_queue().await?;
            println!("removed {removed} queued change(s)");
            store.close().await;
        }
        CliMode::SyncOnce => {
            let daemon = DaemonRuntime::bootstrap(config).await?;
            let outcome = daemon.sync_once().await;
            println!("{}", describe_outcome(&outcome));
            daemon.engine().store().close().await;
            if let SyncOutcome::Failed(reason) | SyncOutcome::Rejected(reason) = outcome {
                anyhow::bail!("sync pass failed: {reason}");
            }
        }
        CliMode::Run => {
            let daemon = DaemonRuntime::bootstrap(config).await?;
            daemon.run().await?;
        }
        CliMode::Help => {}
    }
    Ok(())
}
