use anyhow::Result;
use clap::Parser;
use cluster_monitor::app::ApplicationBuilder;
use cluster_monitor::config::Cli;
use cluster_monitor::config::Commands;
use cluster_monitor::config::MonitorArgs;
use cluster_monitor::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(monitor_args) => run_monitor(*monitor_args).await,
    }
}

async fn run_monitor(monitor_args: MonitorArgs) -> Result<()> {
    let _guard = logging::init(monitor_args.dashboard_log_file.clone());

    tracing::info!("Starting cluster monitor {}", &**version::VERSION);

    let app = ApplicationBuilder::new(monitor_args).build().await?;

    app.run().await?;
    app.shutdown().await?;

    Ok(())
}
