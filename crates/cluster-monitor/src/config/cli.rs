use clap::{Parser, Subcommand};
use utils::version;

use crate::config::monitor::MonitorArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the cluster monitor
    Run(Box<MonitorArgs>),
}
