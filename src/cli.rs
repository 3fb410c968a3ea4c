use clap::{Parser, Subcommand};

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "loyalty")]
#[command(version = "0.1.0")]
#[command(about = "Loyalty points accrual reconciliation service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Address for the health endpoints
    #[arg(short = 'a', long)]
    pub run_address: Option<String>,

    /// PostgreSQL connection URI
    #[arg(short = 'd', long)]
    pub database_uri: Option<String>,

    /// Accrual provider base address
    #[arg(short = 'r', long)]
    pub accrual_address: Option<String>,

    /// Number of accrual workers (default: CPU cores)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Interval between pending order scans
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Keep orders and withdrawals in memory instead of PostgreSQL
    #[arg(long)]
    pub memory: bool,

    /// Directory holding default.toml and per-environment overrides
    #[arg(long, default_value = "config")]
    pub config_dir: String,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run reconciliation and the health server (default)
    Run,
    /// Apply database migrations and exit
    Migrate,
}

impl Cli {
    /// Overlay command-line flags on loaded configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(addr) = &self.run_address {
            config.server.run_address = addr.clone();
        }
        if let Some(uri) = &self.database_uri {
            config.database.url = uri.clone();
        }
        if let Some(addr) = &self.accrual_address {
            config.accrual.address = addr.clone();
        }
        if let Some(workers) = self.workers {
            config.accrual.workers = workers;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.accrual.poll_interval_ms = ms;
        }
    }

    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}
