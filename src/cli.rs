use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "keeper")]
#[command(version)]
#[command(about = "Automation keeper for on-chain limit orders and DCA schedules", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration directory (default.toml, $KEEPER_ENV.toml)
    #[arg(short, long, global = true, default_value = "config", env = "KEEPER_CONFIG_DIR")]
    pub config_dir: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the keeper loop until interrupted
    Run {
        /// Submit transactions (overrides executor.dry_run)
        #[arg(long)]
        live: bool,
    },
    /// Run a single tick and print its report
    Once {
        /// Submit transactions (overrides executor.dry_run)
        #[arg(long)]
        live: bool,
    },
    /// Load and validate configuration, then exit
    CheckConfig,
}

impl Cli {
    /// `run` is the default command
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or(Commands::Run { live: false })
    }
}
