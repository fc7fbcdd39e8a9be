mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use presence_core::config::get_data_dir;

use commands::{config, daemon, history, session};

#[derive(Parser)]
#[command(name = "presence")]
#[command(about = "Tracks how long you are actually at the computer", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new session now
    Start,
    /// End the current session
    Stop,
    /// Show the current session and today's total
    Current,
    /// Continuously show the current session
    Live {
        /// Refresh interval in seconds (0.2 to 3600)
        #[arg(short, long, default_value_t = 1.0, value_parser = session::parse_live_interval)]
        interval: f64,
    },
    /// Show history statistics
    History {
        /// Also list every recorded session
        #[arg(short, long)]
        sessions: bool,
    },
    /// Delete all sessions and totals
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonAction {
    /// Start the daemon in the background
    Start,
    /// Stop the background daemon
    Stop,
    /// Show daemon status
    Status,
    /// Run the daemon in the foreground
    Run,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the data directory and config file locations
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The daemon process sets up its own file logger
    if !matches!(
        cli.command,
        Commands::Daemon {
            action: DaemonAction::Run
        }
    ) {
        daemon::init_stderr_logging(cli.verbose);
    }

    let data_dir = get_data_dir()?;

    match cli.command {
        Commands::Start => session::start(&data_dir).await,
        Commands::Stop => session::stop(&data_dir).await,
        Commands::Current => session::current(&data_dir).await,
        Commands::Live { interval } => session::live(&data_dir, interval).await,
        Commands::History { sessions } => history::show_history(&data_dir, sessions),
        Commands::Reset { yes } => history::reset(&data_dir, yes),
        Commands::Daemon { action } => match action {
            DaemonAction::Start => daemon::start_daemon(&data_dir),
            DaemonAction::Stop => daemon::stop_daemon(&data_dir).await,
            DaemonAction::Status => daemon::show_status(&data_dir).await,
            DaemonAction::Run => daemon::run_daemon_process(&data_dir, cli.verbose).await,
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => config::show_config(&data_dir),
            ConfigAction::Path => {
                config::show_path(&data_dir);
                Ok(())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_history_with_sessions() {
        let cli = Cli::parse_from(["presence", "history", "--sessions"]);
        assert!(matches!(cli.command, Commands::History { sessions: true }));
    }

    #[test]
    fn test_parse_daemon_run_verbose() {
        let cli = Cli::parse_from(["presence", "daemon", "run", "-v"]);
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Daemon {
                action: DaemonAction::Run
            }
        ));
    }

    #[test]
    fn test_live_interval_must_be_finite_and_in_range() {
        let cli = Cli::parse_from(["presence", "live", "--interval", "2.5"]);
        assert!(matches!(cli.command, Commands::Live { interval } if (interval - 2.5).abs() < f64::EPSILON));

        assert!(Cli::try_parse_from(["presence", "live", "--interval", "inf"]).is_err());
        assert!(Cli::try_parse_from(["presence", "live", "--interval", "0"]).is_err());
    }
}
