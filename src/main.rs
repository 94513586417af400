//! sitebak - back up a website: server-side archive, FTPS download, database dump.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sitebak::{init_logging, BackupConfig, BackupManager, ConfigError};
use sitebak::StepOutcome;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "sitebak")]
#[command(version)]
#[command(about = "Archive a website on its server, download it over FTPS, dump its database")]
struct Args {
    /// JSON config file; without it the FTP_*, SSH_*, DB_* variables are used
    #[arg(long, value_name = "PATH", env = "SITEBAK_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Archive, download and dump in one run
    Backup {
        /// Site directory under the SSH remote base
        #[arg(value_name = "SITE_DIR")]
        site_dir: String,

        /// Name of the local .sql dump
        #[arg(value_name = "DUMP_NAME")]
        database: String,

        /// Archive name (defaults to the lower-cased site directory)
        #[arg(long, value_name = "NAME")]
        archive_name: Option<String>,
    },
    /// Only create the remote archive
    Archive {
        #[arg(value_name = "SITE_DIR")]
        site_dir: String,

        #[arg(long, value_name = "NAME")]
        archive_name: Option<String>,
    },
    /// Only download a file or directory from the FTP base path
    Download {
        #[arg(value_name = "REMOTE_PATH")]
        remote_path: String,
    },
    /// Only dump the database
    Dump {
        #[arg(value_name = "DUMP_NAME")]
        name: String,
    },
    /// Check that the database is reachable
    TestDb,
    /// Print an estimate of the dump size in bytes
    EstimateDb,
}

fn load_config(path: Option<&PathBuf>) -> Result<BackupConfig, ConfigError> {
    match path {
        Some(path) => BackupConfig::from_file(path),
        None => BackupConfig::from_environment(),
    }
}

fn exit_for(outcome: &StepOutcome) -> ExitCode {
    if outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    let config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };
    if config.is_empty() {
        warn!("Nothing is configured; every step will be skipped.");
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping...");
            on_signal.cancel();
        }
    });

    let mut manager = BackupManager::from_config(config, shutdown);

    match args.command {
        Command::Backup {
            site_dir,
            database,
            archive_name,
        } => {
            let report = manager
                .full_backup(&site_dir, &database, archive_name.as_deref())
                .await;
            match serde_json::to_string(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Cannot serialise backup report: {}", e),
            }
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Archive {
            site_dir,
            archive_name,
        } => exit_for(
            &manager
                .create_remote_archive(&site_dir, archive_name.as_deref())
                .await,
        ),
        Command::Download { remote_path } => {
            exit_for(&manager.download_from_ftp(&remote_path).await)
        }
        Command::Dump { name } => exit_for(&manager.dump_database(&name).await),
        Command::TestDb => {
            let Some(dumper) = manager.dumper() else {
                error!("No database configured.");
                return ExitCode::from(2);
            };
            match dumper.test_connection().await {
                Ok(()) => {
                    info!("Database connection OK.");
                    ExitCode::SUCCESS
                }
                Err(_) => ExitCode::FAILURE,
            }
        }
        Command::EstimateDb => {
            let Some(dumper) = manager.dumper() else {
                error!("No database configured.");
                return ExitCode::from(2);
            };
            println!("{}", dumper.estimate_size().await);
            ExitCode::SUCCESS
        }
    }
}
