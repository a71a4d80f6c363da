use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use ftpclaimd::config::{FtpSettings, RuntimeConfig};
use ftpclaimd::daemon::{DaemonRuntime, init_logging, render_status, status_view};
use ftpclaimd::sync::{ClaimOutcome, RejectReason};

#[derive(Debug, Parser)]
#[command(
    name = "ftpclaimd",
    version,
    about = "Claim FTP folders through a shared spreadsheet ledger"
)]
struct Cli {
    /// Settings file; defaults to $FTPCLAIM_CONFIG or the user config directory
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// Reconcile on an interval until interrupted
    Run,
    /// Run one reconciliation pass and print every folder's status
    Reconcile,
    /// Show available folders and who holds the rest
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Claim a folder and download it
    Claim {
        folder: String,
        /// Editor name; asked for interactively when omitted
        #[arg(long)]
        editor: Option<String>,
        /// Download directory for this claim
        #[arg(long, value_name = "DIR")]
        dest: Option<PathBuf>,
    },
    /// Inspect or change the FTP settings
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum ConfigCommand {
    /// Print the settings file with the password masked
    Show,
    /// Update selected fields, keeping the rest of the file
    Set(SetArgs),
}

#[derive(Debug, Args, PartialEq, Eq)]
struct SetArgs {
    /// host or host:port
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    password: Option<String>,
    /// Remote directory whose subfolders are claimed
    #[arg(long)]
    base_path: Option<String>,
    /// Browser URL of the ledger spreadsheet
    #[arg(long)]
    sheet_url: Option<String>,
}

impl SetArgs {
    fn into_settings(self) -> anyhow::Result<FtpSettings> {
        let fields = [
            ("host", &self.host),
            ("user", &self.user),
            ("password", &self.password),
            ("base-path", &self.base_path),
            ("sheet-url", &self.sheet_url),
        ];
        if let Some((flag, _)) = fields
            .iter()
            .find(|(_, value)| value.as_deref().is_some_and(|v| v.trim().is_empty()))
        {
            anyhow::bail!("--{flag} must not be blank");
        }
        let settings = FtpSettings {
            host: self.host,
            user: self.user,
            password: self.password,
            base_path: self.base_path,
            google_sheet_url: self.sheet_url,
        };
        if settings.is_empty() {
            anyhow::bail!("nothing to update; pass at least one field flag");
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let mut config = RuntimeConfig::from_env(cli.config);

    match cli.command {
        Command::Config { action } => run_config(&config, action),
        Command::Run => {
            DaemonRuntime::bootstrap(config)?.run().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Reconcile => {
            let report = DaemonRuntime::bootstrap(config)?.reconcile_once().await?;
            for (folder, status) in &report.folders {
                println!("{folder}\t{status}");
            }
            if !report.seeded.is_empty() {
                println!("added to ledger: {}", report.seeded.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { json } => {
            let report = DaemonRuntime::bootstrap(config)?.reconcile_once().await?;
            let view = status_view(&report);
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print!("{}", render_status(&view));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Claim {
            folder,
            editor,
            dest,
        } => {
            if let Some(dest) = dest {
                config.download_root = dest;
            }
            let daemon = DaemonRuntime::bootstrap(config)?;
            daemon.reconcile_once().await?;
            match daemon.claim(&folder, editor).await {
                ClaimOutcome::Claimed(path) => {
                    println!("{folder} downloaded to {}", path.display());
                    Ok(ExitCode::SUCCESS)
                }
                ClaimOutcome::Rejected(RejectReason::Interrupted) => {
                    eprintln!("claim of {folder} interrupted; row released");
                    // A blocked transfer thread would hold runtime shutdown.
                    std::process::exit(130)
                }
                ClaimOutcome::Rejected(reason) => {
                    eprintln!("claim of {folder} rejected: {reason}");
                    Ok(ExitCode::from(2))
                }
                ClaimOutcome::Failed(err) => Err(err.into()),
            }
        }
    }
}

fn run_config(config: &RuntimeConfig, action: ConfigCommand) -> anyhow::Result<ExitCode> {
    let store = config.settings_store();
    match action {
        ConfigCommand::Show => {
            println!(
                "{}",
                serde_json::to_string_pretty(&store.masked_document()?)?
            );
        }
        ConfigCommand::Set(args) => {
            store.save(&args.into_settings()?)?;
            println!("saved {}", store.path().display());
        }
    }
    Ok(ExitCode::SUCCESS)
}
