use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use kira_pipeline::app::{App, RunOptions};
use kira_pipeline::config::Shard;
use kira_pipeline::domain::{DatasetType, MinQuality, Stage};
use kira_pipeline::error::KiraError;
use kira_pipeline::output::JsonOutput;
use kira_pipeline::project::ProjectOptions;
use kira_pipeline::store::Store;

#[derive(Parser)]
#[command(name = "kira-pl")]
#[command(about = "Pipeline progression engine for project-local bio-datasets")]
#[command(version, author)]
struct Cli {
    /// Project directory (defaults to the current directory).
    #[arg(long, global = true)]
    project: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create a project in the project directory")]
    Init(InitArgs),
    #[command(about = "List pipeline stages in execution order")]
    Stages,
    #[command(about = "Manage the dataset registry")]
    Dataset(DatasetArgs),
    #[command(about = "Re-detect every stage result of a dataset")]
    Detect { dataset: String },
    #[command(about = "Show entry point, next stage and its eligibility")]
    Progress { dataset: Option<String> },
    #[command(about = "Explain why a stage would or would not run")]
    Why { dataset: String, stage: String },
    #[command(about = "Control the progression daemon")]
    Daemon(DaemonArgs),
}

#[derive(Args)]
struct InitArgs {
    #[arg(long, default_value = "no")]
    min_qual: String,

    #[arg(long)]
    ref_project: Option<String>,

    #[arg(long)]
    no_mytaxa: bool,
}

#[derive(Args)]
struct DatasetArgs {
    #[command(subcommand)]
    command: DatasetCommand,
}

#[derive(Subcommand)]
enum DatasetCommand {
    #[command(about = "Register a dataset")]
    Add {
        name: String,
        #[arg(long = "type", value_enum, default_value_t = DatasetType::Genome)]
        dataset_type: DatasetType,
        /// Register as a query (non-reference) dataset.
        #[arg(long)]
        query: bool,
    },
    #[command(about = "Deregister a dataset; files stay on disk")]
    Rm { name: String },
    #[command(about = "Re-activate a dataset")]
    Activate { name: String },
    #[command(about = "Exclude a dataset from progression")]
    Inactivate {
        name: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Args)]
struct DaemonArgs {
    #[command(subcommand)]
    command: DaemonCommand,
}

#[derive(Subcommand)]
enum DaemonCommand {
    #[command(about = "Start the daemon in the background")]
    Start {
        #[arg(long)]
        config: Option<Utf8PathBuf>,
    },
    #[command(about = "Ask the daemon to stop")]
    Stop {
        /// Seconds to wait for the daemon to exit (0 returns immediately).
        #[arg(long, default_value_t = 300)]
        wait: u64,
    },
    #[command(about = "Stop, then start the daemon")]
    Restart {
        #[arg(long)]
        config: Option<Utf8PathBuf>,
        #[arg(long, default_value_t = 300)]
        wait: u64,
    },
    #[command(about = "Show daemon liveness and last cycle")]
    Status,
    #[command(about = "Run the daemon in the foreground")]
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Run a single cycle and print its summary.
    #[arg(long)]
    once: bool,

    /// Log jobs instead of running them.
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    worker: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::ProjectNotFound(_)
        | KiraError::DatasetNotFound(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidShard { .. }
        | KiraError::MissingDispatchCommand => 2,
        KiraError::Dispatch { .. } | KiraError::DaemonNotRunning(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = match cli.project {
        Some(root) => Store::new(root),
        None => Store::from_current_dir()?,
    };
    let app = App::new(store);

    match cli.command {
        Commands::Init(args) => {
            let options = ProjectOptions {
                min_qual: args.min_qual.parse::<MinQuality>()?,
                ref_project: args.ref_project,
                run_mytaxa: args.no_mytaxa.then_some(false),
                ..ProjectOptions::default()
            };
            let result = app.init(options)?;
            JsonOutput::print_init(&result).into_diagnostic()
        }
        Commands::Stages => JsonOutput::print_stages(&app.stages()).into_diagnostic(),
        Commands::Dataset(args) => run_dataset(&app, args.command),
        Commands::Detect { dataset } => {
            let result = app.detect(&dataset)?;
            JsonOutput::print_detect(&result).into_diagnostic()
        }
        Commands::Progress { dataset } => {
            let result = app.progress(dataset.as_deref())?;
            JsonOutput::print_progress(&result).into_diagnostic()
        }
        Commands::Why { dataset, stage } => {
            let stage = stage.parse::<Stage>()?;
            let result = app.why(&dataset, stage)?;
            JsonOutput::print_why(&result).into_diagnostic()
        }
        Commands::Daemon(args) => run_daemon(&app, args.command),
    }
}

fn run_dataset(app: &App, command: DatasetCommand) -> miette::Result<()> {
    let result = match command {
        DatasetCommand::Add {
            name,
            dataset_type,
            query,
        } => app.add_dataset(&name, dataset_type, !query)?,
        DatasetCommand::Rm { name } => app.remove_dataset(&name)?,
        DatasetCommand::Activate { name } => app.set_active(&name, true, None)?,
        DatasetCommand::Inactivate { name, reason } => {
            app.set_active(&name, false, reason.as_deref())?
        }
    };
    JsonOutput::print_dataset(&result).into_diagnostic()
}

fn run_daemon(app: &App, command: DaemonCommand) -> miette::Result<()> {
    match command {
        DaemonCommand::Start { config } => {
            let report = app.daemon_start(config.as_deref())?;
            JsonOutput::print_daemon(&report).into_diagnostic()
        }
        DaemonCommand::Stop { wait } => {
            let report = app.daemon_stop(Duration::from_secs(wait))?;
            JsonOutput::print_daemon(&report).into_diagnostic()
        }
        DaemonCommand::Restart { config, wait } => {
            let report = app.daemon_restart(config.as_deref(), Duration::from_secs(wait))?;
            JsonOutput::print_daemon(&report).into_diagnostic()
        }
        DaemonCommand::Status => JsonOutput::print_daemon(&app.daemon_status()).into_diagnostic(),
        DaemonCommand::Run(args) => {
            let mut config = app.daemon_config(args.config.as_deref())?;
            if args.worker.is_some() || args.workers.is_some() {
                config.shard = Shard::new(
                    args.worker.unwrap_or(config.shard.worker),
                    args.workers.unwrap_or(config.shard.workers),
                )?;
            }
            let options = RunOptions {
                once: args.once,
                dry_run: args.dry_run,
            };
            if let Some(result) = app.run_daemon(config, options)? {
                JsonOutput::print_cycle(&result).into_diagnostic()?;
            }
            Ok(())
        }
    }
}
