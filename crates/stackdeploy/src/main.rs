use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use stackdeploy::commands::{
    self, changeset::ChangesetCommand, deploy::DeployArgs, scripts::PostAction, ParameterArgs,
    Session,
};
use stackdeploy_config::RuntimeConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

/// Deploy CloudFormation stacks from a declarative manifest
#[derive(Parser)]
#[command(name = "stackdeploy")]
#[command(version)]
#[command(about = "Deploy CloudFormation stacks from a declarative manifest", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Deployment manifest (defaults to ./stackdeploy.yaml or ./manifest.yaml)
    #[arg(short, long, value_name = "FILE", global = true)]
    manifest: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Also write a DEBUG-level log to this file
    #[arg(long, value_name = "FILE", global = true)]
    debug: Option<PathBuf>,

    /// Template URL that replaces the manifest's template
    #[arg(long, value_name = "URL", global = true)]
    template_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the manifest's stack
    Deploy(DeployArgs),
    /// Print a manifest skeleton for a template file or URL
    Generate {
        #[arg(value_name = "TEMPLATE")]
        template: String,
    },
    /// Validate a template file or URL
    Test {
        #[arg(value_name = "TEMPLATE")]
        template: String,
    },
    /// Print the AWS cost calculator URL for the manifest's stack
    Price(ParameterArgs),
    /// Run only the manifest's pre-install script
    PreInstall(ParameterArgs),
    /// Re-run the post-install or post-update script against the stack's outputs
    PostInstall {
        #[arg(value_enum)]
        action: PostAction,
    },
    /// Work with change sets
    Changeset {
        #[command(subcommand)]
        command: ChangesetCommand,
    },
}

fn main() -> ExitCode {
    // Usage errors exit 1 like every other failure; help and version exit 0
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!(error = ?e, "Command failed");
            eprintln!("{} {:#}", "✗".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // Step 1: Load runtime configuration
    let mut config = RuntimeConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;

    // Step 2: CLI overrides win over file and environment
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    // Step 3: Logging
    stackdeploy::init_tracing(&config.logging, cli.debug.as_deref())?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(dispatch(cli, config))
}

async fn dispatch(cli: Cli, config: RuntimeConfig) -> Result<()> {
    match &cli.command {
        Commands::Generate { template } => {
            return commands::template::generate(&config, template).await
        }
        Commands::Test { template } => return commands::template::test(&config, template).await,
        _ => {}
    }

    let manifest = cli.manifest.clone().or_else(commands::default_manifest);
    let session = Session::open(manifest.as_deref(), cli.template_url.as_deref(), config).await?;

    match &cli.command {
        Commands::Deploy(args) => commands::deploy::run(&session, args).await,
        Commands::Price(args) => commands::deploy::price(&session, args).await,
        Commands::PreInstall(args) => commands::scripts::pre_install(&session, args).await,
        Commands::PostInstall { action } => {
            commands::scripts::post_install(&session, *action).await
        }
        Commands::Changeset { command } => command.run(&session).await,
        Commands::Generate { .. } | Commands::Test { .. } => Ok(()),
    }
}
