//! `deploy` and `price`

use super::{ParameterArgs, Session};
use crate::render;
use anyhow::Result;
use clap::Args;
use stackdeploy_core::DeployOptions;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    /// Show what would be sent without changing the stack or running scripts
    #[arg(long)]
    pub dry_run: bool,

    /// Update the stack even if its current status is not healthy
    #[arg(long)]
    pub force: bool,

    /// Logical resource ids the stack policy should let this update touch
    #[arg(long, value_name = "ID", value_delimiter = ',')]
    pub allow_update: Vec<String>,

    /// Replace the stack's policy with the one in the manifest
    #[arg(long)]
    pub update_policy: bool,

    #[command(flatten)]
    pub parameters: ParameterArgs,
}

impl DeployArgs {
    pub fn options(&self) -> DeployOptions {
        DeployOptions {
            dry_run: self.dry_run,
            force: self.force,
            allow_update: self.allow_update.clone(),
            update_policy: self.update_policy,
            ..self.parameters.options()
        }
    }
}

pub async fn run(session: &Session, args: &DeployArgs) -> Result<()> {
    let options = args.options();
    info!(
        stack = session.stack_name(),
        region = %session.manifest.region,
        dry_run = options.dry_run,
        "Deploying"
    );

    let outcome = session.deployer().deploy(&session.manifest, &options).await?;
    render::deploy_outcome(session.stack_name(), &outcome);
    Ok(())
}

pub async fn price(session: &Session, args: &ParameterArgs) -> Result<()> {
    let url = session
        .deployer()
        .price(&session.manifest, &args.options())
        .await?;
    println!("{url}");
    Ok(())
}
