//! `generate` and `test`: template commands that need no manifest

use crate::generate;
use crate::render::TerminalReporter;
use anyhow::{Context, Result};
use colored::Colorize;
use stackdeploy_aws::AwsCloudFormation;
use stackdeploy_config::RuntimeConfig;
use stackdeploy_core::{Deployer, ShellProcessRunner, SystemClock, TemplateParameter};

async fn validate(
    config: &RuntimeConfig,
    location: &str,
) -> Result<(AwsCloudFormation, Vec<TemplateParameter>)> {
    let template = Deployer::template_from_location(location)?;
    let cfn = AwsCloudFormation::connect(
        config.aws.region.as_deref(),
        config.aws.profile.as_deref(),
    )
    .await;

    let declared = Deployer::new(
        &cfn,
        &SystemClock,
        &TerminalReporter,
        &ShellProcessRunner,
        config,
    )
    .validate(&template)
    .await?;
    Ok((cfn, declared))
}

/// Validate `location` and print a manifest skeleton for it.
pub async fn generate(config: &RuntimeConfig, location: &str) -> Result<()> {
    let (cfn, declared) = validate(config, location).await?;
    let region = cfn
        .region()
        .or(config.aws.region.as_deref())
        .context("No AWS region configured: set AWS_REGION or aws.region in the config file")?;

    print!("{}", generate::render_manifest(location, region, &declared)?);
    Ok(())
}

pub async fn test(config: &RuntimeConfig, location: &str) -> Result<()> {
    validate(config, location).await?;
    println!("{} Template is valid", "✓".green().bold());
    Ok(())
}
