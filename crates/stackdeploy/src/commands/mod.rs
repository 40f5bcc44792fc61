//! Command implementations behind the CLI subcommands.

pub mod changeset;
pub mod deploy;
pub mod scripts;
pub mod template;

use crate::render::TerminalReporter;
use anyhow::{Context, Result};
use clap::Args;
use stackdeploy_aws::AwsCloudFormation;
use stackdeploy_config::{Manifest, RuntimeConfig};
use stackdeploy_core::{
    parse_parameter_override, DeployOptions, Deployer, ShellProcessRunner, SystemClock,
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// `key=value` parameter overrides shared by the commands that resolve parameters.
#[derive(Args, Debug, Clone, Default)]
pub struct ParameterArgs {
    /// Parameter overrides; these win over the manifest and sourced values
    #[arg(value_name = "KEY=VALUE", value_parser = parse_parameter_override)]
    pub parameters: Vec<(String, String)>,
}

impl ParameterArgs {
    pub fn options(&self) -> DeployOptions {
        DeployOptions::default().with_overrides(self.parameters.iter().cloned())
    }
}

/// Everything a manifest-driven command works with: the loaded manifest, the
/// runtime configuration and a client in the manifest's region.
pub struct Session {
    pub manifest: Manifest,
    pub config: RuntimeConfig,
    cfn: AwsCloudFormation,
    clock: SystemClock,
    reporter: TerminalReporter,
    runner: ShellProcessRunner,
}

impl Session {
    pub async fn open(
        manifest_path: Option<&Path>,
        template_url: Option<&str>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        let manifest_path = require_manifest(manifest_path)?;
        let manifest = Manifest::load(manifest_path, template_url)
            .with_context(|| format!("Failed to load manifest {}", manifest_path.display()))?;
        debug!(
            stack = %manifest.stack_name,
            region = %manifest.region,
            template = %manifest.template,
            "Manifest loaded"
        );

        let cfn =
            AwsCloudFormation::connect(Some(&manifest.region), config.aws.profile.as_deref()).await;
        Ok(Self {
            manifest,
            config,
            cfn,
            clock: SystemClock,
            reporter: TerminalReporter,
            runner: ShellProcessRunner,
        })
    }

    pub fn deployer(&self) -> Deployer<'_> {
        Deployer::new(
            &self.cfn,
            &self.clock,
            &self.reporter,
            &self.runner,
            &self.config,
        )
    }

    pub fn stack_name(&self) -> &str {
        &self.manifest.stack_name
    }
}

fn require_manifest(path: Option<&Path>) -> Result<&Path> {
    path.context("This command needs a manifest: pass --manifest <FILE>")
}

/// Default manifest location when `--manifest` is not given.
pub fn default_manifest() -> Option<PathBuf> {
    ["stackdeploy.yaml", "stackdeploy.yml", "manifest.yaml"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}
