//! The deployment workflows behind each CLI command.

use crate::changeset::{ChangesetController, ChangesetReview};
use crate::clock::Clock;
use crate::error::{DeployError, Result};
use crate::options::DeployOptions;
use crate::params::{ParameterResolver, ResolvedParameter};
use crate::provider::{ChangeSetSummary, CloudFormation, TemplateParameter, TemplateRef};
use crate::report::Reporter;
use crate::script::{ProcessRunner, ScriptOutcome, ScriptPhase, ScriptRunner};
use crate::stack::{StackAction, StackController, SubmitOutcome};
use crate::status::StackStatus;
use stackdeploy_config::{Manifest, RuntimeConfig, TemplateSource};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// The stack reached a healthy terminal status.
    Completed {
        action: StackAction,
        status: StackStatus,
        post_script: ScriptOutcome,
    },
    NoChanges { action: StackAction },
    DryRun { action: StackAction },
}

pub struct Deployer<'a> {
    cfn: &'a dyn CloudFormation,
    clock: &'a dyn Clock,
    reporter: &'a dyn Reporter,
    runner: &'a dyn ProcessRunner,
    config: &'a RuntimeConfig,
}

impl<'a> Deployer<'a> {
    pub fn new(
        cfn: &'a dyn CloudFormation,
        clock: &'a dyn Clock,
        reporter: &'a dyn Reporter,
        runner: &'a dyn ProcessRunner,
        config: &'a RuntimeConfig,
    ) -> Self {
        Self {
            cfn,
            clock,
            reporter,
            runner,
            config,
        }
    }

    fn stacks(&self) -> StackController<'_> {
        StackController::new(self.cfn, self.clock, self.reporter, &self.config.poll)
    }

    fn changesets(&self) -> ChangesetController<'_> {
        ChangesetController::new(self.cfn, self.clock, self.reporter, &self.config.poll)
    }

    fn scripts(&self) -> ScriptRunner<'_> {
        ScriptRunner::new(&self.config.scripts.scratch_dir, self.runner)
    }

    /// Turn a manifest template source into what CloudFormation accepts.
    pub fn template_ref(source: &TemplateSource) -> Result<TemplateRef> {
        match source.url() {
            Some(url) => Ok(TemplateRef::Url(url.to_string())),
            None => match source.read_body()? {
                Some(body) => Ok(TemplateRef::Body(body)),
                None => Err(DeployError::Validation {
                    template: source.to_string(),
                    message: "template has no body".to_string(),
                }),
            },
        }
    }

    /// A template given on the command line: an http(s) URL or a local file.
    pub fn template_from_location(location: &str) -> Result<TemplateRef> {
        if location.starts_with("https://") || location.starts_with("http://") {
            return Ok(TemplateRef::Url(location.to_string()));
        }
        std::fs::read_to_string(location)
            .map(TemplateRef::Body)
            .map_err(|e| DeployError::io(Path::new(location), e))
    }

    /// Validate a template with CloudFormation and return its declared parameters.
    pub async fn validate(&self, template: &TemplateRef) -> Result<Vec<TemplateParameter>> {
        let declared = self
            .cfn
            .validate_template(template)
            .await
            .map_err(|e| DeployError::Validation {
                template: template.describe(),
                message: e.to_string(),
            })?;
        info!(
            template = %template.describe(),
            parameters = declared.len(),
            "Template is valid"
        );
        Ok(declared)
    }

    /// Validate the manifest's template and resolve its parameters.
    pub async fn resolve_parameters(
        &self,
        manifest: &Manifest,
        options: &DeployOptions,
    ) -> Result<(TemplateRef, Vec<ResolvedParameter>)> {
        let template = Self::template_ref(&manifest.template)?;
        let declared = self.validate(&template).await?;
        let parameters = ParameterResolver::new(self.cfn)
            .resolve(manifest, &declared, &options.overrides)
            .await?;
        Ok((template, parameters))
    }

    /// Create or update the manifest's stack and see it through to a
    /// terminal status.
    pub async fn deploy(
        &self,
        manifest: &Manifest,
        options: &DeployOptions,
    ) -> Result<DeployOutcome> {
        let stack_name = manifest.stack_name.as_str();
        let stacks = self.stacks();

        let action = stacks.plan(stack_name, options.force).await?;
        let (template, parameters) = self.resolve_parameters(manifest, options).await?;
        self.run_pre_install(manifest, &parameters, options.dry_run).await?;

        let during_update = match action {
            StackAction::Update => {
                stacks
                    .update_policy_for(stack_name, &options.allow_update)
                    .await?
            }
            StackAction::Create => {
                if !options.allow_update.is_empty() {
                    warn!(stack = stack_name, "--allow-update has no effect when creating a stack");
                }
                None
            }
        };

        let request = StackController::build_request(
            action,
            manifest,
            &template,
            &parameters,
            during_update,
            options.update_policy,
        );

        match stacks.submit(action, &request, options.dry_run).await? {
            SubmitOutcome::DryRun => return Ok(DeployOutcome::DryRun { action }),
            SubmitOutcome::NoChanges => return Ok(DeployOutcome::NoChanges { action }),
            SubmitOutcome::Submitted { .. } => {}
        }

        let status = stacks.poll_until_terminal(stack_name).await?;
        if !status.is_good() {
            return Err(DeployError::StackFailed {
                stack_name: stack_name.to_string(),
                status,
            });
        }

        let post_script = self.post_install(manifest, action).await?;
        Ok(DeployOutcome::Completed {
            action,
            status,
            post_script,
        })
    }

    /// Resolve parameters and run only the pre-install script.
    pub async fn pre_install(
        &self,
        manifest: &Manifest,
        options: &DeployOptions,
    ) -> Result<ScriptOutcome> {
        let (_, parameters) = self.resolve_parameters(manifest, options).await?;
        self.run_pre_install(manifest, &parameters, options.dry_run).await
    }

    async fn run_pre_install(
        &self,
        manifest: &Manifest,
        parameters: &[ResolvedParameter],
        dry_run: bool,
    ) -> Result<ScriptOutcome> {
        self.scripts()
            .run(
                &manifest.stack_name,
                &manifest.region,
                ScriptPhase::PreInstall,
                manifest.pre_install_script.as_deref(),
                &parameter_values(parameters),
                dry_run,
            )
            .await
    }

    /// Run the post-install (after a create) or post-update script with the
    /// stack's current outputs.
    pub async fn post_install(
        &self,
        manifest: &Manifest,
        action: StackAction,
    ) -> Result<ScriptOutcome> {
        let (phase, body) = match action {
            StackAction::Create => (
                ScriptPhase::PostInstall,
                manifest.post_install_script.as_deref(),
            ),
            StackAction::Update => (
                ScriptPhase::PostUpdate,
                manifest.post_update_script.as_deref(),
            ),
        };
        if body.is_none() {
            return Ok(ScriptOutcome::Skipped);
        }

        let snapshot = self
            .stacks()
            .lookup(&manifest.stack_name)
            .await?
            .ok_or_else(|| DeployError::StackNotFound {
                stack_name: manifest.stack_name.clone(),
            })?;

        self.scripts()
            .run(
                &manifest.stack_name,
                &manifest.region,
                phase,
                body,
                &snapshot.outputs,
                false,
            )
            .await
    }

    /// Ask CloudFormation for a cost estimate; returns the calculator URL.
    pub async fn price(&self, manifest: &Manifest, options: &DeployOptions) -> Result<String> {
        let (template, parameters) = self.resolve_parameters(manifest, options).await?;
        self.cfn
            .estimate_template_cost(&template, &parameters)
            .await
            .map_err(|e| DeployError::provider("EstimateTemplateCost", e))
    }

    pub async fn create_changeset(
        &self,
        manifest: &Manifest,
        options: &DeployOptions,
        change_set_name: &str,
        description: Option<&str>,
    ) -> Result<ChangesetReview> {
        let (template, parameters) = self.resolve_parameters(manifest, options).await?;
        self.changesets()
            .create(manifest, &template, &parameters, change_set_name, description)
            .await
    }

    pub async fn describe_changeset(
        &self,
        manifest: &Manifest,
        change_set_name: &str,
    ) -> Result<ChangesetReview> {
        self.changesets()
            .describe_and_classify(&manifest.stack_name, change_set_name, false)
            .await
    }

    /// Execute a reviewed changeset; a healthy result runs the post-update script.
    pub async fn execute_changeset(
        &self,
        manifest: &Manifest,
        change_set_name: &str,
    ) -> Result<DeployOutcome> {
        let status = self
            .changesets()
            .execute(&manifest.stack_name, change_set_name)
            .await?;
        if !status.is_good() {
            return Err(DeployError::StackFailed {
                stack_name: manifest.stack_name.clone(),
                status,
            });
        }

        let post_script = self.post_install(manifest, StackAction::Update).await?;
        Ok(DeployOutcome::Completed {
            action: StackAction::Update,
            status,
            post_script,
        })
    }

    pub async fn delete_changeset(&self, manifest: &Manifest, change_set_name: &str) -> Result<()> {
        self.changesets()
            .delete(&manifest.stack_name, change_set_name)
            .await
    }

    pub async fn list_changesets(&self, manifest: &Manifest) -> Result<Vec<ChangeSetSummary>> {
        self.changesets().list(&manifest.stack_name).await
    }
}

fn parameter_values(parameters: &[ResolvedParameter]) -> BTreeMap<String, String> {
    parameters
        .iter()
        .map(|p| (p.key.clone(), p.value.clone()))
        .collect()
}
