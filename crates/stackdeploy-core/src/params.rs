//! Parameter resolution.
//!
//! Each parameter the template declares gets its value from the first of:
//!
//! 1. a `key=value` pair on the command line
//! 2. the manifest's `Parameters`
//! 3. the manifest's `SourcedParameters`, read from another deployed stack
//! 4. the template's own default
//!
//! Parameters with none of these are left out with a warning, and
//! CloudFormation decides whether that is acceptable.

use crate::error::{DeployError, Result};
use crate::provider::{CloudFormation, TemplateParameter};
use crate::stack::lookup_stack;
use crate::status::{classify_resource_status, Severity};
use stackdeploy_config::{Manifest, Section, SourcedBinding};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    CommandLine,
    Manifest,
    Sourced,
    TemplateDefault,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provenance::CommandLine => "command line",
            Provenance::Manifest => "manifest",
            Provenance::Sourced => "sourced",
            Provenance::TemplateDefault => "template default",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParameter {
    pub key: String,
    pub value: String,
    pub provenance: Provenance,
}

impl ResolvedParameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            provenance,
        }
    }
}

/// The three sections of a dependency stack that bindings may read.
#[derive(Debug, Clone, Default)]
struct DependencyStack {
    resources: BTreeMap<String, String>,
    outputs: BTreeMap<String, String>,
    parameters: BTreeMap<String, String>,
}

impl DependencyStack {
    fn section(&self, section: Section) -> &BTreeMap<String, String> {
        match section {
            Section::Resources => &self.resources,
            Section::Outputs => &self.outputs,
            Section::Parameters => &self.parameters,
        }
    }
}

/// Resolves template parameters. Dependency stacks are fetched once each,
/// one at a time, and cached for the resolver's lifetime.
pub struct ParameterResolver<'a> {
    cfn: &'a dyn CloudFormation,
    cache: HashMap<String, DependencyStack>,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(cfn: &'a dyn CloudFormation) -> Self {
        Self {
            cfn,
            cache: HashMap::new(),
        }
    }

    /// Resolve values for `declared`, in declaration order.
    ///
    /// Every sourced binding for a declared parameter is checked even when a
    /// higher-precedence value wins, so a broken binding always fails the
    /// deployment before anything is changed.
    pub async fn resolve(
        &mut self,
        manifest: &Manifest,
        declared: &[TemplateParameter],
        overrides: &BTreeMap<String, String>,
    ) -> Result<Vec<ResolvedParameter>> {
        warn_undeclared(declared, manifest.parameters.keys(), "manifest Parameters");
        warn_undeclared(declared, manifest.sourced_parameters.keys(), "SourcedParameters");
        warn_undeclared(declared, overrides.keys(), "command line");

        for stack_name in &manifest.depends_on_stacks {
            self.dependency(stack_name).await?;
        }

        let mut resolved = Vec::with_capacity(declared.len());
        for parameter in declared {
            let key = parameter.key.as_str();

            let sourced = match manifest.sourced_parameters.get(key) {
                Some(binding) => {
                    if !manifest.depends_on_stacks.contains(&binding.stack) {
                        warn!(
                            parameter = key,
                            stack = %binding.stack,
                            "Sourced parameter reads a stack not listed in DependsOnStacks"
                        );
                    }
                    Some(self.sourced_value(key, binding).await?)
                }
                None => None,
            };

            let chosen = if let Some(value) = overrides.get(key) {
                Some(ResolvedParameter::new(key, value, Provenance::CommandLine))
            } else if let Some(value) = manifest.parameters.get(key) {
                Some(ResolvedParameter::new(key, value, Provenance::Manifest))
            } else if let Some(value) = sourced {
                Some(ResolvedParameter::new(key, value, Provenance::Sourced))
            } else {
                parameter
                    .default_value
                    .as_ref()
                    .map(|value| ResolvedParameter::new(key, value, Provenance::TemplateDefault))
            };

            match chosen {
                Some(parameter_value) => {
                    debug!(
                        parameter = key,
                        source = %parameter_value.provenance,
                        "Resolved parameter"
                    );
                    resolved.push(parameter_value);
                }
                None => warn!(parameter = key, "No value found for parameter"),
            }
        }

        info!(count = resolved.len(), "Resolved template parameters");
        Ok(resolved)
    }

    async fn sourced_value(&mut self, parameter: &str, binding: &SourcedBinding) -> Result<String> {
        let stack = self.dependency(&binding.stack).await.map_err(|e| match e {
            DeployError::MissingSourcedParameter { reason, .. } => {
                DeployError::MissingSourcedParameter {
                    reference: format!("{binding} (for {parameter})"),
                    reason,
                }
            }
            other => other,
        })?;

        stack
            .section(binding.section)
            .get(&binding.field)
            .cloned()
            .ok_or_else(|| DeployError::MissingSourcedParameter {
                reference: format!("{binding} (for {parameter})"),
                reason: format!(
                    "stack {} has no {} entry named {}",
                    binding.stack,
                    binding.section.as_str(),
                    binding.field
                ),
            })
    }

    async fn dependency(&mut self, stack_name: &str) -> Result<&DependencyStack> {
        if !self.cache.contains_key(stack_name) {
            let fetched = self.fetch(stack_name).await?;
            self.cache.insert(stack_name.to_string(), fetched);
        }
        self.cache
            .get(stack_name)
            .ok_or_else(|| DeployError::MissingSourcedParameter {
                reference: stack_name.to_string(),
                reason: "dependency stack was not loaded".to_string(),
            })
    }

    async fn fetch(&self, stack_name: &str) -> Result<DependencyStack> {
        debug!(stack = stack_name, "Loading dependency stack");

        let snapshot = lookup_stack(self.cfn, stack_name).await?.ok_or_else(|| {
            DeployError::MissingSourcedParameter {
                reference: stack_name.to_string(),
                reason: format!("dependency stack {stack_name} does not exist"),
            }
        })?;

        let resources = self
            .cfn
            .describe_stack_resources(stack_name)
            .await
            .map_err(|e| DeployError::provider("DescribeStackResources", e))?
            .into_iter()
            .filter(|resource| classify_resource_status(&resource.status) == Severity::Good)
            .filter_map(|resource| {
                resource
                    .physical_id
                    .map(|physical_id| (resource.logical_id, physical_id))
            })
            .collect();

        Ok(DependencyStack {
            resources,
            outputs: snapshot.outputs,
            parameters: snapshot.parameters,
        })
    }
}

fn warn_undeclared<'k>(
    declared: &[TemplateParameter],
    keys: impl Iterator<Item = &'k String>,
    origin: &str,
) {
    for key in keys {
        if !declared.iter().any(|parameter| &parameter.key == key) {
            warn!(
                parameter = %key,
                origin,
                "Parameter is not declared by the template and will be ignored"
            );
        }
    }
}
