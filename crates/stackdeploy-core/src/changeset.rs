//! Changesets: create, review against the stack policy, execute, delete, list.

use crate::clock::Clock;
use crate::error::{DeployError, Result};
use crate::params::ResolvedParameter;
use crate::policy::{PolicyViolation, StackPolicy};
use crate::provider::{
    ChangeAction, ChangeSetDescription, ChangeSetEntry, ChangeSetRequest, ChangeSetSummary,
    CloudFormation, Replacement, TemplateRef, CAPABILITIES,
};
use crate::report::Reporter;
use crate::stack::{lookup_stack, StackController};
use crate::status::StackStatus;
use stackdeploy_config::{Manifest, PollConfig};
use tracing::{info, warn};

const PENDING_STATUSES: &[&str] = &["CREATE_PENDING", "CREATE_IN_PROGRESS"];
const EXECUTABLE: &str = "AVAILABLE";
const NO_CHANGES_REASON: &str = "didn't contain changes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Modify,
    Replace,
    ConditionalReplace,
    Remove,
    Unknown,
}

impl ChangeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ChangeKind::Add => "Add",
            ChangeKind::Modify => "Modify",
            ChangeKind::Replace => "Replace",
            ChangeKind::ConditionalReplace => "Conditional replace",
            ChangeKind::Remove => "Remove",
            ChangeKind::Unknown => "Unknown",
        }
    }

    pub fn risk(&self) -> Risk {
        match self {
            ChangeKind::Add | ChangeKind::Modify => Risk::Safe,
            ChangeKind::ConditionalReplace | ChangeKind::Unknown => Risk::Caution,
            ChangeKind::Replace | ChangeKind::Remove => Risk::Destructive,
        }
    }
}

/// How alarming a change is; drives the color it is shown in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Risk {
    Safe,
    Caution,
    Destructive,
}

pub fn classify_change(entry: &ChangeSetEntry) -> ChangeKind {
    match (&entry.action, &entry.replacement) {
        (ChangeAction::Add, _) => ChangeKind::Add,
        (ChangeAction::Remove, _) => ChangeKind::Remove,
        (ChangeAction::Modify, Replacement::True) => ChangeKind::Replace,
        (ChangeAction::Modify, Replacement::Conditional) => ChangeKind::ConditionalReplace,
        (ChangeAction::Modify, Replacement::False) => ChangeKind::Modify,
        (ChangeAction::Modify, Replacement::Unspecified) | (ChangeAction::Other(_), _) => {
            ChangeKind::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedChange {
    pub entry: ChangeSetEntry,
    pub kind: ChangeKind,
    pub violation: Option<PolicyViolation>,
}

impl ClassifiedChange {
    pub fn risk(&self) -> Risk {
        self.kind.risk()
    }
}

/// A described changeset with every entry classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetReview {
    pub stack_name: String,
    pub change_set_id: String,
    pub change_set_name: String,
    pub status: String,
    pub execution_status: String,
    pub status_reason: Option<String>,
    pub changes: Vec<ClassifiedChange>,
}

impl ChangesetReview {
    pub fn violations(&self) -> usize {
        self.changes.iter().filter(|c| c.violation.is_some()).count()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }
}

pub struct ChangesetController<'a> {
    cfn: &'a dyn CloudFormation,
    clock: &'a dyn Clock,
    reporter: &'a dyn Reporter,
    poll: &'a PollConfig,
}

impl<'a> ChangesetController<'a> {
    pub fn new(
        cfn: &'a dyn CloudFormation,
        clock: &'a dyn Clock,
        reporter: &'a dyn Reporter,
        poll: &'a PollConfig,
    ) -> Self {
        Self {
            cfn,
            clock,
            reporter,
            poll,
        }
    }

    /// Create a changeset against an existing stack, wait for CloudFormation
    /// to compute it, then report its changes. Policy violations are
    /// reported but do not fail creation.
    pub async fn create(
        &self,
        manifest: &Manifest,
        template: &TemplateRef,
        parameters: &[ResolvedParameter],
        change_set_name: &str,
        description: Option<&str>,
    ) -> Result<ChangesetReview> {
        let stack_name = manifest.stack_name.as_str();
        self.require_stack(stack_name).await?;

        let request = ChangeSetRequest {
            stack_name: stack_name.to_string(),
            change_set_name: change_set_name.to_string(),
            description: description.map(str::to_string),
            template: template.clone(),
            parameters: parameters.to_vec(),
            capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            notification_arns: manifest.notification_arn.iter().cloned().collect(),
        };

        let id = self
            .cfn
            .create_change_set(&request)
            .await
            .map_err(|e| DeployError::provider("CreateChangeSet", e))?;
        info!(stack = stack_name, change_set = change_set_name, id = %id, "Change set requested");

        self.wait_until_computed(stack_name, change_set_name).await?;
        self.describe_and_classify(stack_name, change_set_name, false)
            .await
    }

    /// Describe a changeset and judge every entry against the stack's
    /// current policy. With `abort`, any violation is an error.
    pub async fn describe_and_classify(
        &self,
        stack_name: &str,
        change_set_name: &str,
        abort: bool,
    ) -> Result<ChangesetReview> {
        let description = self
            .cfn
            .describe_change_set(stack_name, change_set_name)
            .await
            .map_err(|e| DeployError::provider("DescribeChangeSet", e))?;

        let policy = match self
            .cfn
            .get_stack_policy(stack_name)
            .await
            .map_err(|e| DeployError::provider("GetStackPolicy", e))?
        {
            Some(body) => StackPolicy::parse(&body)?,
            None => StackPolicy::default(),
        };

        let mut changes = Vec::with_capacity(description.entries.len());
        for entry in description.entries {
            let violation = policy.evaluate(&entry)?;
            let change = ClassifiedChange {
                kind: classify_change(&entry),
                entry,
                violation,
            };
            self.reporter.change(&change);
            changes.push(change);
        }

        let review = ChangesetReview {
            stack_name: stack_name.to_string(),
            change_set_id: description.change_set_id,
            change_set_name: description.change_set_name,
            status: description.status,
            execution_status: description.execution_status,
            status_reason: description.status_reason,
            changes,
        };
        self.reporter.changeset_summary(&review);

        let violations = review.violations();
        if violations > 0 {
            warn!(
                stack = stack_name,
                change_set = change_set_name,
                violations,
                "Change set touches resources protected by the stack policy"
            );
            if abort {
                return Err(DeployError::PolicyViolation {
                    change_set: change_set_name.to_string(),
                    violations,
                });
            }
        }

        Ok(review)
    }

    /// Review (aborting on policy violations), execute, then poll the stack
    /// to a terminal status.
    pub async fn execute(&self, stack_name: &str, change_set_name: &str) -> Result<StackStatus> {
        let review = self
            .describe_and_classify(stack_name, change_set_name, true)
            .await?;

        if review.execution_status != EXECUTABLE {
            return Err(DeployError::ChangeSetFailed {
                change_set: change_set_name.to_string(),
                status: review.execution_status,
                reason: review.status_reason.unwrap_or_default(),
            });
        }

        self.cfn
            .execute_change_set(stack_name, change_set_name)
            .await
            .map_err(|e| DeployError::provider("ExecuteChangeSet", e))?;
        info!(stack = stack_name, change_set = change_set_name, "Change set executing");

        StackController::new(self.cfn, self.clock, self.reporter, self.poll)
            .poll_until_terminal(stack_name)
            .await
    }

    pub async fn delete(&self, stack_name: &str, change_set_name: &str) -> Result<()> {
        self.cfn
            .delete_change_set(stack_name, change_set_name)
            .await
            .map_err(|e| DeployError::provider("DeleteChangeSet", e))?;
        info!(stack = stack_name, change_set = change_set_name, "Change set deleted");
        Ok(())
    }

    pub async fn list(&self, stack_name: &str) -> Result<Vec<ChangeSetSummary>> {
        self.cfn
            .list_change_sets(stack_name)
            .await
            .map_err(|e| DeployError::provider("ListChangeSets", e))
    }

    async fn require_stack(&self, stack_name: &str) -> Result<()> {
        match lookup_stack(self.cfn, stack_name).await? {
            Some(_) => Ok(()),
            None => Err(DeployError::StackNotFound {
                stack_name: stack_name.to_string(),
            }),
        }
    }

    /// Wait while the changeset is still being computed. A changeset that
    /// failed only because it has no changes is not an error.
    async fn wait_until_computed(
        &self,
        stack_name: &str,
        change_set_name: &str,
    ) -> Result<ChangeSetDescription> {
        let started = self.clock.now();

        loop {
            let description = self
                .cfn
                .describe_change_set(stack_name, change_set_name)
                .await
                .map_err(|e| DeployError::provider("DescribeChangeSet", e))?;

            if !PENDING_STATUSES.contains(&description.status.as_str()) {
                if description.status == "FAILED" {
                    let reason = description.status_reason.clone().unwrap_or_default();
                    if !reason.contains(NO_CHANGES_REASON) {
                        return Err(DeployError::ChangeSetFailed {
                            change_set: change_set_name.to_string(),
                            status: description.status,
                            reason,
                        });
                    }
                    info!(change_set = change_set_name, "Change set contains no changes");
                }
                return Ok(description);
            }

            let elapsed = (self.clock.now() - started).to_std().unwrap_or_default();
            if elapsed + self.poll.interval() > self.poll.max_wait() {
                return Err(DeployError::ChangeSetFailed {
                    change_set: change_set_name.to_string(),
                    status: description.status,
                    reason: format!("still pending after {}s", elapsed.as_secs()),
                });
            }
            self.clock.sleep(self.poll.interval()).await;
        }
    }
}
