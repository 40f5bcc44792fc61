//! The CloudFormation API surface the orchestrator needs, and the plain data
//! types that cross it. The production implementation lives in
//! `stackdeploy-aws`; tests use an in-memory fake.

use crate::error::ProviderError;
use crate::params::ResolvedParameter;
use crate::status::StackStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stackdeploy_config::OnFailure;
use std::collections::BTreeMap;

/// Sent with every create, update and changeset request.
pub const CAPABILITIES: &[&str] = &["CAPABILITY_IAM", "CAPABILITY_NAMED_IAM"];

/// A template passed to CloudFormation, either inline or by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRef {
    Body(String),
    Url(String),
}

impl TemplateRef {
    /// Short description for logs; bodies are not echoed.
    pub fn describe(&self) -> String {
        match self {
            TemplateRef::Body(body) => format!("inline template ({} bytes)", body.len()),
            TemplateRef::Url(url) => url.clone(),
        }
    }
}

/// A parameter declared by a template, as reported by template validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParameter {
    pub key: String,
    pub default_value: Option<String>,
    pub description: Option<String>,
    pub no_echo: bool,
}

/// Point-in-time view of a stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackSnapshot {
    pub stack_id: String,
    pub stack_name: String,
    pub status: StackStatus,
    pub status_reason: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackResource {
    pub logical_id: String,
    pub physical_id: Option<String>,
    pub resource_type: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub logical_id: String,
    pub resource_type: String,
    pub status: String,
    pub reason: Option<String>,
}

/// One page of stack events, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPage {
    pub events: Vec<StackEvent>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Arguments for CreateStack / UpdateStack. Which optional fields are set
/// depends on the action; see `StackController::build_request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    pub stack_name: String,
    pub template: TemplateRef,
    pub parameters: Vec<ResolvedParameter>,
    pub capabilities: Vec<String>,
    pub notification_arns: Vec<String>,
    pub tags: Vec<Tag>,
    pub timeout_in_minutes: Option<u32>,
    pub on_failure: Option<OnFailure>,
    pub stack_policy_body: Option<String>,
    pub stack_policy_during_update_body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetRequest {
    pub stack_name: String,
    pub change_set_name: String,
    pub description: Option<String>,
    pub template: TemplateRef,
    pub parameters: Vec<ResolvedParameter>,
    pub capabilities: Vec<String>,
    pub notification_arns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeAction {
    Add,
    Modify,
    Remove,
    Other(String),
}

impl From<&str> for ChangeAction {
    fn from(value: &str) -> Self {
        match value {
            "Add" => Self::Add,
            "Modify" => Self::Modify,
            "Remove" => Self::Remove,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Whether a modification replaces the physical resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    True,
    False,
    Conditional,
    /// Not reported (adds and removes carry no replacement flag).
    Unspecified,
}

impl From<Option<&str>> for Replacement {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some("True") => Self::True,
            Some("False") => Self::False,
            Some("Conditional") => Self::Conditional,
            _ => Self::Unspecified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetEntry {
    pub logical_id: String,
    pub physical_id: Option<String>,
    pub resource_type: String,
    pub action: ChangeAction,
    pub replacement: Replacement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetDescription {
    pub change_set_id: String,
    pub change_set_name: String,
    pub status: String,
    pub execution_status: String,
    pub status_reason: Option<String>,
    pub entries: Vec<ChangeSetEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetSummary {
    pub change_set_name: String,
    pub status: String,
    pub execution_status: String,
    pub created: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

/// CloudFormation operations used by the orchestrator.
///
/// `describe_stacks` returns an empty list for a stack that does not exist
/// rather than an error, so callers can tell "absent" from "ambiguous".
/// `describe_change_set` returns every change across all result pages.
#[async_trait]
pub trait CloudFormation: Send + Sync {
    async fn describe_stacks(&self, stack_name: &str) -> Result<Vec<StackSnapshot>, ProviderError>;

    async fn describe_stack_resources(
        &self,
        stack_name: &str,
    ) -> Result<Vec<StackResource>, ProviderError>;

    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<EventPage, ProviderError>;

    async fn validate_template(
        &self,
        template: &TemplateRef,
    ) -> Result<Vec<TemplateParameter>, ProviderError>;

    async fn estimate_template_cost(
        &self,
        template: &TemplateRef,
        parameters: &[ResolvedParameter],
    ) -> Result<String, ProviderError>;

    /// Returns the new stack id.
    async fn create_stack(&self, request: &StackRequest) -> Result<String, ProviderError>;

    /// Returns the stack id.
    async fn update_stack(&self, request: &StackRequest) -> Result<String, ProviderError>;

    async fn get_stack_policy(&self, stack_name: &str) -> Result<Option<String>, ProviderError>;

    /// Returns the changeset id.
    async fn create_change_set(&self, request: &ChangeSetRequest)
        -> Result<String, ProviderError>;

    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set: &str,
    ) -> Result<ChangeSetDescription, ProviderError>;

    async fn execute_change_set(
        &self,
        stack_name: &str,
        change_set: &str,
    ) -> Result<(), ProviderError>;

    async fn delete_change_set(&self, stack_name: &str, change_set: &str)
        -> Result<(), ProviderError>;

    async fn list_change_sets(
        &self,
        stack_name: &str,
    ) -> Result<Vec<ChangeSetSummary>, ProviderError>;
}
