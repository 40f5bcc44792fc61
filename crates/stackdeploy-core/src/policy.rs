//! Stack policy handling: resource pattern matching, judging changeset
//! entries against deny rules, and building the temporary policy used
//! during an update.

use crate::error::{DeployError, Result};
use crate::provider::{ChangeAction, ChangeSetEntry, Replacement};
use regex::Regex;
use serde::{Deserialize, Serialize};
use stackdeploy_config::{Effect, PolicyStatement};
use std::fmt;
use tracing::warn;

const LOGICAL_ID_PREFIX: &str = "LogicalResourceId/";

/// A compiled `Resource` entry from a stack policy.
///
/// The `LogicalResourceId/` prefix is ignored, `*` matches one or more
/// characters, and everything else matches literally against the whole id.
#[derive(Debug, Clone)]
pub struct ResourcePattern {
    source: String,
    regex: Regex,
}

impl ResourcePattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let body = pattern.strip_prefix(LOGICAL_ID_PREFIX).unwrap_or(pattern);

        let mut expr = String::from("^");
        for (i, literal) in body.split('*').enumerate() {
            if i > 0 {
                expr.push_str(".+");
            }
            expr.push_str(&regex::escape(literal));
        }
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| DeployError::InvalidPolicy(format!("pattern {pattern}: {e}")))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, logical_id: &str) -> bool {
        self.regex.is_match(logical_id)
    }

    pub fn is_literal(&self) -> bool {
        !self.source.contains('*')
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// The stack policy action a change needs permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedAction {
    Modify,
    Replace,
    Delete,
}

impl ProtectedAction {
    pub fn as_policy_action(&self) -> &'static str {
        match self {
            ProtectedAction::Modify => "Update:Modify",
            ProtectedAction::Replace => "Update:Replace",
            ProtectedAction::Delete => "Update:Delete",
        }
    }

    /// Adds need no permission; conditional replacement is treated as a
    /// replacement.
    pub fn for_entry(entry: &ChangeSetEntry) -> Option<Self> {
        match entry.action {
            ChangeAction::Remove => Some(ProtectedAction::Delete),
            ChangeAction::Modify => match entry.replacement {
                Replacement::True | Replacement::Conditional => Some(ProtectedAction::Replace),
                Replacement::False | Replacement::Unspecified => Some(ProtectedAction::Modify),
            },
            ChangeAction::Add | ChangeAction::Other(_) => None,
        }
    }
}

impl fmt::Display for ProtectedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_policy_action())
    }
}

/// A changeset entry blocked by a deny statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    pub logical_id: String,
    pub action: ProtectedAction,
    pub pattern: String,
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is denied for {} by {}",
            self.action, self.logical_id, self.pattern
        )
    }
}

/// A stack policy document (`{"Statement": [...]}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackPolicy {
    #[serde(rename = "Statement", default)]
    pub statements: Vec<PolicyStatement>,
}

impl StackPolicy {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self { statements }
    }

    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DeployError::InvalidPolicy(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| DeployError::InvalidPolicy(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Check one changeset entry against the deny statements. Allow
    /// statements are not consulted.
    pub fn evaluate(&self, entry: &ChangeSetEntry) -> Result<Option<PolicyViolation>> {
        let Some(action) = ProtectedAction::for_entry(entry) else {
            return Ok(None);
        };

        for statement in self.deny_statements() {
            if !denies(statement, action) {
                continue;
            }
            for resource in &statement.resources {
                let pattern = ResourcePattern::compile(resource)?;
                if pattern.matches(&entry.logical_id) {
                    return Ok(Some(PolicyViolation {
                        logical_id: entry.logical_id.clone(),
                        action,
                        pattern: resource.clone(),
                    }));
                }
            }
        }
        Ok(None)
    }

    fn deny_statements(&self) -> impl Iterator<Item = &PolicyStatement> {
        self.statements
            .iter()
            .filter(|statement| statement.effect == Effect::Deny)
    }
}

fn denies(statement: &PolicyStatement, action: ProtectedAction) -> bool {
    statement
        .actions
        .iter()
        .any(|a| a == "Update:*" || a == action.as_policy_action())
}

/// Derive the policy to apply for the duration of one update so that the
/// resources in `allow` may be modified, replaced or deleted.
///
/// Every deny pattern matching an allowed id is removed (a deny statement
/// left without resources is dropped), then an explicit Allow for each id is
/// put at the front. Removing a wildcard pattern unprotects every other
/// resource it covered as well, so that case is logged.
pub fn generate_update_stack_policy(
    current: &StackPolicy,
    allow: &[String],
) -> Result<StackPolicy> {
    let mut statements = current.statements.clone();

    for logical_id in allow {
        let mut next = Vec::with_capacity(statements.len() + 1);
        for mut statement in statements {
            if statement.effect != Effect::Deny || statement.resources.is_empty() {
                next.push(statement);
                continue;
            }

            let mut kept = Vec::with_capacity(statement.resources.len());
            for resource in statement.resources {
                let pattern = ResourcePattern::compile(&resource)?;
                if !pattern.matches(logical_id) {
                    kept.push(resource);
                    continue;
                }
                if !pattern.is_literal() {
                    warn!(
                        resource = %logical_id,
                        pattern = %resource,
                        "Removing a wildcard deny pattern; \
                         other resources it protected are unprotected for this update"
                    );
                }
            }

            if !kept.is_empty() {
                statement.resources = kept;
                next.push(statement);
            }
        }

        next.insert(0, allow_statement(logical_id));
        statements = next;
    }

    Ok(StackPolicy::new(statements))
}

fn allow_statement(logical_id: &str) -> PolicyStatement {
    PolicyStatement {
        effect: Effect::Allow,
        principal: serde_json::Value::String("*".to_string()),
        actions: vec![
            ProtectedAction::Modify.as_policy_action().to_string(),
            ProtectedAction::Delete.as_policy_action().to_string(),
            ProtectedAction::Replace.as_policy_action().to_string(),
        ],
        resources: vec![format!("{LOGICAL_ID_PREFIX}{logical_id}")],
        extra: Default::default(),
    }
}
