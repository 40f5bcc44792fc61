//! stackdeploy-core - CloudFormation deployment orchestration
//!
//! Drives one stack through its create/update/changeset lifecycle:
//!
//! - [`params`] resolves template parameters from the command line, the
//!   manifest, other deployed stacks and template defaults
//! - [`stack`] decides create vs update, submits, and polls to a terminal status
//! - [`changeset`] creates, reviews (against the stack policy), and executes changesets
//! - [`script`] renders and runs pre/post install scripts
//! - [`deploy`] wires them together into the commands the CLI exposes
//!
//! Everything that touches the outside world goes through a trait:
//! [`CloudFormation`], [`Clock`], [`ProcessRunner`] and [`Reporter`].

pub mod changeset;
pub mod clock;
pub mod deploy;
pub mod error;
pub mod options;
pub mod params;
pub mod policy;
pub mod provider;
pub mod report;
pub mod script;
pub mod stack;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use changeset::{ChangeKind, ChangesetController, ChangesetReview, ClassifiedChange, Risk};
pub use clock::{Clock, SystemClock};
pub use deploy::{DeployOutcome, Deployer};
pub use error::{DeployError, ProviderError, Result};
pub use options::{parse_parameter_override, DeployOptions};
pub use params::{ParameterResolver, Provenance, ResolvedParameter};
pub use policy::{generate_update_stack_policy, PolicyViolation, ResourcePattern, StackPolicy};
pub use provider::{
    ChangeAction, ChangeSetDescription, ChangeSetEntry, ChangeSetRequest, ChangeSetSummary,
    CloudFormation, EventPage, Replacement, StackEvent, StackRequest, StackResource,
    StackSnapshot, Tag, TemplateParameter, TemplateRef, CAPABILITIES,
};
pub use report::Reporter;
pub use script::{
    render_placeholders, ProcessExit, ProcessRunner, ScriptOutcome, ScriptPhase, ScriptRunner,
    ShellProcessRunner,
};
pub use stack::{StackAction, StackController, SubmitOutcome};
pub use status::{classify_resource_status, classify_stack_status, Severity, StackStatus};
