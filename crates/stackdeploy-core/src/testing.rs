//! In-memory fakes for the orchestrator's seams.

use crate::changeset::{ChangesetReview, ClassifiedChange};
use crate::clock::Clock;
use crate::error::ProviderError;
use crate::params::ResolvedParameter;
use crate::provider::*;
use crate::report::Reporter;
use crate::script::{ProcessExit, ProcessRunner};
use crate::status::{Severity, StackStatus};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use stackdeploy_config::Manifest;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Returns queued responses in order; the last one repeats forever.
#[derive(Debug)]
struct Script<T: Clone>(VecDeque<T>);

impl<T: Clone> Script<T> {
    fn next(&mut self) -> Option<T> {
        if self.0.len() > 1 {
            self.0.pop_front()
        } else {
            self.0.front().cloned()
        }
    }
}

#[derive(Default)]
struct State {
    calls: Vec<String>,
    describe: HashMap<String, Script<Result<Vec<StackSnapshot>, ProviderError>>>,
    resources: HashMap<String, Vec<StackResource>>,
    events: HashMap<String, Vec<StackEvent>>,
    policies: HashMap<String, String>,
    change_sets: Option<Script<ChangeSetDescription>>,
    template_parameters: Vec<TemplateParameter>,
    validation_error: Option<ProviderError>,
    update_error: Option<ProviderError>,
    stack_requests: Vec<StackRequest>,
    change_set_requests: Vec<ChangeSetRequest>,
}

#[derive(Default)]
pub struct FakeCloudFormation {
    state: Mutex<State>,
}

impl FakeCloudFormation {
    fn edit(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_stack(self, snapshot: StackSnapshot) -> Self {
        let name = snapshot.stack_name.clone();
        self.with_describe_sequence(&name, vec![Ok(vec![snapshot])])
    }

    pub fn with_describe_sequence(
        self,
        stack_name: &str,
        responses: Vec<Result<Vec<StackSnapshot>, ProviderError>>,
    ) -> Self {
        self.edit(|s| {
            s.describe
                .insert(stack_name.to_string(), Script(responses.into()));
        })
    }

    pub fn with_resources(self, stack_name: &str, resources: Vec<StackResource>) -> Self {
        self.edit(|s| {
            s.resources.insert(stack_name.to_string(), resources);
        })
    }

    pub fn with_events(self, stack_name: &str, events: Vec<StackEvent>) -> Self {
        self.edit(|s| {
            s.events.insert(stack_name.to_string(), events);
        })
    }

    pub fn with_stack_policy(self, stack_name: &str, body: &str) -> Self {
        self.edit(|s| {
            s.policies.insert(stack_name.to_string(), body.to_string());
        })
    }

    pub fn with_change_sets(self, responses: Vec<ChangeSetDescription>) -> Self {
        self.edit(|s| s.change_sets = Some(Script(responses.into())))
    }

    pub fn with_template_parameters(self, parameters: Vec<TemplateParameter>) -> Self {
        self.edit(|s| s.template_parameters = parameters)
    }

    pub fn failing_validation(self, error: ProviderError) -> Self {
        self.edit(|s| s.validation_error = Some(error))
    }

    pub fn failing_update(self, error: ProviderError) -> Self {
        self.edit(|s| s.update_error = Some(error))
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == call)
            .count()
    }

    pub fn stack_requests(&self) -> Vec<StackRequest> {
        self.state.lock().unwrap().stack_requests.clone()
    }

    pub fn change_set_requests(&self) -> Vec<ChangeSetRequest> {
        self.state.lock().unwrap().change_set_requests.clone()
    }

    fn record(&self, call: &str, stack_name: &str) -> std::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{call}:{stack_name}"));
        state
    }
}

#[async_trait]
impl CloudFormation for FakeCloudFormation {
    async fn describe_stacks(&self, stack_name: &str) -> Result<Vec<StackSnapshot>, ProviderError> {
        let mut state = self.record("DescribeStacks", stack_name);
        match state.describe.get_mut(stack_name) {
            Some(script) => script.next().unwrap_or_else(|| Ok(vec![])),
            None => Ok(vec![]),
        }
    }

    async fn describe_stack_resources(
        &self,
        stack_name: &str,
    ) -> Result<Vec<StackResource>, ProviderError> {
        let state = self.record("DescribeStackResources", stack_name);
        Ok(state.resources.get(stack_name).cloned().unwrap_or_default())
    }

    async fn describe_stack_events(
        &self,
        stack_name: &str,
        _next_token: Option<&str>,
    ) -> Result<EventPage, ProviderError> {
        let state = self.record("DescribeStackEvents", stack_name);
        Ok(EventPage {
            events: state.events.get(stack_name).cloned().unwrap_or_default(),
            next_token: None,
        })
    }

    async fn validate_template(
        &self,
        _template: &TemplateRef,
    ) -> Result<Vec<TemplateParameter>, ProviderError> {
        let state = self.record("ValidateTemplate", "-");
        match &state.validation_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.template_parameters.clone()),
        }
    }

    async fn estimate_template_cost(
        &self,
        _template: &TemplateRef,
        _parameters: &[ResolvedParameter],
    ) -> Result<String, ProviderError> {
        drop(self.record("EstimateTemplateCost", "-"));
        Ok("https://calculator.s3.amazonaws.com/calc5.html?key=fake".to_string())
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<String, ProviderError> {
        let mut state = self.record("CreateStack", &request.stack_name);
        state.stack_requests.push(request.clone());
        Ok(format!("arn:aws:cloudformation:us-east-1:123456789012:stack/{}/1", request.stack_name))
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<String, ProviderError> {
        let mut state = self.record("UpdateStack", &request.stack_name);
        if let Some(error) = &state.update_error {
            return Err(error.clone());
        }
        state.stack_requests.push(request.clone());
        Ok(format!("arn:aws:cloudformation:us-east-1:123456789012:stack/{}/1", request.stack_name))
    }

    async fn get_stack_policy(&self, stack_name: &str) -> Result<Option<String>, ProviderError> {
        let state = self.record("GetStackPolicy", stack_name);
        Ok(state.policies.get(stack_name).cloned())
    }

    async fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String, ProviderError> {
        let mut state = self.record("CreateChangeSet", &request.stack_name);
        state.change_set_requests.push(request.clone());
        Ok(format!(
            "arn:aws:cloudformation:us-east-1:123456789012:changeSet/{}/1",
            request.change_set_name
        ))
    }

    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set: &str,
    ) -> Result<ChangeSetDescription, ProviderError> {
        let mut state = self.record("DescribeChangeSet", stack_name);
        state
            .change_sets
            .as_mut()
            .and_then(Script::next)
            .ok_or_else(|| {
                ProviderError::service(
                    "ChangeSetNotFound",
                    format!("ChangeSet [{change_set}] does not exist"),
                )
            })
    }

    async fn execute_change_set(
        &self,
        stack_name: &str,
        _change_set: &str,
    ) -> Result<(), ProviderError> {
        drop(self.record("ExecuteChangeSet", stack_name));
        Ok(())
    }

    async fn delete_change_set(
        &self,
        stack_name: &str,
        _change_set: &str,
    ) -> Result<(), ProviderError> {
        drop(self.record("DeleteChangeSet", stack_name));
        Ok(())
    }

    async fn list_change_sets(
        &self,
        stack_name: &str,
    ) -> Result<Vec<ChangeSetSummary>, ProviderError> {
        drop(self.record("ListChangeSets", stack_name));
        Ok(vec![])
    }
}

/// Starts at a fixed instant; `sleep` advances time instead of waiting.
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<usize>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            sleeps: Mutex::new(0),
        }
    }
}

impl FakeClock {
    pub fn sleeps(&self) -> usize {
        *self.sleeps.lock().unwrap()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.sleeps.lock().unwrap() += 1;
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(duration).unwrap();
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<String>>,
    statuses: Mutex<Vec<(StackStatus, Severity)>>,
    changes: Mutex<Vec<ClassifiedChange>>,
    summaries: Mutex<usize>,
}

impl RecordingReporter {
    pub fn event_ids(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(StackStatus, Severity)> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn changes(&self) -> Vec<ClassifiedChange> {
        self.changes.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> usize {
        *self.summaries.lock().unwrap()
    }
}

impl Reporter for RecordingReporter {
    fn stack_event(&self, event: &StackEvent, _severity: Severity) {
        self.events.lock().unwrap().push(event.event_id.clone());
    }

    fn stack_status(
        &self,
        _stack_name: &str,
        status: &StackStatus,
        severity: Severity,
        _at: DateTime<Utc>,
    ) {
        self.statuses.lock().unwrap().push((status.clone(), severity));
    }

    fn change(&self, change: &ClassifiedChange) {
        self.changes.lock().unwrap().push(change.clone());
    }

    fn changeset_summary(&self, _review: &ChangesetReview) {
        *self.summaries.lock().unwrap() += 1;
    }
}

/// Records each script's path and contents at run time, then exits with a
/// fixed code.
pub struct FakeProcessRunner {
    exit_code: i32,
    ran: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeProcessRunner {
    pub fn exiting(exit_code: i32) -> Self {
        Self {
            exit_code,
            ran: Mutex::new(Vec::new()),
        }
    }

    pub fn ran(&self) -> Vec<(PathBuf, String)> {
        self.ran.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for FakeProcessRunner {
    async fn run(&self, program: &Path) -> std::io::Result<ProcessExit> {
        let contents = std::fs::read_to_string(program)?;
        self.ran.lock().unwrap().push((program.to_path_buf(), contents));
        Ok(ProcessExit {
            code: Some(self.exit_code),
        })
    }
}

pub fn snapshot(stack_name: &str, status: StackStatus) -> StackSnapshot {
    StackSnapshot {
        stack_id: format!("arn:aws:cloudformation:us-east-1:123456789012:stack/{stack_name}/1"),
        stack_name: stack_name.to_string(),
        status,
        status_reason: None,
        parameters: Default::default(),
        outputs: Default::default(),
    }
}

pub fn event(
    event_id: &str,
    timestamp: DateTime<Utc>,
    logical_id: &str,
    status: &str,
) -> StackEvent {
    StackEvent {
        event_id: event_id.to_string(),
        timestamp,
        logical_id: logical_id.to_string(),
        resource_type: "AWS::RDS::DBInstance".to_string(),
        status: status.to_string(),
        reason: None,
    }
}

pub fn change_entry(logical_id: &str, action: &str, replacement: Option<&str>) -> ChangeSetEntry {
    ChangeSetEntry {
        logical_id: logical_id.to_string(),
        physical_id: None,
        resource_type: "AWS::RDS::DBInstance".to_string(),
        action: ChangeAction::from(action),
        replacement: Replacement::from(replacement),
    }
}

pub fn change_set(status: &str, entries: Vec<ChangeSetEntry>) -> ChangeSetDescription {
    ChangeSetDescription {
        change_set_id: "arn:aws:cloudformation:us-east-1:123456789012:changeSet/cs1/1".to_string(),
        change_set_name: "cs1".to_string(),
        status: status.to_string(),
        execution_status: if status == "CREATE_COMPLETE" {
            "AVAILABLE".to_string()
        } else {
            "UNAVAILABLE".to_string()
        },
        status_reason: None,
        entries,
    }
}

pub fn template_params(keys: &[&str]) -> Vec<TemplateParameter> {
    keys.iter()
        .map(|key| TemplateParameter {
            key: key.to_string(),
            default_value: None,
            description: None,
            no_echo: false,
        })
        .collect()
}

/// A manifest for stack `web` in us-east-1 with a URL template, plus `extra` YAML.
pub fn manifest_with(extra: &str) -> Manifest {
    let yaml = format!(
        "StackName: web\nRegion: us-east-1\
         \nS3Template: https://bucket.s3.amazonaws.com/web.json\n{extra}"
    );
    Manifest::from_yaml(&yaml, Path::new("web.yaml"), None).unwrap()
}
