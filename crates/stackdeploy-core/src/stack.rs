//! Stack controller: decide create vs update, submit, then poll to a
//! terminal status while streaming new stack events.

use crate::clock::Clock;
use crate::error::{DeployError, ProviderError, Result};
use crate::params::ResolvedParameter;
use crate::policy::{generate_update_stack_policy, StackPolicy};
use crate::provider::{
    CloudFormation, StackEvent, StackRequest, StackSnapshot, Tag, TemplateRef, CAPABILITIES,
};
use crate::report::Reporter;
use crate::status::{classify_resource_status, classify_stack_status, StackStatus};
use stackdeploy_config::{Manifest, PollConfig};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

/// How many pages of events to read per poll at most. Pages are newest
/// first, so this only matters for very busy stacks.
const MAX_EVENT_PAGES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackAction {
    Create,
    Update,
}

impl fmt::Display for StackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StackAction::Create => "create",
            StackAction::Update => "update",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted { stack_id: String },
    /// CloudFormation reported nothing to update.
    NoChanges,
    DryRun,
}

/// Look a stack up by name. Absent is `None`; more than one match is an
/// error since nothing downstream could tell which one is meant.
pub(crate) async fn lookup_stack(
    cfn: &dyn CloudFormation,
    stack_name: &str,
) -> Result<Option<StackSnapshot>> {
    let mut stacks = cfn
        .describe_stacks(stack_name)
        .await
        .map_err(|e| DeployError::provider("DescribeStacks", e))?;

    match stacks.len() {
        0 => Ok(None),
        1 => Ok(stacks.pop()),
        count => Err(DeployError::AmbiguousStack {
            stack_name: stack_name.to_string(),
            count,
        }),
    }
}

pub struct StackController<'a> {
    cfn: &'a dyn CloudFormation,
    clock: &'a dyn Clock,
    reporter: &'a dyn Reporter,
    poll: &'a PollConfig,
}

impl<'a> StackController<'a> {
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

    pub async fn lookup(&self, stack_name: &str) -> Result<Option<StackSnapshot>> {
        lookup_stack(self.cfn, stack_name).await
    }

    /// Create when the stack is absent, update when it exists and is healthy.
    /// `force` allows updating a stack in any other state.
    pub async fn plan(&self, stack_name: &str, force: bool) -> Result<StackAction> {
        let Some(existing) = self.lookup(stack_name).await? else {
            info!(stack = stack_name, "Stack does not exist; it will be created");
            return Ok(StackAction::Create);
        };

        if existing.status.is_good() {
            info!(
                stack = stack_name,
                status = %existing.status,
                "Stack exists; it will be updated"
            );
            return Ok(StackAction::Update);
        }

        if force {
            warn!(
                stack = stack_name,
                status = %existing.status,
                "Forcing an update of a stack that is not in a healthy state"
            );
            return Ok(StackAction::Update);
        }

        Err(DeployError::StackNotUpdatable {
            stack_name: stack_name.to_string(),
            status: existing.status,
        })
    }

    /// The policy to apply during this update so the `allow`ed resources may
    /// change. `None` when nothing was requested.
    pub async fn update_policy_for(
        &self,
        stack_name: &str,
        allow: &[String],
    ) -> Result<Option<String>> {
        if allow.is_empty() {
            return Ok(None);
        }

        let current = match self
            .cfn
            .get_stack_policy(stack_name)
            .await
            .map_err(|e| DeployError::provider("GetStackPolicy", e))?
        {
            Some(body) => StackPolicy::parse(&body)?,
            None => StackPolicy::default(),
        };

        let policy = generate_update_stack_policy(&current, allow)?;
        debug!(
            stack = stack_name,
            statements = policy.statements.len(),
            "Generated update stack policy"
        );
        policy.to_json().map(Some)
    }

    /// Assemble the CreateStack/UpdateStack request.
    ///
    /// Creates carry tags, timeout, failure behaviour and the manifest's
    /// stack policy. Updates carry the temporary policy and, when
    /// `replace_policy` is set, the manifest's policy as the new permanent one.
    pub fn build_request(
        action: StackAction,
        manifest: &Manifest,
        template: &TemplateRef,
        parameters: &[ResolvedParameter],
        during_update_policy: Option<String>,
        replace_policy: bool,
    ) -> StackRequest {
        let manifest_policy =
            (!manifest.stack_policy.is_empty()).then(|| manifest.stack_policy_json());

        let mut request = StackRequest {
            stack_name: manifest.stack_name.clone(),
            template: template.clone(),
            parameters: parameters.to_vec(),
            capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            notification_arns: manifest.notification_arn.iter().cloned().collect(),
            tags: Vec::new(),
            timeout_in_minutes: None,
            on_failure: None,
            stack_policy_body: None,
            stack_policy_during_update_body: None,
        };

        match action {
            StackAction::Create => {
                request.tags = manifest
                    .tags
                    .iter()
                    .map(|(key, value)| Tag {
                        key: key.clone(),
                        value: value.clone(),
                    })
                    .collect();
                request.timeout_in_minutes = manifest.timeout_minutes;
                request.on_failure = manifest.on_failure;
                request.stack_policy_body = manifest_policy;
            }
            StackAction::Update => {
                request.stack_policy_during_update_body = during_update_policy;
                if replace_policy {
                    request.stack_policy_body = manifest_policy;
                }
            }
        }

        request
    }

    pub async fn submit(
        &self,
        action: StackAction,
        request: &StackRequest,
        dry_run: bool,
    ) -> Result<SubmitOutcome> {
        if dry_run {
            info!(
                action = %action,
                stack = %request.stack_name,
                template = %request.template.describe(),
                parameters = request.parameters.len(),
                "Dry run; not submitting"
            );
            info!("{:#?}", request);
            return Ok(SubmitOutcome::DryRun);
        }

        let (operation, result) = match action {
            StackAction::Create => ("CreateStack", self.cfn.create_stack(request).await),
            StackAction::Update => ("UpdateStack", self.cfn.update_stack(request).await),
        };

        match result {
            Ok(stack_id) => {
                info!(action = %action, stack_id = %stack_id, "Stack {} submitted", action);
                Ok(SubmitOutcome::Submitted { stack_id })
            }
            Err(e) if e.is_no_updates() => {
                info!(stack = %request.stack_name, "No updates are to be performed");
                Ok(SubmitOutcome::NoChanges)
            }
            Err(e) => Err(DeployError::provider(operation, e)),
        }
    }

    /// Poll until the stack reaches a terminal status, reporting each stack
    /// event once. Events older than the lookback window are never reported.
    pub async fn poll_until_terminal(&self, stack_name: &str) -> Result<StackStatus> {
        let started = self.clock.now();
        let lookback = chrono::Duration::seconds(self.poll.event_lookback_secs as i64);
        let mut reported: HashSet<String> = HashSet::new();

        loop {
            let snapshot = self
                .lookup(stack_name)
                .await
                .map_err(|e| networking(stack_name, e))?
                .ok_or_else(|| DeployError::StackVanished {
                    stack_name: stack_name.to_string(),
                })?;

            let now = self.clock.now();
            let events = self
                .recent_events(stack_name, now - lookback)
                .await
                .map_err(|e| networking(stack_name, e))?;

            // oldest first on screen
            for event in events.iter().rev() {
                if reported.insert(event.event_id.clone()) {
                    self.reporter
                        .stack_event(event, classify_resource_status(&event.status));
                }
            }

            let status = snapshot.status;
            self.reporter
                .stack_status(stack_name, &status, classify_stack_status(&status), now);

            if status.is_terminal() {
                info!(stack = stack_name, status = %status, "Stack reached a terminal status");
                return Ok(status);
            }

            let elapsed = (now - started).to_std().unwrap_or_default();
            if elapsed + self.poll.interval() > self.poll.max_wait() {
                return Err(DeployError::PollTimeout {
                    stack_name: stack_name.to_string(),
                    waited_secs: elapsed.as_secs(),
                    status,
                });
            }

            self.clock.sleep(self.poll.interval()).await;
        }
    }

    async fn recent_events(
        &self,
        stack_name: &str,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<StackEvent>> {
        let mut events = Vec::new();
        let mut token: Option<String> = None;

        for _ in 0..MAX_EVENT_PAGES {
            let page = self
                .cfn
                .describe_stack_events(stack_name, token.as_deref())
                .await
                .map_err(|e| DeployError::provider("DescribeStackEvents", e))?;

            let reached_cutoff = page.events.iter().any(|event| event.timestamp < cutoff);
            events.extend(page.events.into_iter().filter(|event| event.timestamp >= cutoff));

            match page.next_token {
                Some(next) if !reached_cutoff => token = Some(next),
                _ => break,
            }
        }

        Ok(events)
    }
}

/// Transport failures mid-poll leave the stack's fate unknown; say so.
fn networking(stack_name: &str, error: DeployError) -> DeployError {
    match error {
        DeployError::Provider {
            source: ProviderError::Network(message),
            ..
        } => DeployError::Networking {
            stack_name: stack_name.to_string(),
            message,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Provenance;
    use crate::testing::{
        event, manifest_with, snapshot, FakeClock, FakeCloudFormation, RecordingReporter,
    };
    use stackdeploy_config::OnFailure;

    fn poll_config() -> PollConfig {
        PollConfig {
            interval_secs: 10,
            event_lookback_secs: 600,
            max_wait_secs: 3600,
        }
    }

    #[tokio::test]
    async fn absent_stack_is_created() {
        let cfn = FakeCloudFormation::default();
        let (clock, reporter, poll) =
            (FakeClock::default(), RecordingReporter::default(), poll_config());
        let controller = StackController::new(&cfn, &clock, &reporter, &poll);

        assert_eq!(controller.plan("web", false).await.unwrap(), StackAction::Create);
    }

    #[tokio::test]
    async fn healthy_stack_is_updated_and_unhealthy_needs_force() {
        let (clock, reporter, poll) =
            (FakeClock::default(), RecordingReporter::default(), poll_config());

        let healthy =
            FakeCloudFormation::default().with_stack(snapshot("web", StackStatus::UpdateComplete));
        let controller = StackController::new(&healthy, &clock, &reporter, &poll);
        assert_eq!(controller.plan("web", false).await.unwrap(), StackAction::Update);

        let broken =
            FakeCloudFormation::default()
                .with_stack(snapshot("web", StackStatus::UpdateRollbackFailed));
        let controller = StackController::new(&broken, &clock, &reporter, &poll);
        let err = controller.plan("web", false).await.unwrap_err();
        assert!(matches!(err, DeployError::StackNotUpdatable { .. }));
        assert_eq!(controller.plan("web", true).await.unwrap(), StackAction::Update);
    }

    #[tokio::test]
    async fn duplicate_stacks_are_ambiguous() {
        let cfn = FakeCloudFormation::default().with_describe_sequence(
            "web",
            vec![Ok(vec![
                snapshot("web", StackStatus::CreateComplete),
                snapshot("web", StackStatus::CreateComplete),
            ])],
        );
        let (clock, reporter, poll) =
            (FakeClock::default(), RecordingReporter::default(), poll_config());
        let controller = StackController::new(&cfn, &clock, &reporter, &poll);

        let err = controller.plan("web", false).await.unwrap_err();
        assert!(matches!(err, DeployError::AmbiguousStack { count: 2, .. }));
    }

    #[test]
    fn create_request_carries_create_only_fields() {
        let manifest = manifest_with(
            "Tags:\n  team: web\nTimeOut: 30\nOnFailure: DELETE\
             \nNotificationARN: arn:aws:sns:us-east-1:1:topic\
             \nStackPolicy:\n  - Effect: Deny\
             \n    Action: Update:Delete\
             \n    Resource: LogicalResourceId/Db\n",
        );
        let params = vec![ResolvedParameter::new("Env", "prod", Provenance::Manifest)];
        let template = TemplateRef::Url("https://example.com/t.json".into());

        let create = StackController::build_request(
            StackAction::Create,
            &manifest,
            &template,
            &params,
            None,
            false,
        );
        assert_eq!(create.capabilities, vec!["CAPABILITY_IAM", "CAPABILITY_NAMED_IAM"]);
        assert_eq!(create.notification_arns, vec!["arn:aws:sns:us-east-1:1:topic"]);
        assert_eq!(create.tags, vec![Tag { key: "team".into(), value: "web".into() }]);
        assert_eq!(create.timeout_in_minutes, Some(30));
        assert_eq!(create.on_failure, Some(OnFailure::Delete));
        assert!(create.stack_policy_body.as_deref().unwrap().contains("LogicalResourceId/Db"));
        assert!(create.stack_policy_during_update_body.is_none());

        let update = StackController::build_request(
            StackAction::Update,
            &manifest,
            &template,
            &params,
            Some("{\"Statement\":[]}".into()),
            false,
        );
        assert!(update.tags.is_empty());
        assert!(update.timeout_in_minutes.is_none());
        assert!(update.on_failure.is_none());
        assert!(update.stack_policy_body.is_none());
        assert_eq!(update.stack_policy_during_update_body.as_deref(), Some("{\"Statement\":[]}"));
        assert_eq!(update.notification_arns.len(), 1);

        let replacing = StackController::build_request(
            StackAction::Update,
            &manifest,
            &template,
            &params,
            None,
            true,
        );
        assert!(replacing.stack_policy_body.is_some());
    }

    #[tokio::test]
    async fn no_updates_is_success() {
        let cfn = FakeCloudFormation::default().failing_update(ProviderError::service(
            "ValidationError",
            "No updates are to be performed.",
        ));
        let (clock, reporter, poll) =
            (FakeClock::default(), RecordingReporter::default(), poll_config());
        let controller = StackController::new(&cfn, &clock, &reporter, &poll);
        let request = StackController::build_request(
            StackAction::Update,
            &manifest_with(""),
            &TemplateRef::Body("{}".into()),
            &[],
            None,
            false,
        );

        let outcome = controller.submit(StackAction::Update, &request, false).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::NoChanges);
    }

    #[tokio::test]
    async fn dry_run_sends_nothing() {
        let cfn = FakeCloudFormation::default();
        let (clock, reporter, poll) =
            (FakeClock::default(), RecordingReporter::default(), poll_config());
        let controller = StackController::new(&cfn, &clock, &reporter, &poll);
        let request = StackController::build_request(
            StackAction::Create,
            &manifest_with(""),
            &TemplateRef::Body("{}".into()),
            &[],
            None,
            false,
        );

        let outcome = controller.submit(StackAction::Create, &request, true).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::DryRun);
        assert_eq!(cfn.call_count("CreateStack:web"), 0);
    }

    #[tokio::test]
    async fn update_policy_is_fetched_and_rewritten() {
        let cfn = FakeCloudFormation::default().with_stack_policy(
            "web",
            r#"{"Statement":[{"Effect":"Deny","Action":"Update:*","Principal":"*",
                "Resource":"LogicalResourceId/Db"}]}"#,
        );
        let (clock, reporter, poll) =
            (FakeClock::default(), RecordingReporter::default(), poll_config());
        let controller = StackController::new(&cfn, &clock, &reporter, &poll);

        assert!(controller.update_policy_for("web", &[]).await.unwrap().is_none());

        let body = controller
            .update_policy_for("web", &["Db".to_string()])
            .await
            .unwrap()
            .unwrap();
        let policy = StackPolicy::parse(&body).unwrap();
        assert_eq!(policy.statements.len(), 1);
        assert_eq!(policy.statements[0].effect, stackdeploy_config::Effect::Allow);
    }

    #[tokio::test]
    async fn polling_stops_at_first_terminal_status() {
        let cfn = FakeCloudFormation::default().with_describe_sequence(
            "web",
            vec![
                Ok(vec![snapshot("web", StackStatus::CreateInProgress)]),
                Ok(vec![snapshot("web", StackStatus::CreateInProgress)]),
                Ok(vec![snapshot("web", StackStatus::CreateComplete)]),
            ],
        );
        let (clock, reporter, poll) =
            (FakeClock::default(), RecordingReporter::default(), poll_config());
        let controller = StackController::new(&cfn, &clock, &reporter, &poll);

        let status = controller.poll_until_terminal("web").await.unwrap();

        assert_eq!(status, StackStatus::CreateComplete);
        assert_eq!(cfn.call_count("DescribeStacks:web"), 3);
        assert_eq!(clock.sleeps(), 2);
        assert_eq!(reporter.statuses().len(), 3);
    }

    #[tokio::test]
    async fn events_are_reported_once_and_only_within_lookback() {
        let clock = FakeClock::default();
        let now = clock.now();
        let cfn = FakeCloudFormation::default()
            .with_describe_sequence(
                "web",
                vec![
                    Ok(vec![snapshot("web", StackStatus::UpdateInProgress)]),
                    Ok(vec![snapshot("web", StackStatus::UpdateComplete)]),
                ],
            )
            .with_events(
                "web",
                vec![
                    event("e3", now, "Db", "UPDATE_COMPLETE"),
                    event("e2", now - chrono::Duration::seconds(30), "Db", "UPDATE_IN_PROGRESS"),
                    event("e1", now - chrono::Duration::hours(2), "Db", "CREATE_COMPLETE"),
                ],
            );
        let (reporter, poll) = (RecordingReporter::default(), poll_config());
        let controller = StackController::new(&cfn, &clock, &reporter, &poll);

        controller.poll_until_terminal("web").await.unwrap();

        assert_eq!(reporter.event_ids(), vec!["e2", "e3"]);
    }

    #[tokio::test]
    async fn vanished_stack_is_an_error() {
        let cfn = FakeCloudFormation::default().with_describe_sequence(
            "web",
            vec![Ok(vec![snapshot("web", StackStatus::DeleteInProgress)]), Ok(vec![])],
        );
        let (clock, reporter, poll) =
            (FakeClock::default(), RecordingReporter::default(), poll_config());
        let controller = StackController::new(&cfn, &clock, &reporter, &poll);

        let err = controller.poll_until_terminal("web").await.unwrap_err();
        assert!(matches!(err, DeployError::StackVanished { .. }));
    }

    #[tokio::test]
    async fn network_failure_mid_poll_is_a_networking_error() {
        let cfn = FakeCloudFormation::default().with_describe_sequence(
            "web",
            vec![
                Ok(vec![snapshot("web", StackStatus::CreateInProgress)]),
                Err(ProviderError::Network("connection reset".into())),
            ],
        );
        let (clock, reporter, poll) =
            (FakeClock::default(), RecordingReporter::default(), poll_config());
        let controller = StackController::new(&cfn, &clock, &reporter, &poll);

        let err = controller.poll_until_terminal("web").await.unwrap_err();
        assert_eq!(err.kind(), "networking");
    }

    #[tokio::test]
    async fn polling_gives_up_after_max_wait() {
        let cfn = FakeCloudFormation::default()
            .with_stack(snapshot("web", StackStatus::UpdateInProgress));
        let (clock, reporter) = (FakeClock::default(), RecordingReporter::default());
        let poll = PollConfig {
            interval_secs: 10,
            event_lookback_secs: 600,
            max_wait_secs: 30,
        };
        let controller = StackController::new(&cfn, &clock, &reporter, &poll);

        let err = controller.poll_until_terminal("web").await.unwrap_err();
        match err {
            DeployError::PollTimeout { waited_secs, status, .. } => {
                assert_eq!(waited_secs, 30);
                assert_eq!(status, StackStatus::UpdateInProgress);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(cfn.call_count("DescribeStacks:web"), 4);
    }
}
