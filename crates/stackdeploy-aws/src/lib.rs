//! stackdeploy-aws - CloudFormation provider backed by the AWS SDK
//!
//! Implements [`stackdeploy_core::CloudFormation`] on top of
//! `aws-sdk-cloudformation`. Credentials come from the standard AWS chain;
//! the profile can be pinned from configuration.

mod convert;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudformation::types::{Capability, ChangeSetType, OnFailure, Tag};
use aws_sdk_cloudformation::Client;
use stackdeploy_core::{
    ChangeSetDescription, ChangeSetRequest, ChangeSetSummary, CloudFormation, EventPage,
    ProviderError, ResolvedParameter, StackRequest, StackResource, StackSnapshot,
    TemplateParameter, TemplateRef,
};
use tracing::debug;

pub struct AwsCloudFormation {
    client: Client,
}

impl AwsCloudFormation {
    /// Build a client, optionally pinning the region and a named credentials
    /// profile. Without a region the SDK's default provider chain decides.
    pub async fn connect(region: Option<&str>, profile: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let config = loader.load().await;

        debug!(region = ?config.region(), profile = ?profile, "CloudFormation client ready");
        Self {
            client: Client::new(&config),
        }
    }

    /// The region requests are sent to, if one could be determined.
    pub fn region(&self) -> Option<&str> {
        self.client.config().region().map(|r| r.as_ref())
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn parameters(parameters: &[ResolvedParameter]) -> Vec<aws_sdk_cloudformation::types::Parameter> {
    parameters
        .iter()
        .map(|p| convert::parameter(&p.key, &p.value))
        .collect()
}

fn capabilities(names: &[String]) -> Vec<Capability> {
    names.iter().map(|c| Capability::from(c.as_str())).collect()
}

fn tags(request: &StackRequest) -> Result<Vec<Tag>, ProviderError> {
    request
        .tags
        .iter()
        .map(|t| {
            Ok(Tag::builder().key(&t.key).value(&t.value).build())
        })
        .collect()
}

#[async_trait]
impl CloudFormation for AwsCloudFormation {
    async fn describe_stacks(&self, stack_name: &str) -> Result<Vec<StackSnapshot>, ProviderError> {
        match self
            .client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
        {
            Ok(output) => Ok(output.stacks().iter().map(convert::stack).collect()),
            Err(e) => {
                let error = convert::provider_error(e);
                if convert::is_missing_stack(&error) {
                    Ok(Vec::new())
                } else {
                    Err(error)
                }
            }
        }
    }

    async fn describe_stack_resources(
        &self,
        stack_name: &str,
    ) -> Result<Vec<StackResource>, ProviderError> {
        let output = self
            .client
            .describe_stack_resources()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(convert::provider_error)?;
        Ok(output.stack_resources().iter().map(convert::resource).collect())
    }

    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<&str>,
    ) -> Result<EventPage, ProviderError> {
        let output = self
            .client
            .describe_stack_events()
            .stack_name(stack_name)
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(convert::provider_error)?;

        Ok(EventPage {
            events: output.stack_events().iter().filter_map(convert::event).collect(),
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn validate_template(
        &self,
        template: &TemplateRef,
    ) -> Result<Vec<TemplateParameter>, ProviderError> {
        let request = self.client.validate_template();
        let request = match template {
            TemplateRef::Body(body) => request.template_body(body),
            TemplateRef::Url(url) => request.template_url(url),
        };
        let output = request.send().await.map_err(convert::provider_error)?;
        Ok(output
            .parameters()
            .iter()
            .filter_map(convert::template_parameter)
            .collect())
    }

    async fn estimate_template_cost(
        &self,
        template: &TemplateRef,
        resolved: &[ResolvedParameter],
    ) -> Result<String, ProviderError> {
        let request = self
            .client
            .estimate_template_cost()
            .set_parameters(Some(parameters(resolved)));
        let request = match template {
            TemplateRef::Body(body) => request.template_body(body),
            TemplateRef::Url(url) => request.template_url(url),
        };
        let output = request.send().await.map_err(convert::provider_error)?;
        Ok(output.url().unwrap_or_default().to_string())
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<String, ProviderError> {
        let call = self
            .client
            .create_stack()
            .stack_name(&request.stack_name)
            .set_parameters(Some(parameters(&request.parameters)))
            .set_capabilities(Some(capabilities(&request.capabilities)))
            .set_notification_arns(Some(request.notification_arns.clone()))
            .set_tags(Some(tags(request)?))
            .set_timeout_in_minutes(request.timeout_in_minutes.map(|m| m as i32))
            .set_on_failure(request.on_failure.map(|f| OnFailure::from(f.as_str())))
            .set_stack_policy_body(request.stack_policy_body.clone());
        let call = match &request.template {
            TemplateRef::Body(body) => call.template_body(body),
            TemplateRef::Url(url) => call.template_url(url),
        };

        let output = call.send().await.map_err(convert::provider_error)?;
        Ok(output.stack_id().unwrap_or_default().to_string())
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<String, ProviderError> {
        let call = self
            .client
            .update_stack()
            .stack_name(&request.stack_name)
            .set_parameters(Some(parameters(&request.parameters)))
            .set_capabilities(Some(capabilities(&request.capabilities)))
            .set_notification_arns(Some(request.notification_arns.clone()))
            .set_stack_policy_body(request.stack_policy_body.clone())
            .set_stack_policy_during_update_body(request.stack_policy_during_update_body.clone());
        let call = match &request.template {
            TemplateRef::Body(body) => call.template_body(body),
            TemplateRef::Url(url) => call.template_url(url),
        };

        let output = call.send().await.map_err(convert::provider_error)?;
        Ok(output.stack_id().unwrap_or_default().to_string())
    }

    async fn get_stack_policy(&self, stack_name: &str) -> Result<Option<String>, ProviderError> {
        let output = self
            .client
            .get_stack_policy()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(convert::provider_error)?;
        Ok(output
            .stack_policy_body()
            .filter(|body| !body.trim().is_empty())
            .map(str::to_string))
    }

    async fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String, ProviderError> {
        let call = self
            .client
            .create_change_set()
            .stack_name(&request.stack_name)
            .change_set_name(&request.change_set_name)
            .change_set_type(ChangeSetType::Update)
            .set_description(request.description.clone())
            .set_parameters(Some(parameters(&request.parameters)))
            .set_capabilities(Some(capabilities(&request.capabilities)))
            .set_notification_arns(Some(request.notification_arns.clone()));
        let call = match &request.template {
            TemplateRef::Body(body) => call.template_body(body),
            TemplateRef::Url(url) => call.template_url(url),
        };

        let output = call.send().await.map_err(convert::provider_error)?;
        Ok(output.id().unwrap_or_default().to_string())
    }

    async fn describe_change_set(
        &self,
        stack_name: &str,
        change_set: &str,
    ) -> Result<ChangeSetDescription, ProviderError> {
        let mut description: Option<ChangeSetDescription> = None;
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .describe_change_set()
                .stack_name(stack_name)
                .change_set_name(change_set)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(convert::provider_error)?;

            let entries = output.changes().iter().filter_map(convert::change);
            match description.as_mut() {
                Some(existing) => existing.entries.extend(entries),
                None => {
                    description = Some(ChangeSetDescription {
                        change_set_id: output.change_set_id().unwrap_or_default().to_string(),
                        change_set_name: output
                            .change_set_name()
                            .unwrap_or(change_set)
                            .to_string(),
                        status: output
                            .status()
                            .map(|s| s.as_str().to_string())
                            .unwrap_or_default(),
                        execution_status: output
                            .execution_status()
                            .map(|s| s.as_str().to_string())
                            .unwrap_or_default(),
                        status_reason: output.status_reason().map(str::to_string),
                        entries: entries.collect(),
                    })
                }
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        description.ok_or_else(|| ProviderError::Service {
            code: None,
            message: format!("empty description for change set {change_set}"),
        })
    }

    async fn execute_change_set(
        &self,
        stack_name: &str,
        change_set: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .execute_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set)
            .send()
            .await
            .map_err(convert::provider_error)?;
        Ok(())
    }

    async fn delete_change_set(
        &self,
        stack_name: &str,
        change_set: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .delete_change_set()
            .stack_name(stack_name)
            .change_set_name(change_set)
            .send()
            .await
            .map_err(convert::provider_error)?;
        Ok(())
    }

    async fn list_change_sets(
        &self,
        stack_name: &str,
    ) -> Result<Vec<ChangeSetSummary>, ProviderError> {
        let mut summaries = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_change_sets()
                .stack_name(stack_name)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(convert::provider_error)?;

            summaries.extend(output.summaries().iter().map(convert::change_set_summary));

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(summaries)
    }
}
