//! SDK type <-> orchestrator type conversions and error mapping.

use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::primitives::DateTime as SmithyDateTime;
use aws_sdk_cloudformation::types as cfn;
use chrono::{DateTime, Utc};
use stackdeploy_core::{
    ChangeAction, ChangeSetEntry, ChangeSetSummary, ProviderError, StackEvent, StackResource,
    StackSnapshot, StackStatus, TemplateParameter,
};

/// Transport failures become [`ProviderError::Network`]; everything else
/// keeps the service's error code and message.
pub(crate) fn provider_error<E>(err: SdkError<E>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match &err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            ProviderError::Network(DisplayErrorContext(&err).to_string())
        }
        _ => ProviderError::Service {
            code: err.code().map(str::to_string),
            message: err
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&err).to_string()),
        },
    }
}

/// DescribeStacks answers a lookup of an unknown name with a ValidationError.
pub(crate) fn is_missing_stack(error: &ProviderError) -> bool {
    match error {
        ProviderError::Service { code, message } => {
            code.as_deref() == Some("ValidationError") && message.contains("does not exist")
        }
        ProviderError::Network(_) => false,
    }
}

pub(crate) fn timestamp(value: Option<&SmithyDateTime>) -> Option<DateTime<Utc>> {
    value.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
}

pub(crate) fn stack(stack: &cfn::Stack) -> StackSnapshot {
    StackSnapshot {
        stack_id: stack.stack_id().unwrap_or_default().to_string(),
        stack_name: stack.stack_name().unwrap_or_default().to_string(),
        status: StackStatus::parse(stack.stack_status().map(|s| s.as_str()).unwrap_or_default()),
        status_reason: stack.stack_status_reason().map(str::to_string),
        parameters: stack
            .parameters()
            .iter()
            .filter_map(|p| {
                Some((
                    p.parameter_key()?.to_string(),
                    p.resolved_value()
                        .or(p.parameter_value())
                        .unwrap_or_default()
                        .to_string(),
                ))
            })
            .collect(),
        outputs: stack
            .outputs()
            .iter()
            .filter_map(|o| Some((o.output_key()?.to_string(), o.output_value()?.to_string())))
            .collect(),
    }
}

pub(crate) fn resource(resource: &cfn::StackResource) -> StackResource {
    StackResource {
        logical_id: resource.logical_resource_id().unwrap_or_default().to_string(),
        physical_id: resource.physical_resource_id().map(str::to_string),
        resource_type: resource.resource_type().unwrap_or_default().to_string(),
        status: resource
            .resource_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
    }
}

/// Events without an id or timestamp cannot be deduplicated or windowed and
/// are dropped.
pub(crate) fn event(event: &cfn::StackEvent) -> Option<StackEvent> {
    Some(StackEvent {
        event_id: event.event_id()?.to_string(),
        timestamp: timestamp(event.timestamp())?,
        logical_id: event.logical_resource_id().unwrap_or_default().to_string(),
        resource_type: event.resource_type().unwrap_or_default().to_string(),
        status: event
            .resource_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        reason: event.resource_status_reason().map(str::to_string),
    })
}

pub(crate) fn template_parameter(parameter: &cfn::TemplateParameter) -> Option<TemplateParameter> {
    Some(TemplateParameter {
        key: parameter.parameter_key()?.to_string(),
        default_value: parameter.default_value().map(str::to_string),
        description: parameter.description().map(str::to_string),
        no_echo: parameter.no_echo().unwrap_or(false),
    })
}

/// Only resource changes are meaningful to the review; other change types
/// are skipped.
pub(crate) fn change(change: &cfn::Change) -> Option<ChangeSetEntry> {
    let resource = change.resource_change()?;
    Some(ChangeSetEntry {
        logical_id: resource.logical_resource_id().unwrap_or_default().to_string(),
        physical_id: resource.physical_resource_id().map(str::to_string),
        resource_type: resource.resource_type().unwrap_or_default().to_string(),
        action: ChangeAction::from(resource.action().map(|a| a.as_str()).unwrap_or_default()),
        replacement: resource.replacement().map(|r| r.as_str()).into(),
    })
}

pub(crate) fn change_set_summary(summary: &cfn::ChangeSetSummary) -> ChangeSetSummary {
    ChangeSetSummary {
        change_set_name: summary.change_set_name().unwrap_or_default().to_string(),
        status: summary
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        execution_status: summary
            .execution_status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        created: timestamp(summary.creation_time()),
        description: summary.description().map(str::to_string),
    }
}

pub(crate) fn parameter(key: &str, value: &str) -> cfn::Parameter {
    cfn::Parameter::builder()
        .parameter_key(key)
        .parameter_value(value)
        .build()
}
