//! Manifest skeleton generation for the `generate` command

use anyhow::{Context, Result};
use stackdeploy_core::TemplateParameter;
use std::path::Path;

const TEMPLATE: &str = include_str!("../templates/manifest.yaml");

/// Render a commented manifest for `location` listing every declared
/// parameter with its default and description.
pub fn render_manifest(
    location: &str,
    region: &str,
    parameters: &[TemplateParameter],
) -> Result<String> {
    Ok(TEMPLATE
        .replace("{{STACK_NAME}}", &stack_name_for(location))
        .replace("{{REGION}}", region)
        .replace("{{TEMPLATE_KEY}}", template_key(location))
        .replace("{{TEMPLATE}}", location)
        .replace("{{PARAMETERS}}", &parameter_lines(parameters)?))
}

fn is_url(location: &str) -> bool {
    location.starts_with("https://") || location.starts_with("http://")
}

fn template_key(location: &str) -> &'static str {
    if is_url(location) {
        "S3Template"
    } else if location.ends_with(".json") {
        "JsonTemplate"
    } else {
        "LocalTemplate"
    }
}

/// File stem of the template, e.g. `web` for `templates/web.yaml`.
fn stack_name_for(location: &str) -> String {
    let last = location.rsplit('/').next().unwrap_or(location);
    Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("my-stack")
        .to_string()
}

fn parameter_lines(parameters: &[TemplateParameter]) -> Result<String> {
    if parameters.is_empty() {
        return Ok("  {}".to_string());
    }

    let mut lines = Vec::new();
    for parameter in parameters {
        if let Some(description) = parameter.description.as_deref().filter(|d| !d.is_empty()) {
            lines.push(format!("  # {}", description.replace('\n', " ")));
        }
        let value = match parameter.default_value.as_deref() {
            None | Some("-") | Some("") => String::new(),
            Some(default) => format!(" {}", yaml_scalar(default)?),
        };
        lines.push(format!("  {}:{}", parameter.key, value));
    }
    Ok(lines.join("\n"))
}

fn yaml_scalar(value: &str) -> Result<String> {
    let rendered = serde_yaml::to_string(value)
        .with_context(|| format!("Failed to render default value {value:?}"))?;
    Ok(rendered.trim_end().to_string())
}
