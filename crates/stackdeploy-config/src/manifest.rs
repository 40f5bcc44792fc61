//! Deployment manifest: the declarative description of one stack.
//!
//! Manifests are YAML documents with PascalCase keys (`StackName`,
//! `Parameters`, `SourcedParameters`, ...). A `.toml` extension selects TOML
//! with the same keys.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while loading a manifest. No side effects have happened yet
/// when any of these is returned.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Syntax error with manifest {path}: {message}")]
    Syntax { path: PathBuf, message: String },

    #[error("Invalid manifest {path}: {message}")]
    Schema { path: PathBuf, message: String },
}

impl ManifestError {
    fn schema(path: &Path, message: impl Into<String>) -> Self {
        Self::Schema {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Where the template body comes from. Exactly one per manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    LocalFile(PathBuf),
    JsonFile(PathBuf),
    Url(String),
}

impl TemplateSource {
    /// Read the template body for file sources. URL sources have no local body.
    pub fn read_body(&self) -> Result<Option<String>, ManifestError> {
        match self {
            TemplateSource::LocalFile(path) | TemplateSource::JsonFile(path) => {
                std::fs::read_to_string(path)
                    .map(Some)
                    .map_err(|source| ManifestError::Io {
                        path: path.clone(),
                        source,
                    })
            }
            TemplateSource::Url(_) => Ok(None),
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            TemplateSource::Url(url) => Some(url),
            _ => None,
        }
    }
}

impl fmt::Display for TemplateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateSource::LocalFile(path) => write!(f, "LocalTemplate {}", path.display()),
            TemplateSource::JsonFile(path) => write!(f, "JsonTemplate {}", path.display()),
            TemplateSource::Url(url) => write!(f, "S3Template {}", url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnFailure {
    DoNothing,
    Rollback,
    Delete,
}

impl OnFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnFailure::DoNothing => "DO_NOTHING",
            OnFailure::Rollback => "ROLLBACK",
            OnFailure::Delete => "DELETE",
        }
    }
}

/// Section of a dependency stack a sourced parameter reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Resources,
    Outputs,
    Parameters,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Resources => "Resources",
            Section::Outputs => "Outputs",
            Section::Parameters => "Parameters",
        }
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Resources" => Ok(Section::Resources),
            "Outputs" => Ok(Section::Outputs),
            "Parameters" => Ok(Section::Parameters),
            other => Err(format!(
                "unknown section '{}'; valid sections are Resources, Outputs, Parameters",
                other
            )),
        }
    }
}

/// `<stack>.<section>.<field>` reference to another deployed stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedBinding {
    pub stack: String,
    pub section: Section,
    pub field: String,
}

impl FromStr for SourcedBinding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '.');
        let (Some(stack), Some(section), Some(field)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("'{}' is not of the form <stack>.<section>.<field>", s));
        };
        if stack.is_empty() || field.is_empty() {
            return Err(format!("'{}' is not of the form <stack>.<section>.<field>", s));
        }
        Ok(SourcedBinding {
            stack: stack.to_string(),
            section: section.parse()?,
            field: field.to_string(),
        })
    }
}

impl fmt::Display for SourcedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.stack, self.section.as_str(), self.field)
    }
}

/// A manifest parameter or tag value. Lists become CloudFormation
/// `CommaDelimitedList` strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<ParameterValue>),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(b) => write!(f, "{}", b),
            ParameterValue::Integer(i) => write!(f, "{}", i),
            ParameterValue::Float(x) => write!(f, "{}", x),
            ParameterValue::Text(s) => f.write_str(s),
            ParameterValue::List(items) => {
                let joined: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// One stack policy statement. Unknown keys (`Condition`, `NotResource`, ...)
/// are carried through untouched so a regenerated policy keeps them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Effect")]
    pub effect: Effect,

    #[serde(rename = "Principal", default = "default_principal")]
    pub principal: serde_json::Value,

    #[serde(rename = "Action", default, deserialize_with = "one_or_many")]
    pub actions: Vec<String>,

    #[serde(rename = "Resource", default, deserialize_with = "one_or_many")]
    pub resources: Vec<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_principal() -> serde_json::Value {
    serde_json::Value::String("*".to_string())
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimeout {
    Minutes(u32),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(rename = "StackName")]
    stack_name: Option<String>,
    #[serde(rename = "Region")]
    region: Option<String>,
    #[serde(rename = "LocalTemplate")]
    local_template: Option<PathBuf>,
    #[serde(rename = "JsonTemplate")]
    json_template: Option<PathBuf>,
    #[serde(rename = "S3Template")]
    s3_template: Option<String>,
    #[serde(rename = "Parameters")]
    parameters: Option<BTreeMap<String, Option<ParameterValue>>>,
    #[serde(rename = "SourcedParameters")]
    sourced_parameters: Option<BTreeMap<String, Option<String>>>,
    #[serde(rename = "DependsOnStacks")]
    depends_on_stacks: Option<Vec<String>>,
    #[serde(rename = "Tags")]
    tags: Option<BTreeMap<String, Option<ParameterValue>>>,
    #[serde(rename = "StackPolicy")]
    stack_policy: Option<Vec<PolicyStatement>>,
    #[serde(rename = "TimeOut")]
    timeout: Option<RawTimeout>,
    #[serde(rename = "OnFailure")]
    on_failure: Option<OnFailure>,
    #[serde(rename = "NotificationARN")]
    notification_arn: Option<String>,
    #[serde(rename = "PreInstallScript")]
    pre_install_script: Option<String>,
    #[serde(rename = "PostInstallScript")]
    post_install_script: Option<String>,
    #[serde(rename = "PostUpdateScript")]
    post_update_script: Option<String>,
}

/// A validated deployment manifest. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: PathBuf,
    pub stack_name: String,
    pub region: String,
    pub template: TemplateSource,
    pub parameters: BTreeMap<String, String>,
    pub sourced_parameters: BTreeMap<String, SourcedBinding>,
    pub depends_on_stacks: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub stack_policy: Vec<PolicyStatement>,
    pub timeout_minutes: Option<u32>,
    pub on_failure: Option<OnFailure>,
    pub notification_arn: Option<String>,
    pub pre_install_script: Option<String>,
    pub post_install_script: Option<String>,
    pub post_update_script: Option<String>,
}

impl Manifest {
    /// Load and validate a manifest file. `template_url` (from the command
    /// line) replaces whatever template the manifest declares.
    pub fn load(path: &Path, template_url: Option<&str>) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let raw: RawManifest = if is_toml {
            toml::from_str(&content).map_err(|e| ManifestError::Syntax {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|e| ManifestError::Syntax {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        Self::from_raw(raw, path, template_url)
    }

    /// Parse YAML manifest content. `path` is only used in error messages.
    pub fn from_yaml(
        content: &str,
        path: &Path,
        template_url: Option<&str>,
    ) -> Result<Self, ManifestError> {
        let raw: RawManifest =
            serde_yaml::from_str(content).map_err(|e| ManifestError::Syntax {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        Self::from_raw(raw, path, template_url)
    }

    fn from_raw(
        raw: RawManifest,
        path: &Path,
        template_url: Option<&str>,
    ) -> Result<Self, ManifestError> {
        let stack_name = raw
            .stack_name
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ManifestError::schema(path, "StackName is required"))?;
        let region = raw
            .region
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ManifestError::schema(path, "Region is required"))?;

        let template = match template_url {
            Some(url) => TemplateSource::Url(url.to_string()),
            None => select_template(
                path,
                raw.local_template,
                raw.json_template,
                raw.s3_template,
            )?,
        };

        let parameters = raw
            .parameters
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v.to_string())))
            .collect();

        let mut sourced_parameters = BTreeMap::new();
        for (key, reference) in raw.sourced_parameters.unwrap_or_default() {
            let Some(reference) = reference else {
                continue;
            };
            let binding = reference.parse::<SourcedBinding>().map_err(|e| {
                ManifestError::schema(path, format!("SourcedParameters.{}: {}", key, e))
            })?;
            sourced_parameters.insert(key, binding);
        }

        let tags = raw
            .tags
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.map(|v| v.to_string()).unwrap_or_default()))
            .collect();

        let timeout_minutes = match raw.timeout {
            None => None,
            Some(RawTimeout::Minutes(minutes)) => Some(minutes),
            Some(RawTimeout::Text(text)) => Some(
                parse_timeout_minutes(&text)
                    .map_err(|e| ManifestError::schema(path, format!("TimeOut: {}", e)))?,
            ),
        };

        Ok(Manifest {
            path: path.to_path_buf(),
            stack_name,
            region,
            template,
            parameters,
            sourced_parameters,
            depends_on_stacks: raw.depends_on_stacks.unwrap_or_default(),
            tags,
            stack_policy: raw.stack_policy.unwrap_or_default(),
            timeout_minutes,
            on_failure: raw.on_failure,
            notification_arn: raw.notification_arn,
            pre_install_script: raw.pre_install_script,
            post_install_script: raw.post_install_script,
            post_update_script: raw.post_update_script,
        })
    }

    /// The stack policy as the JSON document CloudFormation expects.
    pub fn stack_policy_json(&self) -> String {
        serde_json::json!({ "Statement": self.stack_policy }).to_string()
    }
}

fn select_template(
    path: &Path,
    local: Option<PathBuf>,
    json: Option<PathBuf>,
    url: Option<String>,
) -> Result<TemplateSource, ManifestError> {
    let mut sources = Vec::new();
    if let Some(local) = local {
        sources.push(TemplateSource::LocalFile(local));
    }
    if let Some(json) = json {
        sources.push(TemplateSource::JsonFile(json));
    }
    if let Some(url) = url {
        sources.push(TemplateSource::Url(url));
    }

    match sources.len() {
        0 => Err(ManifestError::schema(
            path,
            "must contain one of LocalTemplate, JsonTemplate or S3Template",
        )),
        1 => Ok(sources.remove(0)),
        _ => Err(ManifestError::schema(
            path,
            "only one of LocalTemplate, JsonTemplate or S3Template may be specified",
        )),
    }
}

/// Parse `15`, `15m` or `2h` into minutes.
pub fn parse_timeout_minutes(text: &str) -> Result<u32, String> {
    let text = text.trim();
    let (digits, multiplier) = if let Some(hours) = text.strip_suffix('h') {
        (hours, 60)
    } else if let Some(minutes) = text.strip_suffix('m') {
        (minutes, 1)
    } else {
        (text, 1)
    };

    let value: u32 = digits
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a duration in minutes (e.g. 15, 15m, 1h)", text))?;
    if value == 0 {
        return Err("timeout must be greater than zero".to_string());
    }
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("'{}' is too long a timeout", text))
}
