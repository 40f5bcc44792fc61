use std::collections::BTreeMap;

/// Per-invocation switches, built once from the command line and never
/// changed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Log the request instead of sending it; the pre-install script is
    /// shown but not run.
    pub dry_run: bool,
    /// Update even when the stack is not in a healthy state.
    pub force: bool,
    /// Logical ids the stack policy should let this update touch.
    pub allow_update: Vec<String>,
    /// Also replace the stack's permanent policy with the manifest's.
    pub update_policy: bool,
    /// `key=value` pairs from the command line. Later pairs win.
    pub overrides: BTreeMap<String, String>,
}

impl DeployOptions {
    pub fn with_overrides<I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.overrides.extend(pairs);
        self
    }
}

/// Parse a `key=value` command-line parameter. Only the first `=` splits, so
/// values may contain `=`.
pub fn parse_parameter_override(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{arg}'")),
    }
}
