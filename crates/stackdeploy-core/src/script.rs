//! Pre/post install scripts.
//!
//! A script body from the manifest has its `{{name}}` placeholders filled
//! in, is written to the scratch directory as an executable file, and run.
//! The file is removed after a successful run and kept for inspection after
//! a failure.

use crate::error::{DeployError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    PreInstall,
    PostInstall,
    PostUpdate,
}

impl ScriptPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptPhase::PreInstall => "preinstall",
            ScriptPhase::PostInstall => "postinstall",
            ScriptPhase::PostUpdate => "postupdate",
        }
    }

    /// Only a failed pre-install script stops the deployment; by the time a
    /// post script runs the stack change has already happened.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScriptPhase::PreInstall)
    }
}

impl fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replace every `{{name}}` whose name is in `values`. A name never contains
/// braces, so a stray `{{` cannot swallow a later placeholder. Unknown
/// placeholders are left as written, and substituted text is never scanned again.
pub fn render_placeholders(body: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let substitution = after_open
            .find("}}")
            .map(|end| &after_open[..end])
            .filter(|name| !name.contains(['{', '}']))
            .and_then(|name| values.get(name).map(|value| (name.len(), value)));

        match substitution {
            Some((name_len, value)) => {
                out.push_str(value);
                rest = &after_open[name_len + 2..];
            }
            None => {
                // not a placeholder we know; move past one brace and keep looking
                out.push('{');
                rest = &rest[start + 1..];
            }
        }
    }

    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Runs an executable file and waits for it.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &Path) -> std::io::Result<ProcessExit>;
}

/// Runs scripts as child processes sharing this process's stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellProcessRunner;

#[async_trait]
impl ProcessRunner for ShellProcessRunner {
    async fn run(&self, program: &Path) -> std::io::Result<ProcessExit> {
        let status = tokio::process::Command::new(program).status().await?;
        Ok(ProcessExit {
            code: status.code(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    Succeeded,
    /// Non-fatal failure; the script is kept at `path`.
    Failed { path: PathBuf, exit: String },
    /// Dry run: rendered and shown, not executed.
    Shown,
    /// The manifest has no script for this phase.
    Skipped,
}

pub struct ScriptRunner<'a> {
    scratch_dir: &'a Path,
    runner: &'a dyn ProcessRunner,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(scratch_dir: &'a Path, runner: &'a dyn ProcessRunner) -> Self {
        Self {
            scratch_dir,
            runner,
        }
    }

    pub fn script_path(&self, stack_name: &str, region: &str, phase: ScriptPhase) -> PathBuf {
        self.scratch_dir
            .join(format!("{stack_name}-{region}-{phase}.sh"))
    }

    /// Render `body` with `values` and run it. A failure is an error for
    /// the pre-install phase and a warning otherwise.
    pub async fn run(
        &self,
        stack_name: &str,
        region: &str,
        phase: ScriptPhase,
        body: Option<&str>,
        values: &BTreeMap<String, String>,
        dry_run: bool,
    ) -> Result<ScriptOutcome> {
        let Some(body) = body else {
            debug!(phase = %phase, "No script configured");
            return Ok(ScriptOutcome::Skipped);
        };

        let rendered = render_placeholders(body, values);

        if dry_run {
            info!(phase = %phase, "Dry run; script not executed:\n{}", rendered);
            return Ok(ScriptOutcome::Shown);
        }

        let path = self.script_path(stack_name, region, phase);
        write_executable(&path, &rendered)?;
        info!(phase = %phase, path = %path.display(), "Running script");

        let failure = match self.runner.run(&path).await {
            Ok(exit) if exit.success() => {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Could not remove script");
                }
                info!(phase = %phase, "Script succeeded");
                return Ok(ScriptOutcome::Succeeded);
            }
            Ok(exit) => exit.to_string(),
            Err(e) => format!("could not start: {e}"),
        };

        if phase.is_fatal() {
            return Err(DeployError::ScriptFailure {
                phase,
                path,
                status: failure,
            });
        }

        warn!(
            phase = %phase,
            path = %path.display(),
            status = %failure,
            "Script failed; the stack change itself succeeded"
        );
        Ok(ScriptOutcome::Failed {
            path,
            exit: failure,
        })
    }
}

fn write_executable(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| DeployError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| DeployError::io(path, e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProcessRunner;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn placeholders_are_replaced_in_one_pass() {
        let rendered = render_placeholders(
            "echo {{Env}} {{Missing}} {{Loop}} {{",
            &values(&[("Env", "prod"), ("Loop", "{{Env}}")]),
        );
        assert_eq!(rendered, "echo prod {{Missing}} {{Env}} {{");
    }

    #[test]
    fn stray_braces_do_not_hide_a_later_placeholder() {
        let env = values(&[("Env", "prod")]);
        assert_eq!(
            render_placeholders("echo '{{' ; echo {{Env}}", &env),
            "echo '{{' ; echo prod"
        );
        assert_eq!(render_placeholders("{{{Env}}}", &env), "{prod}");
        assert_eq!(render_placeholders("{{a}b}} {{Env}}", &env), "{{a}b}} prod");

        let rendered = render_placeholders("x={{ {{Env}} y={{Env}", &env);
        assert_eq!(rendered, "x={{ prod y={{Env}");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        assert_eq!(render_placeholders("plain }} text", &BTreeMap::new()), "plain }} text");
    }

    #[tokio::test]
    async fn successful_script_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeProcessRunner::exiting(0);
        let scripts = ScriptRunner::new(dir.path(), &runner);

        let outcome = scripts
            .run(
                "web",
                "us-east-1",
                ScriptPhase::PreInstall,
                Some("#!/bin/sh\necho {{Env}}\n"),
                &values(&[("Env", "prod")]),
                false,
            )
            .await
            .unwrap();

        assert_eq!(outcome, ScriptOutcome::Succeeded);
        let path = dir.path().join("web-us-east-1-preinstall.sh");
        assert!(!path.exists());
        assert_eq!(runner.ran(), vec![(path, "#!/bin/sh\necho prod\n".to_string())]);
    }

    #[tokio::test]
    async fn failed_pre_install_is_fatal_and_kept() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeProcessRunner::exiting(3);
        let scripts = ScriptRunner::new(dir.path(), &runner);

        let err = scripts
            .run(
                "web",
                "us-east-1",
                ScriptPhase::PreInstall,
                Some("exit 3"),
                &BTreeMap::new(),
                false,
            )
            .await
            .unwrap_err();

        match err {
            DeployError::ScriptFailure { path, status, .. } => {
                assert!(path.exists());
                assert_eq!(status, "exit code 3");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn failed_post_install_is_only_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeProcessRunner::exiting(1);
        let scripts = ScriptRunner::new(dir.path(), &runner);

        let outcome = scripts
            .run(
                "web",
                "eu-west-1",
                ScriptPhase::PostUpdate,
                Some("exit 1"),
                &BTreeMap::new(),
                false,
            )
            .await
            .unwrap();

        match outcome {
            ScriptOutcome::Failed { path, .. } => {
                assert_eq!(path, dir.path().join("web-eu-west-1-postupdate.sh"));
                assert!(path.exists());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_file_is_owner_only_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let runner = FakeProcessRunner::exiting(1);
        let scripts = ScriptRunner::new(dir.path(), &runner);
        scripts
            .run(
                "web",
                "us-east-1",
                ScriptPhase::PostInstall,
                Some("true"),
                &BTreeMap::new(),
                false,
            )
            .await
            .unwrap();

        let mode = std::fs::metadata(dir.path().join("web-us-east-1-postinstall.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn dry_run_and_missing_script_run_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeProcessRunner::exiting(0);
        let scripts = ScriptRunner::new(dir.path(), &runner);

        let shown = scripts
            .run(
                "web",
                "us-east-1",
                ScriptPhase::PreInstall,
                Some("echo hi"),
                &BTreeMap::new(),
                true,
            )
            .await
            .unwrap();
        let skipped = scripts
            .run("web", "us-east-1", ScriptPhase::PostInstall, None, &BTreeMap::new(), false)
            .await
            .unwrap();

        assert_eq!(shown, ScriptOutcome::Shown);
        assert_eq!(skipped, ScriptOutcome::Skipped);
        assert!(runner.ran().is_empty());
    }
}
