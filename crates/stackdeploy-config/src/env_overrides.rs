use crate::{LogFormat, RuntimeConfig};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "STACKDEPLOY_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    /// Get an environment variable WITHOUT the STACKDEPLOY_ prefix
    /// Used for AWS standard variables (AWS_PROFILE, AWS_REGION, etc.)
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Polling
    if let Some(val) = get_env_u64(env, "POLL_INTERVAL_SECS")? {
        config.poll.interval_secs = val;
    }
    if let Some(val) = get_env_u64(env, "EVENT_LOOKBACK_SECS")? {
        config.poll.event_lookback_secs = val;
    }
    if let Some(val) = get_env_u64(env, "MAX_WAIT_SECS")? {
        config.poll.max_wait_secs = val;
    }

    // Scripts
    if let Some(dir) = env.get("SCRATCH_DIR") {
        config.scripts.scratch_dir = PathBuf::from(dir);
    }

    // Logging
    if let Some(level) = env.get("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.logging.format = format
            .parse::<LogFormat>()
            .context("Invalid STACKDEPLOY_LOG_FORMAT value")?;
    }

    // AWS standard variables (without STACKDEPLOY_ prefix for compatibility).
    // AWS_DEFAULT_PROFILE is what the older tooling honoured.
    if let Some(profile) = env
        .get_raw("AWS_PROFILE")
        .or_else(|| env.get_raw("AWS_DEFAULT_PROFILE"))
    {
        config.aws.profile = Some(profile);
    }
    if let Some(region) = env
        .get_raw("AWS_REGION")
        .or_else(|| env.get_raw("AWS_DEFAULT_REGION"))
    {
        config.aws.region = Some(region);
    }

    Ok(())
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .parse::<u64>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
