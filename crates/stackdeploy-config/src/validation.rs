// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_poll_config(&config.poll)?;
    validate_script_config(&config.scripts)?;

    if config.logging.level.trim().is_empty() {
        bail!("logging.level must not be empty");
    }

    Ok(())
}

fn validate_poll_config(config: &PollConfig) -> Result<()> {
    if config.interval_secs == 0 {
        bail!("poll.interval_secs must be greater than 0");
    }

    if config.event_lookback_secs == 0 {
        bail!("poll.event_lookback_secs must be greater than 0");
    }

    if config.max_wait_secs < config.interval_secs {
        bail!(
            "poll.max_wait_secs ({}) must be at least poll.interval_secs ({})",
            config.max_wait_secs,
            config.interval_secs
        );
    }

    // DescribeStackEvents is throttled per account
    if config.interval_secs < 5 {
        warn!(
            interval_secs = config.interval_secs,
            "poll.interval_secs is very short; CloudFormation may throttle requests"
        );
    }

    Ok(())
}

fn validate_script_config(config: &ScriptConfig) -> Result<()> {
    if config.scratch_dir.as_os_str().is_empty() {
        bail!("scripts.scratch_dir must not be empty");
    }
    Ok(())
}
