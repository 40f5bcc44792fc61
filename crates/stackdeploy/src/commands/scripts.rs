//! `pre-install` and `post-install`

use super::{ParameterArgs, Session};
use crate::render;
use anyhow::Result;
use clap::ValueEnum;
use stackdeploy_core::StackAction;

/// Which post script to run: the one after a create or after an update.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    Create,
    Update,
}

impl From<PostAction> for StackAction {
    fn from(action: PostAction) -> Self {
        match action {
            PostAction::Create => StackAction::Create,
            PostAction::Update => StackAction::Update,
        }
    }
}

pub async fn pre_install(session: &Session, args: &ParameterArgs) -> Result<()> {
    let outcome = session
        .deployer()
        .pre_install(&session.manifest, &args.options())
        .await?;
    render::script_outcome(&outcome);
    Ok(())
}

pub async fn post_install(session: &Session, action: PostAction) -> Result<()> {
    let outcome = session
        .deployer()
        .post_install(&session.manifest, action.into())
        .await?;
    render::script_outcome(&outcome);
    Ok(())
}
