//! `changeset` subcommands

use super::{ParameterArgs, Session};
use crate::render;
use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

#[derive(Subcommand, Debug, Clone)]
pub enum ChangesetCommand {
    /// Create a change set for the manifest's stack and review it
    Create {
        /// Change set name
        name: String,

        /// Free-text description stored with the change set
        #[arg(long)]
        description: Option<String>,

        #[command(flatten)]
        parameters: ParameterArgs,
    },
    /// Show a change set's entries and any stack policy violations
    Describe { name: String },
    /// Execute a change set and follow the stack to completion
    Execute { name: String },
    /// Delete a change set
    Delete { name: String },
    /// List the stack's change sets
    List,
}

impl ChangesetCommand {
    pub async fn run(&self, session: &Session) -> Result<()> {
        let deployer = session.deployer();
        let manifest = &session.manifest;

        match self {
            ChangesetCommand::Create {
                name,
                description,
                parameters,
            } => {
                deployer
                    .create_changeset(manifest, &parameters.options(), name, description.as_deref())
                    .await?;
            }
            ChangesetCommand::Describe { name } => {
                deployer.describe_changeset(manifest, name).await?;
            }
            ChangesetCommand::Execute { name } => {
                let outcome = deployer.execute_changeset(manifest, name).await?;
                render::deploy_outcome(session.stack_name(), &outcome);
            }
            ChangesetCommand::Delete { name } => {
                deployer.delete_changeset(manifest, name).await?;
                println!(
                    "{} Change set {} deleted",
                    "✓".green().bold(),
                    name.bold()
                );
            }
            ChangesetCommand::List => {
                let summaries = deployer.list_changesets(manifest).await?;
                render::change_set_table(&summaries);
            }
        }
        Ok(())
    }
}
