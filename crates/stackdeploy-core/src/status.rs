//! CloudFormation status vocabulary and its three-way classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a status should be presented: good (green), bad (red) or still moving (yellow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Good,
    Bad,
    InProgress,
}

macro_rules! stack_statuses {
    ($($variant:ident => $name:literal,)*) => {
        /// Stack lifecycle status. Statuses this build doesn't know are kept verbatim.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum StackStatus {
            $($variant,)*
            Unknown(String),
        }

        impl StackStatus {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $name,)*
                    Self::Unknown(other) => other.as_str(),
                }
            }
        }

        impl FromStr for StackStatus {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(match s {
                    $($name => Self::$variant,)*
                    other => Self::Unknown(other.to_string()),
                })
            }
        }
    };
}

stack_statuses! {
    CreateInProgress => "CREATE_IN_PROGRESS",
    CreateFailed => "CREATE_FAILED",
    CreateComplete => "CREATE_COMPLETE",
    RollbackInProgress => "ROLLBACK_IN_PROGRESS",
    RollbackFailed => "ROLLBACK_FAILED",
    RollbackComplete => "ROLLBACK_COMPLETE",
    DeleteInProgress => "DELETE_IN_PROGRESS",
    DeleteFailed => "DELETE_FAILED",
    DeleteComplete => "DELETE_COMPLETE",
    UpdateInProgress => "UPDATE_IN_PROGRESS",
    UpdateCompleteCleanupInProgress => "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
    UpdateComplete => "UPDATE_COMPLETE",
    UpdateFailed => "UPDATE_FAILED",
    UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
    UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
    UpdateRollbackCompleteCleanupInProgress => "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
    UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
    ReviewInProgress => "REVIEW_IN_PROGRESS",
    ImportInProgress => "IMPORT_IN_PROGRESS",
    ImportComplete => "IMPORT_COMPLETE",
    ImportRollbackInProgress => "IMPORT_ROLLBACK_IN_PROGRESS",
    ImportRollbackFailed => "IMPORT_ROLLBACK_FAILED",
    ImportRollbackComplete => "IMPORT_ROLLBACK_COMPLETE",
}

impl StackStatus {
    pub fn parse(s: &str) -> Self {
        match s.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }

    /// Healthy statuses; the only ones an update may start from without --force.
    pub fn is_good(&self) -> bool {
        matches!(self, Self::CreateComplete | Self::UpdateComplete)
    }

    /// Still transitioning on its own. REVIEW_IN_PROGRESS waits for an
    /// operator to execute a changeset, so polling treats it as settled.
    pub fn is_in_progress(&self) -> bool {
        match self {
            Self::ReviewInProgress => false,
            other => other.as_str().ends_with("_IN_PROGRESS"),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify_stack_status(status: &StackStatus) -> Severity {
    if status.is_good() || *status == StackStatus::ImportComplete {
        Severity::Good
    } else if status.is_in_progress() {
        Severity::InProgress
    } else {
        Severity::Bad
    }
}

const RESOURCE_GOOD: &[&str] = &["CREATE_COMPLETE", "UPDATE_COMPLETE", "IMPORT_COMPLETE"];

const RESOURCE_BAD: &[&str] = &[
    "CREATE_FAILED",
    "DELETE_IN_PROGRESS",
    "DELETE_FAILED",
    "DELETE_COMPLETE",
    "DELETE_SKIPPED",
    "UPDATE_FAILED",
    "IMPORT_FAILED",
    "ROLLBACK_IN_PROGRESS",
    "ROLLBACK_FAILED",
    "ROLLBACK_COMPLETE",
    "UPDATE_ROLLBACK_IN_PROGRESS",
    "UPDATE_ROLLBACK_FAILED",
    "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
    "UPDATE_ROLLBACK_COMPLETE",
    "IMPORT_ROLLBACK_IN_PROGRESS",
    "IMPORT_ROLLBACK_FAILED",
    "IMPORT_ROLLBACK_COMPLETE",
];

/// Classify a resource status as reported in a stack event or resource listing.
/// Anything not known to be good or bad is shown as in progress.
pub fn classify_resource_status(status: &str) -> Severity {
    if RESOURCE_GOOD.contains(&status) {
        Severity::Good
    } else if RESOURCE_BAD.contains(&status) {
        Severity::Bad
    } else {
        Severity::InProgress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_statuses_round_trip_and_unknown_are_kept() {
        assert_eq!(
            StackStatus::parse("UPDATE_ROLLBACK_COMPLETE"),
            StackStatus::UpdateRollbackComplete
        );
        let odd = StackStatus::parse("SOMETHING_NEW");
        assert_eq!(odd, StackStatus::Unknown("SOMETHING_NEW".into()));
        assert_eq!(odd.to_string(), "SOMETHING_NEW");
    }

    #[test]
    fn terminal_statuses() {
        for done in [
            "CREATE_FAILED",
            "CREATE_COMPLETE",
            "ROLLBACK_FAILED",
            "ROLLBACK_COMPLETE",
            "DELETE_FAILED",
            "DELETE_COMPLETE",
            "UPDATE_COMPLETE",
            "UPDATE_FAILED",
            "UPDATE_ROLLBACK_FAILED",
            "UPDATE_ROLLBACK_COMPLETE",
            "REVIEW_IN_PROGRESS",
        ] {
            assert!(StackStatus::parse(done).is_terminal(), "{done}");
        }
        for moving in [
            "CREATE_IN_PROGRESS",
            "ROLLBACK_IN_PROGRESS",
            "DELETE_IN_PROGRESS",
            "UPDATE_IN_PROGRESS",
            "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
            "UPDATE_ROLLBACK_IN_PROGRESS",
            "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
            "SOME_FUTURE_IN_PROGRESS",
        ] {
            assert!(StackStatus::parse(moving).is_in_progress(), "{moving}");
        }
    }

    #[test]
    fn only_complete_statuses_are_good() {
        assert!(StackStatus::CreateComplete.is_good());
        assert!(StackStatus::UpdateComplete.is_good());
        assert!(!StackStatus::UpdateRollbackComplete.is_good());
        assert_eq!(
            classify_stack_status(&StackStatus::RollbackComplete),
            Severity::Bad
        );
        assert_eq!(
            classify_stack_status(&StackStatus::UpdateInProgress),
            Severity::InProgress
        );
    }

    #[test]
    fn resource_statuses() {
        assert_eq!(classify_resource_status("CREATE_COMPLETE"), Severity::Good);
        assert_eq!(classify_resource_status("DELETE_SKIPPED"), Severity::Bad);
        assert_eq!(classify_resource_status("UPDATE_FAILED"), Severity::Bad);
        assert_eq!(
            classify_resource_status("UPDATE_IN_PROGRESS"),
            Severity::InProgress
        );
    }
}
