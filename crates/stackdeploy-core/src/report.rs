//! Progress reporting seam. The CLI renders these callbacks as colored
//! terminal lines; the core only decides what to report and how severe it is.

use crate::changeset::{ChangesetReview, ClassifiedChange};
use crate::provider::StackEvent;
use crate::status::{Severity, StackStatus};
use chrono::{DateTime, Utc};

pub trait Reporter: Send + Sync {
    /// A stack event not reported before.
    fn stack_event(&self, event: &StackEvent, severity: Severity);

    /// The stack's status at one poll.
    fn stack_status(
        &self,
        stack_name: &str,
        status: &StackStatus,
        severity: Severity,
        at: DateTime<Utc>,
    );

    /// One classified changeset entry.
    fn change(&self, change: &ClassifiedChange);

    /// Called once after all entries of a changeset were reported.
    fn changeset_summary(&self, review: &ChangesetReview);
}
