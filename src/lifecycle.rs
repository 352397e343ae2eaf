// =============================================================================
// lifecycle.rs — OPEN, IN PROGRESS, RESOLVED, CLOSED
// =============================================================================
//
// A status change is allowed for two people: whoever owns the responsible
// authority, and whoever filed the report. Anything that actually changes
// the status also leaves a note for the reporter, in the same transaction.
// The `issue:` token keeps a concurrent merge from voting on a report that
// is being closed.
// =============================================================================

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::models::{Issue, IssueStatus};
use crate::notifier;
use crate::store::{issue_lock_key, Store};

#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub issue: Issue,
    pub changed: bool,
}

pub async fn update_status(
    store: &Arc<dyn Store>,
    actor: Uuid,
    issue_id: Uuid,
    status: IssueStatus,
) -> Result<StatusChange, LifecycleError> {
    let mut tx = store.begin().await?;
    // Serializes with a merge that has picked this report as its target.
    tx.lock_keys(&[issue_lock_key(issue_id)]).await?;

    let mut issue = tx.issue_by_id(issue_id).await?.ok_or(LifecycleError::IssueNotFound)?;
    let owner = tx.authority_by_id(issue.authority_id).await?.map(|a| a.user_id);

    if actor != issue.user_id && owner != Some(actor) {
        return Err(LifecycleError::Forbidden);
    }

    if issue.status == status {
        return Ok(StatusChange { issue, changed: false });
    }

    let previous = issue.status;
    let now = Utc::now();
    tx.set_status(issue.id, status, now).await?;
    issue.status = status;
    issue.updated_at = now;

    notifier::dispatch(tx.as_mut(), &notifier::citizen_status_notice(&issue, status)).await?;
    tx.commit().await?;

    info!(issue_id = %issue.id, from = %previous, to = %status, "Issue status updated");
    Ok(StatusChange { issue, changed: true })
}
