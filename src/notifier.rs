// =============================================================================
// notifier.rs — TELLING PEOPLE THINGS HAPPENED
// =============================================================================
//
// There is no email, no push, no queue. A notification is a row, written in
// the same transaction as the change it describes. If the row exists, the
// notification was delivered. If the transaction rolled back, so did the
// notification, which is exactly right: nobody should be told about a report
// that does not exist.
// =============================================================================

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Audience, Authority, Issue, IssueStatus, Notification};
use crate::store::StoreTx;

fn unread(issue_id: Uuid, user_id: Uuid, message: String, audience: Audience) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        issue_id,
        user_id,
        message,
        is_read: false,
        audience,
        created_at: Utc::now(),
    }
}

/// Tells the responsible authority a new report landed on its desk.
pub fn authority_notice(issue: &Issue, authority: &Authority) -> Notification {
    unread(
        issue.id,
        authority.user_id,
        format!(
            "New {} issue reported in {}: {}",
            issue.category, authority.district, issue.title
        ),
        Audience::Authority,
    )
}

/// Tells the reporting citizen their report moved.
pub fn citizen_status_notice(issue: &Issue, status: IssueStatus) -> Notification {
    unread(
        issue.id,
        issue.user_id,
        format!("Status of your issue '{}' changed to {}", issue.title, status),
        Audience::Citizen,
    )
}

/// Write `notification` inside `tx`.
pub async fn dispatch(tx: &mut dyn StoreTx, notification: &Notification) -> Result<(), StoreError> {
    tx.insert_notification(notification).await?;
    debug!(
        issue_id = %notification.issue_id,
        user_id = %notification.user_id,
        audience = ?notification.audience,
        "Notification dispatched"
    );
    Ok(())
}
