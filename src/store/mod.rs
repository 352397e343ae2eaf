// =============================================================================
// store/mod.rs — WHERE THE COMPLAINTS GO TO BE REMEMBERED
// =============================================================================
//
// Two backends behind one pair of traits:
//
// - `Store` is the connection pool. Reads that do not need to be consistent
//   with anything else go straight through it.
// - `StoreTx` is one transaction. Everything the intake pipeline writes, and
//   every read it makes a decision on, happens inside one of these.
//
// A `StoreTx` that is dropped without `commit()` rolls back. That is the
// whole failure story: if anything between "lock the neighbourhood" and
// "commit" goes wrong, the `?` drops the transaction and nothing is left
// behind.
// =============================================================================

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Authority, Category, Issue, IssueStatus, Notification, Vote};

pub use memory::{MemoryStore, RowCounts};
pub use postgres::PgStore;

/// Result of resolving the authority for a (category, district) pair.
/// "Nobody is responsible" and "the database is on fire" are different
/// answers and callers need to tell them apart.
#[derive(Debug)]
pub enum AuthorityLookup {
    Found(Authority),
    NotFound,
    BackendError(StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct NotificationQuery {
    pub skip: i64,
    pub limit: i64,
    pub unread_only: bool,
}

impl Default for NotificationQuery {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 50,
            unread_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    /// Rows matching the filter, before paging.
    pub total_count: i64,
    /// All unread rows for the user, regardless of the filter.
    pub unread_count: i64,
}

/// Districts are compared trimmed and case-insensitively everywhere: in
/// authority lookup, candidate selection and lock keys.
pub fn normalize_district(district: &str) -> String {
    district.trim().to_lowercase()
}

/// Lock token for creating a report in one geohash cell.
pub fn intake_lock_key(category: Category, district: &str, cell: &str) -> String {
    format!("intake:{}:{}:{}", category.label(), normalize_district(district), cell)
}

/// Lock token for changing one report. Taken by status updates and by a
/// merge before it re-reads its target.
///
/// Every path takes tokens in the same order: intake cells, then `issue:`,
/// then `vote:`, then any row lock. The prefixes sort that way too.
pub fn issue_lock_key(issue_id: Uuid) -> String {
    format!("issue:{issue_id}")
}

/// Lock token for one citizen's vote on one report.
pub fn vote_lock_key(issue_id: Uuid, user_id: Uuid) -> String {
    format!("vote:{issue_id}:{user_id}")
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// The single authority for `category` in `district`. When more than one
    /// is registered the first by name, then id, is chosen.
    async fn find_authority(&self, category: Category, district: &str) -> AuthorityLookup;

    async fn insert_authority(&self, authority: &Authority) -> Result<(), StoreError>;

    async fn get_authority(&self, id: Uuid) -> Result<Option<Authority>, StoreError>;

    async fn get_issue(&self, id: Uuid) -> Result<Option<Issue>, StoreError>;

    /// Every report, oldest first. Feeds the heatmap.
    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError>;

    async fn vote_count(&self, issue_id: Uuid) -> Result<i64, StoreError>;

    async fn user_vote(&self, issue_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, StoreError>;

    /// Newest first.
    async fn list_notifications(
        &self,
        user_id: Uuid,
        query: NotificationQuery,
    ) -> Result<NotificationPage, StoreError>;

    /// Marks every id read, or none of them. Returns `None` when any id is
    /// missing or belongs to someone else.
    async fn mark_read(&self, user_id: Uuid, ids: &[Uuid]) -> Result<Option<u64>, StoreError>;

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, StoreError>;

    async fn delete_notification(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Take exclusive tokens for `keys`, in the order given, held until the
    /// transaction ends. Callers pass keys sorted.
    async fn lock_keys(&mut self, keys: &[String]) -> Result<(), StoreError>;

    /// Open and in-progress reports of `category` whose authority sits in
    /// `district`.
    async fn active_issues(&mut self, category: Category, district: &str) -> Result<Vec<Issue>, StoreError>;

    async fn issue_by_id(&mut self, id: Uuid) -> Result<Option<Issue>, StoreError>;

    async fn authority_by_id(&mut self, id: Uuid) -> Result<Option<Authority>, StoreError>;

    async fn find_vote(&mut self, issue_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, StoreError>;

    /// Insert unless the (user, issue) pair already has a vote. Returns
    /// whether a row was written.
    async fn insert_vote(&mut self, vote: &Vote) -> Result<bool, StoreError>;

    /// Returns whether a row was removed.
    async fn delete_vote(&mut self, issue_id: Uuid, user_id: Uuid) -> Result<bool, StoreError>;

    async fn count_votes(&mut self, issue_id: Uuid) -> Result<i64, StoreError>;

    async fn insert_issue(&mut self, issue: &Issue) -> Result<(), StoreError>;

    async fn set_status(&mut self, id: Uuid, status: IssueStatus, updated_at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn insert_notification(&mut self, notification: &Notification) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_keys_ignore_district_spelling() {
        assert_eq!(
            intake_lock_key(Category::Roads, "  Downtown ", "dr5r"),
            intake_lock_key(Category::Roads, "downtown", "dr5r"),
        );
        assert_eq!(intake_lock_key(Category::WaterSupply, "Ward 7", "dr5r"), "intake:Water Supply:ward 7:dr5r");
    }

    #[test]
    fn test_vote_keys_sort_after_intake_keys() {
        let vote = vote_lock_key(Uuid::new_v4(), Uuid::new_v4());
        let intake = intake_lock_key(Category::Roads, "x", "dr5r");
        assert!(intake < vote);
    }

    #[test]
    fn test_issue_keys_sit_between_intake_and_vote_keys() {
        let id = Uuid::new_v4();
        let issue = issue_lock_key(id);
        assert!(intake_lock_key(Category::Other, "zz", "*") < issue);
        assert!(issue < vote_lock_key(id, Uuid::new_v4()));
    }
}
