// =============================================================================
// store/memory.rs — THE FILING CABINET IN THE BACK ROOM
// =============================================================================
//
// An in-process store for tests and for running the engine on a laptop
// without Postgres. It behaves like the real thing where it matters:
//
// - Writes inside a transaction are staged and invisible to everyone else
//   until commit. Reads inside the transaction see them.
// - Dropping a transaction discards its staged writes.
// - Lock tokens are real async mutexes, one per key, held until the
//   transaction ends. Two intakes in the same neighbourhood queue up behind
//   each other exactly like they do on `pg_advisory_xact_lock`.
// - At most one vote per (user, issue) is re-checked at commit.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{normalize_district, AuthorityLookup, NotificationPage, NotificationQuery, Store, StoreTx};
use crate::error::StoreError;
use crate::models::{Authority, Category, Issue, IssueStatus, Notification, Vote};

#[derive(Debug, Default, Clone)]
struct Tables {
    authorities: Vec<Authority>,
    issues: Vec<Issue>,
    votes: Vec<Vote>,
    notifications: Vec<Notification>,
}

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Row counts, for tests that need to prove nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCounts {
    pub issues: usize,
    pub votes: usize,
    pub notifications: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    locks: Arc<Mutex<LockMap>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_authorities(authorities: Vec<Authority>) -> Self {
        let store = Self::new();
        store.tables.lock().authorities = authorities;
        store
    }

    /// Seed from a JSON array of authorities.
    pub fn from_seed_json(json: &str) -> Result<Self, serde_json::Error> {
        let authorities: Vec<Authority> = serde_json::from_str(json)?;
        Ok(Self::with_authorities(authorities))
    }

    pub fn row_counts(&self) -> RowCounts {
        let t = self.tables.lock();
        RowCounts {
            issues: t.issues.len(),
            votes: t.votes.len(),
            notifications: t.notifications.len(),
        }
    }

    /// Every vote row, for assertions.
    pub fn votes(&self) -> Vec<Vote> {
        self.tables.lock().votes.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            tables: self.tables.clone(),
            locks: self.locks.clone(),
            held: HashSet::new(),
            guards: Vec::new(),
            staged: Vec::new(),
        }))
    }

    async fn find_authority(&self, category: Category, district: &str) -> AuthorityLookup {
        let wanted = normalize_district(district);
        let t = self.tables.lock();
        let mut matches: Vec<&Authority> = t
            .authorities
            .iter()
            .filter(|a| a.category == category && normalize_district(&a.district) == wanted)
            .collect();

        if matches.len() > 1 {
            warn!(
                category = %category,
                district = %district,
                count = matches.len(),
                "Several authorities registered for one (category, district), choosing by name"
            );
        }
        matches.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        match matches.first() {
            Some(a) => AuthorityLookup::Found((*a).clone()),
            None => AuthorityLookup::NotFound,
        }
    }

    async fn insert_authority(&self, authority: &Authority) -> Result<(), StoreError> {
        self.tables.lock().authorities.push(authority.clone());
        Ok(())
    }

    async fn get_authority(&self, id: Uuid) -> Result<Option<Authority>, StoreError> {
        Ok(self.tables.lock().authorities.iter().find(|a| a.id == id).cloned())
    }

    async fn get_issue(&self, id: Uuid) -> Result<Option<Issue>, StoreError> {
        Ok(self.tables.lock().issues.iter().find(|i| i.id == id).cloned())
    }

    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError> {
        let mut issues = self.tables.lock().issues.clone();
        issues.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(issues)
    }

    async fn vote_count(&self, issue_id: Uuid) -> Result<i64, StoreError> {
        Ok(self.tables.lock().votes.iter().filter(|v| v.issue_id == issue_id).count() as i64)
    }

    async fn user_vote(&self, issue_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, StoreError> {
        Ok(self
            .tables
            .lock()
            .votes
            .iter()
            .find(|v| v.issue_id == issue_id && v.user_id == user_id)
            .cloned())
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        query: NotificationQuery,
    ) -> Result<NotificationPage, StoreError> {
        let t = self.tables.lock();
        let mine: Vec<&Notification> = t.notifications.iter().filter(|n| n.user_id == user_id).collect();
        let unread_count = mine.iter().filter(|n| !n.is_read).count() as i64;

        let mut filtered: Vec<Notification> = mine
            .into_iter()
            .filter(|n| !query.unread_only || !n.is_read)
            .cloned()
            .collect();
        let total_count = filtered.len() as i64;

        // Stable sort keeps insertion order among equal timestamps; reverse
        // puts the newest first.
        filtered.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        filtered.reverse();

        let notifications = filtered
            .into_iter()
            .skip(query.skip.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect();

        Ok(NotificationPage {
            notifications,
            total_count,
            unread_count,
        })
    }

    async fn mark_read(&self, user_id: Uuid, ids: &[Uuid]) -> Result<Option<u64>, StoreError> {
        let wanted: HashSet<Uuid> = ids.iter().copied().collect();
        let mut t = self.tables.lock();

        let owned = t
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && wanted.contains(&n.id))
            .count();
        if owned != wanted.len() {
            return Ok(None);
        }

        for n in t.notifications.iter_mut().filter(|n| wanted.contains(&n.id)) {
            n.is_read = true;
        }
        Ok(Some(owned as u64))
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut t = self.tables.lock();
        let mut updated = 0;
        for n in t.notifications.iter_mut().filter(|n| n.user_id == user_id && !n.is_read) {
            n.is_read = true;
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete_notification(&self, user_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.tables.lock();
        let before = t.notifications.len();
        t.notifications.retain(|n| !(n.id == id && n.user_id == user_id));
        Ok(t.notifications.len() < before)
    }
}

/// A write that becomes visible at commit.
#[derive(Debug, Clone)]
enum Staged {
    InsertIssue(Issue),
    SetStatus {
        id: Uuid,
        status: IssueStatus,
        updated_at: DateTime<Utc>,
    },
    InsertVote(Vote),
    DeleteVote { issue_id: Uuid, user_id: Uuid },
    InsertNotification(Notification),
}

pub struct MemoryTx {
    tables: Arc<Mutex<Tables>>,
    locks: Arc<Mutex<LockMap>>,
    held: HashSet<String>,
    guards: Vec<OwnedMutexGuard<()>>,
    staged: Vec<Staged>,
}

impl MemoryTx {
    /// Committed issues overlaid with this transaction's inserts and status
    /// changes.
    fn visible_issues(&self) -> Vec<Issue> {
        let mut issues = self.tables.lock().issues.clone();
        for op in &self.staged {
            match op {
                Staged::InsertIssue(issue) => issues.push(issue.clone()),
                Staged::SetStatus { id, status, updated_at } => {
                    if let Some(issue) = issues.iter_mut().find(|i| i.id == *id) {
                        issue.status = *status;
                        issue.updated_at = *updated_at;
                    }
                }
                _ => {}
            }
        }
        issues
    }

    /// Votes on one issue as this transaction sees them.
    fn visible_votes(&self, issue_id: Uuid) -> Vec<Vote> {
        let mut votes: Vec<Vote> = self
            .tables
            .lock()
            .votes
            .iter()
            .filter(|v| v.issue_id == issue_id)
            .cloned()
            .collect();
        for op in &self.staged {
            match op {
                Staged::InsertVote(vote) if vote.issue_id == issue_id => votes.push(vote.clone()),
                Staged::DeleteVote { issue_id: i, user_id } if *i == issue_id => {
                    votes.retain(|v| v.user_id != *user_id);
                }
                _ => {}
            }
        }
        votes
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_keys(&mut self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            if self.held.contains(key) {
                continue;
            }
            let mutex = {
                let mut locks = self.locks.lock();
                locks.entry(key.clone()).or_default().clone()
            };
            let guard = mutex.lock_owned().await;
            debug!(key = %key, "Lock token acquired");
            self.guards.push(guard);
            self.held.insert(key.clone());
        }
        Ok(())
    }

    async fn active_issues(&mut self, category: Category, district: &str) -> Result<Vec<Issue>, StoreError> {
        let wanted = normalize_district(district);
        let in_district: HashSet<Uuid> = self
            .tables
            .lock()
            .authorities
            .iter()
            .filter(|a| normalize_district(&a.district) == wanted)
            .map(|a| a.id)
            .collect();

        Ok(self
            .visible_issues()
            .into_iter()
            .filter(|i| i.category == category && i.status.is_active() && in_district.contains(&i.authority_id))
            .collect())
    }

    async fn issue_by_id(&mut self, id: Uuid) -> Result<Option<Issue>, StoreError> {
        Ok(self.visible_issues().into_iter().find(|i| i.id == id))
    }

    async fn authority_by_id(&mut self, id: Uuid) -> Result<Option<Authority>, StoreError> {
        Ok(self.tables.lock().authorities.iter().find(|a| a.id == id).cloned())
    }

    async fn find_vote(&mut self, issue_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, StoreError> {
        Ok(self.visible_votes(issue_id).into_iter().find(|v| v.user_id == user_id))
    }

    async fn insert_vote(&mut self, vote: &Vote) -> Result<bool, StoreError> {
        if self.visible_votes(vote.issue_id).iter().any(|v| v.user_id == vote.user_id) {
            return Ok(false);
        }
        self.staged.push(Staged::InsertVote(vote.clone()));
        Ok(true)
    }

    async fn delete_vote(&mut self, issue_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        if !self.visible_votes(issue_id).iter().any(|v| v.user_id == user_id) {
            return Ok(false);
        }
        self.staged.push(Staged::DeleteVote { issue_id, user_id });
        Ok(true)
    }

    async fn count_votes(&mut self, issue_id: Uuid) -> Result<i64, StoreError> {
        Ok(self.visible_votes(issue_id).len() as i64)
    }

    async fn insert_issue(&mut self, issue: &Issue) -> Result<(), StoreError> {
        self.staged.push(Staged::InsertIssue(issue.clone()));
        Ok(())
    }

    async fn set_status(&mut self, id: Uuid, status: IssueStatus, updated_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.staged.push(Staged::SetStatus { id, status, updated_at });
        Ok(())
    }

    async fn insert_notification(&mut self, notification: &Notification) -> Result<(), StoreError> {
        self.staged.push(Staged::InsertNotification(notification.clone()));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        let mut t = self.tables.lock();

        // Validate against a scratch copy so a conflict leaves nothing applied.
        let mut next = t.clone();
        for op in staged {
            match op {
                Staged::InsertIssue(issue) => next.issues.push(issue),
                Staged::SetStatus { id, status, updated_at } => {
                    if let Some(issue) = next.issues.iter_mut().find(|i| i.id == id) {
                        issue.status = status;
                        issue.updated_at = updated_at;
                    }
                }
                Staged::InsertVote(vote) => {
                    if next
                        .votes
                        .iter()
                        .any(|v| v.user_id == vote.user_id && v.issue_id == vote.issue_id)
                    {
                        return Err(StoreError::Conflict {
                            table: "votes",
                            detail: format!("user {} already voted on issue {}", vote.user_id, vote.issue_id),
                        });
                    }
                    next.votes.push(vote);
                }
                Staged::DeleteVote { issue_id, user_id } => {
                    next.votes.retain(|v| !(v.issue_id == issue_id && v.user_id == user_id));
                }
                Staged::InsertNotification(n) => next.notifications.push(n),
            }
        }

        *t = next;
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        // Release our tokens, then forget any lock nobody else is waiting on.
        // A waiter always holds a clone of the Arc, so a count of one means
        // the map's copy is the last.
        self.guards.clear();
        if !self.held.is_empty() {
            let mut locks = self.locks.lock();
            for key in self.held.drain() {
                if locks.get(&key).is_some_and(|m| Arc::strong_count(m) == 1) {
                    locks.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Audience, Priority, Radius};
    use std::time::Duration;

    fn authority(category: Category, district: &str, name: &str) -> Authority {
        Authority {
            id: Uuid::new_v4(),
            name: name.into(),
            district: district.into(),
            contact_email: "desk@city.example".into(),
            contact_phone: None,
            category,
            user_id: Uuid::new_v4(),
        }
    }

    fn issue(authority: &Authority) -> Issue {
        let now = Utc::now();
        Issue {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            authority_id: authority.id,
            title: "Flooded underpass".into(),
            description: "Water up to the wheel arches".into(),
            category: authority.category,
            priority: Priority::HIGH,
            status: IssueStatus::Open,
            location: "40.7128,-74.0060".into(),
            radius: Radius::DEFAULT,
            created_at: now,
            updated_at: now,
        }
    }

    fn notification(user_id: Uuid, issue_id: Uuid) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            issue_id,
            user_id,
            message: "hello".into(),
            is_read: false,
            audience: Audience::Citizen,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_authority_lookup_normalizes_district() {
        let roads = authority(Category::Roads, "Downtown", "Roads Dept");
        let store = MemoryStore::with_authorities(vec![roads.clone()]);

        match store.find_authority(Category::Roads, "  downtown ").await {
            AuthorityLookup::Found(a) => assert_eq!(a.id, roads.id),
            other => panic!("expected Found, got {other:?}"),
        }
        assert!(matches!(
            store.find_authority(Category::Garbage, "Downtown").await,
            AuthorityLookup::NotFound
        ));
    }

    #[tokio::test]
    async fn test_ambiguous_authority_resolves_by_name() {
        let b = authority(Category::Roads, "Downtown", "Bureau of Asphalt");
        let a = authority(Category::Roads, "Downtown", "Asphalt Office");
        let store = MemoryStore::with_authorities(vec![b, a.clone()]);

        match store.find_authority(Category::Roads, "Downtown").await {
            AuthorityLookup::Found(found) => assert_eq!(found.id, a.id),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_private_and_dropped() {
        let auth = authority(Category::Roads, "Downtown", "Roads Dept");
        let store = MemoryStore::with_authorities(vec![auth.clone()]);

        let mut tx = store.begin().await.unwrap();
        let i = issue(&auth);
        tx.insert_issue(&i).await.unwrap();
        assert_eq!(tx.active_issues(Category::Roads, "downtown").await.unwrap().len(), 1);
        assert!(store.get_issue(i.id).await.unwrap().is_none());

        drop(tx);
        assert_eq!(store.row_counts().issues, 0);
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let auth = authority(Category::Roads, "Downtown", "Roads Dept");
        let store = MemoryStore::with_authorities(vec![auth.clone()]);
        let i = issue(&auth);

        let mut tx = store.begin().await.unwrap();
        tx.insert_issue(&i).await.unwrap();
        assert!(tx.insert_vote(&Vote::new(i.user_id, i.id)).await.unwrap());
        tx.insert_notification(&notification(auth.user_id, i.id)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            store.row_counts(),
            RowCounts {
                issues: 1,
                votes: 1,
                notifications: 1
            }
        );
        assert_eq!(store.vote_count(i.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_vote_uniqueness_within_and_across_transactions() {
        let auth = authority(Category::Roads, "Downtown", "Roads Dept");
        let store = MemoryStore::with_authorities(vec![auth.clone()]);
        let (user, issue_id) = (Uuid::new_v4(), Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_vote(&Vote::new(user, issue_id)).await.unwrap());
        assert!(!tx.insert_vote(&Vote::new(user, issue_id)).await.unwrap());
        tx.commit().await.unwrap();

        // Two transactions that both believed the vote was missing: the
        // second one to commit must fail.
        let mut a = store.begin().await.unwrap();
        let mut b = store.begin().await.unwrap();
        let other = Uuid::new_v4();
        assert!(a.insert_vote(&Vote::new(other, issue_id)).await.unwrap());
        assert!(b.insert_vote(&Vote::new(other, issue_id)).await.unwrap());
        a.commit().await.unwrap();
        assert!(matches!(b.commit().await, Err(StoreError::Conflict { .. })));

        assert_eq!(store.vote_count(issue_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lock_tokens_serialize_transactions() {
        let store = Arc::new(MemoryStore::new());
        let keys = vec!["intake:Roads:downtown:dr5r".to_string()];

        let mut first = store.begin().await.unwrap();
        first.lock_keys(&keys).await.unwrap();

        let contender = {
            let store = store.clone();
            let keys = keys.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                second.lock_keys(&keys).await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("second transaction should get the token")
            .unwrap();
        assert!(store.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_relocking_a_held_key_is_a_no_op() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let keys = vec!["vote:a:b".to_string()];
        tx.lock_keys(&keys).await.unwrap();
        tokio::time::timeout(Duration::from_millis(200), tx.lock_keys(&keys))
            .await
            .expect("must not deadlock on its own token")
            .unwrap();
    }

    #[tokio::test]
    async fn test_notification_paging_and_mark_read() {
        let store = MemoryStore::new();
        let (me, someone_else, issue_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        let mut mine = Vec::new();
        for _ in 0..3 {
            let n = notification(me, issue_id);
            tx.insert_notification(&n).await.unwrap();
            mine.push(n);
        }
        let theirs = notification(someone_else, issue_id);
        tx.insert_notification(&theirs).await.unwrap();
        tx.commit().await.unwrap();

        let page = store
            .list_notifications(
                me,
                NotificationQuery {
                    skip: 0,
                    limit: 2,
                    unread_only: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.notifications.len(), 2);
        assert_eq!(page.total_count, 3);
        assert_eq!(page.unread_count, 3);

        // Someone else's id poisons the whole batch.
        assert_eq!(store.mark_read(me, &[mine[0].id, theirs.id]).await.unwrap(), None);
        assert_eq!(store.mark_read(me, &[mine[0].id]).await.unwrap(), Some(1));

        let unread = store
            .list_notifications(
                me,
                NotificationQuery {
                    unread_only: true,
                    ..NotificationQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(unread.total_count, 2);
        assert_eq!(unread.unread_count, 2);

        assert_eq!(store.mark_all_read(me).await.unwrap(), 2);
        assert!(!store.delete_notification(me, theirs.id).await.unwrap());
        assert!(store.delete_notification(me, mine[1].id).await.unwrap());
    }
}
