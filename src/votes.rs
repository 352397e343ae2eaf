// =============================================================================
// votes.rs — "ME TOO", AT MOST ONCE
// =============================================================================
//
// A vote is a citizen saying a report matters to them. The only rule that
// matters: one citizen, one report, one vote. It holds whether the vote came
// from the citizen pressing a button or from the intake pipeline merging
// their duplicate report, because both paths go through `cast_vote`.
// =============================================================================

use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{StoreError, VoteError};
use crate::models::Vote;
use crate::store::{vote_lock_key, Store, StoreTx};

/// What a vote attempt did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteOutcome {
    /// The citizen's vote, freshly written or pre-existing.
    pub vote: Vote,
    /// Whether this call wrote the row.
    pub added: bool,
    pub total_votes: i64,
}

/// Idempotent vote inside an open transaction.
///
/// Takes the `vote:` token for the pair first, so a concurrent auto-upvote
/// and button press for the same citizen serialize instead of racing the
/// unique index. Callers that read the issue row take the token before that
/// read, since Postgres locks the row `FOR UPDATE`.
pub async fn cast_vote(tx: &mut dyn StoreTx, issue_id: Uuid, user_id: Uuid) -> Result<VoteOutcome, StoreError> {
    tx.lock_keys(&[vote_lock_key(issue_id, user_id)]).await?;

    let (vote, added) = match tx.find_vote(issue_id, user_id).await? {
        Some(existing) => (existing, false),
        None => {
            let vote = Vote::new(user_id, issue_id);
            let added = tx.insert_vote(&vote).await?;
            if added {
                (vote, true)
            } else {
                // Lost a race we should not be able to lose under the token;
                // report the row that won.
                let winner = tx.find_vote(issue_id, user_id).await?.ok_or_else(|| StoreError::Corrupt {
                    table: "votes",
                    detail: format!("vote for ({user_id}, {issue_id}) neither insertable nor present"),
                })?;
                (winner, false)
            }
        }
    };

    let total_votes = tx.count_votes(issue_id).await?;
    Ok(VoteOutcome {
        vote,
        added,
        total_votes,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteTally {
    pub issue_id: Uuid,
    pub total_votes: i64,
    pub user_has_voted: bool,
    pub user_vote_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnvoteOutcome {
    pub removed: bool,
    pub total_votes: i64,
}

/// Explicit votes from the API.
pub struct VoteService {
    store: Arc<dyn Store>,
}

impl VoteService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn vote(&self, issue_id: Uuid, user_id: Uuid) -> Result<VoteOutcome, VoteError> {
        let mut tx = self.store.begin().await?;
        // Token before the row lock, same order as the intake merge path.
        tx.lock_keys(&[vote_lock_key(issue_id, user_id)]).await?;
        if tx.issue_by_id(issue_id).await?.is_none() {
            return Err(VoteError::IssueNotFound);
        }

        let outcome = cast_vote(tx.as_mut(), issue_id, user_id).await?;
        tx.commit().await?;

        if outcome.added {
            info!(issue_id = %issue_id, total_votes = outcome.total_votes, "Vote added");
        }
        Ok(outcome)
    }

    /// Removing a vote that is not there is a no-op, not an error.
    pub async fn unvote(&self, issue_id: Uuid, user_id: Uuid) -> Result<UnvoteOutcome, VoteError> {
        let mut tx = self.store.begin().await?;
        tx.lock_keys(&[vote_lock_key(issue_id, user_id)]).await?;
        if tx.issue_by_id(issue_id).await?.is_none() {
            return Err(VoteError::IssueNotFound);
        }

        let removed = tx.delete_vote(issue_id, user_id).await?;
        let total_votes = tx.count_votes(issue_id).await?;
        tx.commit().await?;

        Ok(UnvoteOutcome { removed, total_votes })
    }

    pub async fn tally(&self, issue_id: Uuid, user_id: Uuid) -> Result<VoteTally, VoteError> {
        if self.store.get_issue(issue_id).await?.is_none() {
            return Err(VoteError::IssueNotFound);
        }

        let total_votes = self.store.vote_count(issue_id).await?;
        let mine = self.store.user_vote(issue_id, user_id).await?;
        Ok(VoteTally {
            issue_id,
            total_votes,
            user_has_voted: mine.is_some(),
            user_vote_id: mine.map(|v| v.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cast_vote_is_idempotent() {
        let store = MemoryStore::new();
        let (issue_id, user_id) = (Uuid::new_v4(), Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        let first = cast_vote(tx.as_mut(), issue_id, user_id).await.unwrap();
        let second = cast_vote(tx.as_mut(), issue_id, user_id).await.unwrap();
        tx.commit().await.unwrap();

        assert!(first.added);
        assert!(!second.added);
        assert_eq!(first.vote.id, second.vote.id);
        assert_eq!(second.total_votes, 1);
        assert_eq!(store.votes().len(), 1);
    }

    #[tokio::test]
    async fn test_vote_token_is_taken_before_the_issue_is_read() {
        let store = Arc::new(MemoryStore::new());
        let (issue_id, user_id) = (Uuid::new_v4(), Uuid::new_v4());

        let mut holder = store.begin().await.unwrap();
        holder.lock_keys(&[vote_lock_key(issue_id, user_id)]).await.unwrap();

        let service = VoteService::new(store.clone());
        let vote = tokio::spawn(async move { service.vote(issue_id, user_id).await });
        let service = VoteService::new(store.clone());
        let unvote = tokio::spawn(async move { service.unvote(issue_id, user_id).await });

        // Both would fail fast on the missing issue if they read it first.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!vote.is_finished());
        assert!(!unvote.is_finished());

        drop(holder);
        assert!(matches!(vote.await.unwrap(), Err(VoteError::IssueNotFound)));
        assert!(matches!(unvote.await.unwrap(), Err(VoteError::IssueNotFound)));
    }

    #[tokio::test]
    async fn test_vote_on_missing_issue() {
        let service = VoteService::new(Arc::new(MemoryStore::new()));
        let result = service.vote(Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(matches!(result, Err(VoteError::IssueNotFound)));
    }
}
