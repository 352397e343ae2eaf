// =============================================================================
// intake.rs — FROM "THERE'S A HOLE IN MY STREET" TO A TRACKED ISSUE
// =============================================================================
//
// One submission, one pass through a fixed sequence of stages:
//
//   Received
//     → SpamChecked        (explicit SPAM verdict ends it here)
//     → Classified         (never fails, defaults absorb model trouble)
//     → AuthorityResolved  (nobody responsible ends it here)
//     → DuplicateChecked
//     → Merged | Created
//     → NotificationsDispatched
//
// Everything from DuplicateChecked onwards happens inside one store
// transaction that first takes the lock tokens for the report's geohash
// neighbourhood. Two citizens reporting the same flooded underpass at the
// same moment queue on those tokens; the second one sees the first one's
// report and merges into it instead of creating a twin.
//
// Any error after `begin()` drops the transaction on its way out through
// `?`, which rolls it back. The caller gets one clean outcome or one clean
// error, never half a report.
// =============================================================================

use chrono::Utc;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::{ClassificationBoundary, ClassificationResult, SpamScreen};
use crate::dedup::{self, DuplicateMatch, Probe};
use crate::error::{IntakeError, ValidationError};
use crate::geo::{self, Coordinates};
use crate::metrics::IntakeMetrics;
use crate::models::{Authority, Issue, IssueStatus, Radius};
use crate::notifier;
use crate::store::{intake_lock_key, issue_lock_key, vote_lock_key, AuthorityLookup, Store};
use crate::votes;

pub const TITLE_MIN_CHARS: usize = 5;
pub const TITLE_MAX_CHARS: usize = 255;
pub const DESCRIPTION_MIN_CHARS: usize = 10;

/// A citizen's report as it arrives.
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeRequest {
    pub title: String,
    pub description: String,
    /// `"<lat>,<lon>"`
    pub location: String,
    pub district: String,
    #[serde(default)]
    pub radius: Option<i64>,
}

/// The request after structural validation.
#[derive(Debug, Clone)]
struct ValidatedRequest {
    title: String,
    description: String,
    coords: Coordinates,
    district: String,
    radius: Option<Radius>,
}

fn validate(request: &IntakeRequest) -> Result<ValidatedRequest, ValidationError> {
    let title = request.title.trim();
    let title_chars = title.chars().count();
    if title_chars < TITLE_MIN_CHARS {
        return Err(ValidationError::TitleTooShort { min: TITLE_MIN_CHARS });
    }
    if title_chars > TITLE_MAX_CHARS {
        return Err(ValidationError::TitleTooLong { max: TITLE_MAX_CHARS });
    }

    let description = request.description.trim();
    if description.chars().count() < DESCRIPTION_MIN_CHARS {
        return Err(ValidationError::DescriptionTooShort {
            min: DESCRIPTION_MIN_CHARS,
        });
    }

    let district = request.district.trim();
    if district.is_empty() {
        return Err(ValidationError::MissingDistrict);
    }

    let coords = geo::parse_location(&request.location)?;
    if !coords.is_on_earth() {
        return Err(ValidationError::LocationOutOfRange {
            lat: coords.lat,
            lon: coords.lon,
        });
    }

    let radius = match request.radius {
        Some(r) => Some(Radius::checked(r).ok_or(ValidationError::RadiusOutOfRange(r))?),
        None => None,
    };

    Ok(ValidatedRequest {
        title: title.to_string(),
        description: description.to_string(),
        coords,
        district: district.to_string(),
        radius,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    SpamChecked,
    Classified,
    AuthorityResolved,
    DuplicateChecked,
    Merged,
    Created,
    NotificationsDispatched,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::SpamChecked => "spam_checked",
            Stage::Classified => "classified",
            Stage::AuthorityResolved => "authority_resolved",
            Stage::DuplicateChecked => "duplicate_checked",
            Stage::Merged => "merged",
            Stage::Created => "created",
            Stage::NotificationsDispatched => "notifications_dispatched",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    Created {
        issue: Issue,
        authority: Authority,
        classification: ClassificationResult,
        spam_check_degraded: bool,
    },
    Merged {
        existing_issue: Issue,
        auto_upvoted: bool,
        distance_meters: f64,
        total_votes: i64,
        classification: ClassificationResult,
        spam_check_degraded: bool,
    },
}

impl IntakeOutcome {
    pub fn issue(&self) -> &Issue {
        match self {
            IntakeOutcome::Created { issue, .. } => issue,
            IntakeOutcome::Merged { existing_issue, .. } => existing_issue,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, IntakeOutcome::Created { .. })
    }
}

pub struct IntakeOrchestrator {
    store: Arc<dyn Store>,
    boundary: Arc<ClassificationBoundary>,
    metrics: Arc<IntakeMetrics>,
    cell_precision: usize,
}

impl IntakeOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        boundary: Arc<ClassificationBoundary>,
        metrics: Arc<IntakeMetrics>,
        cell_precision: usize,
    ) -> Self {
        Self {
            store,
            boundary,
            metrics,
            cell_precision,
        }
    }

    /// Run one submission end to end.
    pub async fn submit(&self, reporter: Uuid, request: IntakeRequest) -> Result<IntakeOutcome, IntakeError> {
        self.metrics.increment_submissions();

        let result = self.run(reporter, &request).await;

        match &result {
            Ok(IntakeOutcome::Created { issue, .. }) => {
                self.metrics.increment_created();
                self.metrics.increment_notifications();
                info!(issue_id = %issue.id, category = %issue.category, title = %issue.title, "Issue created");
            }
            Ok(IntakeOutcome::Merged {
                existing_issue,
                auto_upvoted,
                distance_meters,
                ..
            }) => {
                self.metrics.increment_merged(*auto_upvoted);
                info!(
                    issue_id = %existing_issue.id,
                    distance_m = distance_meters,
                    auto_upvoted,
                    "Submission merged into existing issue"
                );
            }
            Err(IntakeError::Validation(e)) => {
                self.metrics.increment_validation_rejections();
                warn!(error = %e, "Submission rejected: invalid input");
            }
            Err(IntakeError::SpamRejected { .. }) => {
                self.metrics.increment_spam_rejections();
                warn!(title = %request.title, "Submission rejected as spam");
            }
            Err(IntakeError::NoAuthorityFound { category, district }) => {
                self.metrics.increment_no_authority();
                warn!(category = %category, district = %district, "Submission rejected: no responsible authority");
            }
            Err(IntakeError::Persistence(e)) => {
                self.metrics.increment_persistence_failures();
                error!(error = %e, "Submission failed to persist, transaction rolled back");
            }
        }

        result
    }

    async fn run(&self, reporter: Uuid, request: &IntakeRequest) -> Result<IntakeOutcome, IntakeError> {
        let req = validate(request)?;
        debug!(stage = %Stage::Received, district = %req.district, coords = %req.coords, "Submission validated");

        // ── SpamChecked ──
        let spam_check_degraded = match self.boundary.screen_spam(&req.description).await {
            SpamScreen::Spam { verdict } => return Err(IntakeError::SpamRejected { verdict }),
            SpamScreen::Clean { degraded } => degraded,
        };
        if spam_check_degraded {
            self.metrics.increment_spam_check_degraded();
        }
        debug!(stage = %Stage::SpamChecked, degraded = spam_check_degraded);

        // ── Classified ──
        let classification = self.boundary.classify(&req.description, req.radius).await;
        self.metrics.add_classifier_fallbacks(classification.fallbacks.count());
        debug!(
            stage = %Stage::Classified,
            category = %classification.category,
            priority = classification.priority.level(),
            radius_m = classification.radius.meters(),
            fallbacks = ?classification.fallbacks
        );

        // ── AuthorityResolved ──
        let authority = match self.store.find_authority(classification.category, &req.district).await {
            AuthorityLookup::Found(authority) => authority,
            AuthorityLookup::NotFound => {
                return Err(IntakeError::NoAuthorityFound {
                    category: classification.category,
                    district: req.district,
                })
            }
            AuthorityLookup::BackendError(e) => return Err(e.into()),
        };
        debug!(stage = %Stage::AuthorityResolved, authority_id = %authority.id, authority = %authority.name);

        // ── DuplicateChecked, under the neighbourhood lock ──
        let mut tx = self.store.begin().await?;
        tx.lock_keys(&self.lock_keys(&classification, &req)).await?;

        let mut candidates = tx.active_issues(classification.category, &req.district).await?;
        let candidate_count = candidates.len();
        let probe = Probe {
            category: classification.category,
            coords: req.coords,
            radius: classification.radius,
        };

        // The snapshot can go stale: a status update does not take the cell
        // tokens. Lock the chosen report, re-read it, and only merge into it
        // if it is still active. Otherwise try the next best.
        let mut duplicate = None;
        while let Some(found) = dedup::find_duplicate(&probe, &candidates) {
            let id = found.issue.id;
            tx.lock_keys(&[issue_lock_key(id), vote_lock_key(id, reporter)]).await?;
            match tx.issue_by_id(id).await? {
                Some(fresh) if fresh.status.is_active() => {
                    duplicate = Some(DuplicateMatch { issue: fresh, ..found });
                    break;
                }
                fresh => {
                    debug!(
                        issue_id = %id,
                        status = ?fresh.map(|i| i.status),
                        "Duplicate candidate closed under us, skipping"
                    );
                    candidates.retain(|c| c.id != id);
                }
            }
        }
        debug!(
            stage = %Stage::DuplicateChecked,
            candidates = candidate_count,
            duplicate = duplicate.is_some()
        );

        // ── Merged ──
        if let Some(found) = duplicate {
            let vote = votes::cast_vote(tx.as_mut(), found.issue.id, reporter).await?;
            tx.commit().await?;
            debug!(stage = %Stage::Merged, issue_id = %found.issue.id, vote_added = vote.added);

            return Ok(IntakeOutcome::Merged {
                existing_issue: found.issue,
                auto_upvoted: vote.added,
                distance_meters: found.distance_meters,
                total_votes: vote.total_votes,
                classification,
                spam_check_degraded,
            });
        }

        // ── Created ──
        let now = Utc::now();
        let issue = Issue {
            id: Uuid::new_v4(),
            user_id: reporter,
            authority_id: authority.id,
            title: req.title,
            description: req.description,
            category: classification.category,
            priority: classification.priority,
            status: IssueStatus::Open,
            location: req.coords.to_location_string(),
            radius: classification.radius,
            created_at: now,
            updated_at: now,
        };
        tx.insert_issue(&issue).await?;
        debug!(stage = %Stage::Created, issue_id = %issue.id);

        // ── NotificationsDispatched ──
        notifier::dispatch(tx.as_mut(), &notifier::authority_notice(&issue, &authority)).await?;
        tx.commit().await?;
        debug!(stage = %Stage::NotificationsDispatched, issue_id = %issue.id);

        Ok(IntakeOutcome::Created {
            issue,
            authority,
            classification,
            spam_check_degraded,
        })
    }

    /// Sorted tokens for every cell a conflicting report could occupy.
    fn lock_keys(&self, classification: &ClassificationResult, req: &ValidatedRequest) -> Vec<String> {
        let cells = geo::cell_neighbourhood(req.coords, self.cell_precision);
        let mut keys: Vec<String> = if cells.is_empty() {
            // No full ring of cells (off the planet or near a pole): lock the
            // whole district instead.
            vec![intake_lock_key(classification.category, &req.district, "*")]
        } else {
            cells
                .iter()
                .map(|cell| intake_lock_key(classification.category, &req.district, cell))
                .collect()
        };
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> IntakeRequest {
        IntakeRequest {
            title: "Crater on Elm".into(),
            description: "A pothole big enough to lose a bike in".into(),
            location: "40.7128,-74.0060".into(),
            district: "Downtown".into(),
            radius: None,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        let v = validate(&request()).unwrap();
        assert_eq!(v.district, "Downtown");
        assert!(v.radius.is_none());
    }

    #[test]
    fn test_title_and_description_bounds() {
        let mut r = request();
        r.title = " abc ".into();
        assert_eq!(validate(&r).unwrap_err(), ValidationError::TitleTooShort { min: 5 });

        let mut r = request();
        r.title = "x".repeat(256);
        assert_eq!(validate(&r).unwrap_err(), ValidationError::TitleTooLong { max: 255 });

        let mut r = request();
        r.description = "too short".into();
        assert_eq!(validate(&r).unwrap_err(), ValidationError::DescriptionTooShort { min: 10 });
    }

    #[test]
    fn test_location_must_parse_and_be_on_earth() {
        let mut r = request();
        r.location = "somewhere".into();
        assert!(matches!(validate(&r), Err(ValidationError::InvalidLocationFormat(_))));

        r.location = "200,10".into();
        assert!(matches!(validate(&r), Err(ValidationError::LocationOutOfRange { .. })));
    }

    #[test]
    fn test_explicit_radius_is_bounded() {
        let mut r = request();
        r.radius = Some(49);
        assert_eq!(validate(&r).unwrap_err(), ValidationError::RadiusOutOfRange(49));

        r.radius = Some(5000);
        assert_eq!(validate(&r).unwrap().radius.map(Radius::meters), Some(5000));
    }

    #[test]
    fn test_missing_district() {
        let mut r = request();
        r.district = "   ".into();
        assert_eq!(validate(&r).unwrap_err(), ValidationError::MissingDistrict);
    }
}
