// =============================================================================
// dedup.rs — THE "SOMEBODY ALREADY REPORTED THIS POTHOLE" DETECTOR
// =============================================================================
//
// Three citizens walk past the same crater on Elm Street. Without this module
// the roads department gets three tickets, assigns three crews, and two of
// them drive around looking for a hole that has already been filled.
//
// The rule is simple and deliberately generous: two reports describe the same
// problem when they share a category, share a district, the older one is
// still active, and the distance between them is within the LARGER of the two
// radii. Either citizen's claim about how far the problem reaches is honoured.
//
// When several existing reports qualify, the nearest one wins. Equal distances
// go to the oldest report, then to the smallest id, so the answer never
// depends on what order the store happened to return rows in.
//
// This module is pure. It does not read the store, it does not lock anything.
// The orchestrator hands it candidates it already selected under the
// creation lock.
// =============================================================================

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::geo::{self, Coordinates};
use crate::models::{Category, Issue, Radius};

/// What we know about a fresh submission when looking for its twin.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub category: Category,
    pub coords: Coordinates,
    pub radius: Radius,
}

/// An existing report the new one should be merged into.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    pub issue: Issue,
    pub distance_meters: f64,
}

/// Whether two reports `distance` apart overlap given their radii.
pub fn overlaps(distance_meters: f64, a: Radius, b: Radius) -> bool {
    distance_meters <= a.max(b).as_f64()
}

/// Find the existing report `probe` duplicates, if any.
///
/// `candidates` should already be narrowed to the probe's district; category
/// and status are re-checked here so a sloppy query can never merge a
/// streetlight into a water main.
pub fn find_duplicate(probe: &Probe, candidates: &[Issue]) -> Option<DuplicateMatch> {
    let mut best: Option<(&Issue, f64)> = None;

    for candidate in candidates {
        if candidate.category != probe.category || !candidate.status.is_active() {
            continue;
        }

        let coords = match geo::parse_location(&candidate.location) {
            Ok(c) => c,
            Err(e) => {
                warn!(issue_id = %candidate.id, error = %e, "Skipping candidate with unparsable location");
                continue;
            }
        };

        let distance = geo::haversine_meters(probe.coords, coords);
        if !overlaps(distance, probe.radius, candidate.radius) {
            continue;
        }

        let better = match best {
            None => true,
            Some((current, current_distance)) => ranks_before(candidate, distance, current, current_distance),
        };
        if better {
            best = Some((candidate, distance));
        }
    }

    best.map(|(issue, distance_meters)| {
        debug!(issue_id = %issue.id, distance_m = distance_meters, "Duplicate candidate selected");
        DuplicateMatch {
            issue: issue.clone(),
            distance_meters,
        }
    })
}

/// Nearest, then oldest, then smallest id.
fn ranks_before(a: &Issue, a_distance: f64, b: &Issue, b_distance: f64) -> bool {
    let ordering = a_distance
        .total_cmp(&b_distance)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id));
    ordering == Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IssueStatus, Priority};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn issue(location: &str, radius: u32, category: Category, status: IssueStatus) -> Issue {
        let now = Utc::now();
        Issue {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            authority_id: Uuid::new_v4(),
            title: "Crater on Elm".into(),
            description: "Big enough to lose a hatchback in".into(),
            category,
            priority: Priority::MEDIUM,
            status,
            location: location.into(),
            radius: Radius::clamped(radius as i64),
            created_at: now,
            updated_at: now,
        }
    }

    fn probe(lat: f64, lon: f64, radius: u32) -> Probe {
        Probe {
            category: Category::Roads,
            coords: Coordinates::new(lat, lon),
            radius: Radius::clamped(radius as i64),
        }
    }

    #[test]
    fn test_nearby_same_category_is_a_duplicate() {
        let existing = issue("40.7128,-74.0060", 300, Category::Roads, IssueStatus::Open);
        let found = find_duplicate(&probe(40.7130, -74.0058, 200), &[existing.clone()]).unwrap();
        assert_eq!(found.issue.id, existing.id);
        assert!((20.0..=35.0).contains(&found.distance_meters));
    }

    #[test]
    fn test_larger_radius_governs() {
        // ~28 m apart. The probe claims only 50 m, but the candidate claims
        // 300 m, and either claim is enough.
        let existing = issue("40.7128,-74.0060", 300, Category::Roads, IssueStatus::Open);
        assert!(find_duplicate(&probe(40.7130, -74.0058, 50), &[existing]).is_some());

        // ~5.3 km apart with a 5 km max: no overlap.
        let far = issue("40.7128,-74.0060", 5000, Category::Roads, IssueStatus::Open);
        assert!(find_duplicate(&probe(40.7580, -73.9855, 5000), &[far]).is_none());
    }

    #[test]
    fn test_other_category_never_matches() {
        let existing = issue("40.7128,-74.0060", 5000, Category::Garbage, IssueStatus::Open);
        assert!(find_duplicate(&probe(40.7128, -74.0060, 5000), &[existing]).is_none());
    }

    #[test]
    fn test_resolved_and_closed_never_match() {
        let resolved = issue("40.7128,-74.0060", 500, Category::Roads, IssueStatus::Resolved);
        let closed = issue("40.7128,-74.0060", 500, Category::Roads, IssueStatus::Closed);
        assert!(find_duplicate(&probe(40.7128, -74.0060, 500), &[resolved, closed]).is_none());

        let in_progress = issue("40.7128,-74.0060", 500, Category::Roads, IssueStatus::InProgress);
        assert!(find_duplicate(&probe(40.7128, -74.0060, 500), &[in_progress]).is_some());
    }

    #[test]
    fn test_unparsable_locations_are_skipped() {
        let broken = issue("somewhere near the bakery", 5000, Category::Roads, IssueStatus::Open);
        let good = issue("40.7128,-74.0060", 500, Category::Roads, IssueStatus::Open);
        let found = find_duplicate(&probe(40.7128, -74.0060, 500), &[broken, good.clone()]).unwrap();
        assert_eq!(found.issue.id, good.id);
    }

    #[test]
    fn test_nearest_candidate_wins_regardless_of_order() {
        let farther = issue("40.7140,-74.0060", 1000, Category::Roads, IssueStatus::Open);
        let nearer = issue("40.7129,-74.0060", 1000, Category::Roads, IssueStatus::Open);
        let p = probe(40.7128, -74.0060, 1000);

        let a = find_duplicate(&p, &[farther.clone(), nearer.clone()]).unwrap();
        let b = find_duplicate(&p, &[nearer.clone(), farther]).unwrap();
        assert_eq!(a.issue.id, nearer.id);
        assert_eq!(b.issue.id, nearer.id);
    }

    #[test]
    fn test_equal_distance_goes_to_the_oldest() {
        let mut older = issue("40.7128,-74.0060", 500, Category::Roads, IssueStatus::Open);
        older.created_at = Utc::now() - Duration::days(3);
        let newer = issue("40.7128,-74.0060", 500, Category::Roads, IssueStatus::Open);

        let found = find_duplicate(&probe(40.7128, -74.0060, 500), &[newer, older.clone()]).unwrap();
        assert_eq!(found.issue.id, older.id);
    }
}
