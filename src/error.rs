// =============================================================================
// error.rs — EVERY WAY A COMPLAINT CAN GO WRONG
// =============================================================================
//
// Only four things ever reach a citizen from the intake pipeline: their input
// was malformed, it looked like spam, nobody is responsible for that kind of
// problem in that district, or the database fell over. Classifier trouble is
// deliberately absent from `IntakeError`; it is absorbed into defaults.
// =============================================================================

use std::time::Duration;

use thiserror::Error;

use crate::models::Category;

/// Structural problems with a submission. Nothing is written when these fire.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("location must be \"<lat>,<lon>\", got {0:?}")]
    InvalidLocationFormat(String),

    #[error("location {lat},{lon} is not on Earth (lat must be within ±90, lon within ±180)")]
    LocationOutOfRange { lat: f64, lon: f64 },

    #[error("title must be at least {min} characters")]
    TitleTooShort { min: usize },

    #[error("title must be at most {max} characters")]
    TitleTooLong { max: usize },

    #[error("description must be at least {min} characters")]
    DescriptionTooShort { min: usize },

    #[error("district is required")]
    MissingDistrict,

    #[error("radius must be between 50 and 5000 meters, got {0}")]
    RadiusOutOfRange(i64),
}

/// Anything the backing store can throw.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("uniqueness conflict in {table}: {detail}")]
    Conflict { table: &'static str, detail: String },
}

/// Failures inside the text-classification boundary. Never surfaced to
/// citizens; the boundary turns every one of these into a default.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("classifier returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("classifier returned an empty completion")]
    EmptyCompletion,

    #[error("classifier did not answer within {0:?}")]
    Timeout(Duration),

    #[error("classifier circuit breaker is open")]
    CircuitOpen,

    #[error("classifier endpoint {0:?} is not an http(s) URL")]
    InvalidEndpoint(String),
}

/// Terminal outcomes of the intake pipeline.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("report rejected as spam")]
    SpamRejected { verdict: String },

    #[error("no authority handles {category} in district {district:?}")]
    NoAuthorityFound { category: Category, district: String },

    #[error("could not persist report: {0}")]
    Persistence(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum VoteError {
    #[error("issue not found")]
    IssueNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("issue not found")]
    IssueNotFound,

    #[error("not authorized to update this issue")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("one or more notifications not found or don't belong to you")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}
