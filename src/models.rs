// =============================================================================
// models.rs — THE RECORDS OF CIVIC GRIEVANCE
// =============================================================================
//
// The four things this engine ever writes down: an Issue (a citizen's
// complaint about the physical world), an Authority (the office that has to
// fix it), a Vote (a citizen saying "me too"), and a Notification (the
// engine telling somebody that something happened).
//
// Everything else, users and sessions and media, lives in somebody else's
// service. We only carry their ids around.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The fixed label set the category classifier is allowed to answer with.
/// Authorities are registered against exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Roads")]
    Roads,
    #[serde(rename = "Water Supply")]
    WaterSupply,
    #[serde(rename = "Sewerage")]
    Sewerage,
    #[serde(rename = "Electricity")]
    Electricity,
    #[serde(rename = "Garbage")]
    Garbage,
    #[serde(rename = "Street Lights")]
    StreetLights,
    #[serde(rename = "Public Transport")]
    PublicTransport,
    #[serde(rename = "Healthcare")]
    Healthcare,
    #[serde(rename = "Education")]
    Education,
    #[serde(rename = "Public Safety")]
    PublicSafety,
    #[serde(rename = "Encroachment")]
    Encroachment,
    #[serde(rename = "Environment")]
    Environment,
    #[serde(rename = "Other")]
    Other,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Roads,
        Category::WaterSupply,
        Category::Sewerage,
        Category::Electricity,
        Category::Garbage,
        Category::StreetLights,
        Category::PublicTransport,
        Category::Healthcare,
        Category::Education,
        Category::PublicSafety,
        Category::Encroachment,
        Category::Environment,
        Category::Other,
    ];

    /// The human label, which is also the value stored in the database.
    pub fn label(self) -> &'static str {
        match self {
            Category::Roads => "Roads",
            Category::WaterSupply => "Water Supply",
            Category::Sewerage => "Sewerage",
            Category::Electricity => "Electricity",
            Category::Garbage => "Garbage",
            Category::StreetLights => "Street Lights",
            Category::PublicTransport => "Public Transport",
            Category::Healthcare => "Healthcare",
            Category::Education => "Education",
            Category::PublicSafety => "Public Safety",
            Category::Encroachment => "Encroachment",
            Category::Environment => "Environment",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category label: {0}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    /// Exact label match, ignoring case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Priority tier. 1 = low, 2 = medium, 3 = high, 4 = urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Priority(u8);

impl Priority {
    pub const LOW: Priority = Priority(1);
    pub const MEDIUM: Priority = Priority(2);
    pub const HIGH: Priority = Priority(3);
    pub const URGENT: Priority = Priority(4);

    pub fn new(level: i32) -> Option<Self> {
        (1..=4).contains(&level).then_some(Priority(level as u8))
    }

    pub fn level(self) -> i32 {
        self.0 as i32
    }
}

impl TryFrom<i32> for Priority {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Priority::new(value).ok_or_else(|| format!("priority must be 1..=4, got {value}"))
    }
}

impl From<Priority> for i32 {
    fn from(p: Priority) -> i32 {
        p.level()
    }
}

/// Report radius in meters. Always within `[MIN, MAX]`; the constructor
/// functions are the only way to get one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Radius(u32);

impl Radius {
    pub const MIN: u32 = 50;
    pub const MAX: u32 = 5000;
    pub const DEFAULT: Radius = Radius(500);

    /// Accepts only values already inside the bounds. Used for explicit input.
    pub fn checked(meters: i64) -> Option<Self> {
        (Self::MIN as i64..=Self::MAX as i64)
            .contains(&meters)
            .then_some(Radius(meters as u32))
    }

    /// Forces any value into the bounds. Used for model output.
    pub fn clamped(meters: i64) -> Self {
        Radius(meters.clamp(Self::MIN as i64, Self::MAX as i64) as u32)
    }

    pub fn meters(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }
}

impl TryFrom<i64> for Radius {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Radius::checked(value)
            .ok_or_else(|| format!("radius must be {}..={} meters, got {value}", Self::MIN, Self::MAX))
    }
}

impl From<Radius> for i64 {
    fn from(r: Radius) -> i64 {
        r.0 as i64
    }
}

/// Lifecycle of a report. Only `Open` and `InProgress` take part in
/// duplicate matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i16", into = "i16")]
pub enum IssueStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl IssueStatus {
    pub fn code(self) -> i16 {
        match self {
            IssueStatus::Open => 0,
            IssueStatus::InProgress => 1,
            IssueStatus::Resolved => 2,
            IssueStatus::Closed => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(IssueStatus::Open),
            1 => Some(IssueStatus::InProgress),
            2 => Some(IssueStatus::Resolved),
            3 => Some(IssueStatus::Closed),
            _ => None,
        }
    }

    /// Whether a report in this state can still absorb duplicates.
    pub fn is_active(self) -> bool {
        matches!(self, IssueStatus::Open | IssueStatus::InProgress)
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueStatus::Open => write!(f, "open"),
            IssueStatus::InProgress => write!(f, "in progress"),
            IssueStatus::Resolved => write!(f, "resolved"),
            IssueStatus::Closed => write!(f, "closed"),
        }
    }
}

impl TryFrom<i16> for IssueStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        IssueStatus::from_code(value).ok_or_else(|| format!("status must be 0..=3, got {value}"))
    }
}

impl From<IssueStatus> for i16 {
    fn from(s: IssueStatus) -> i16 {
        s.code()
    }
}

/// A citizen-submitted report, persisted as an "issue".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    /// The reporting citizen.
    pub user_id: Uuid,
    pub authority_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub priority: Priority,
    pub status: IssueStatus,
    /// `"lat,lon"`, re-rendered from the parsed coordinates. Parsed on demand.
    pub location: String,
    pub radius: Radius,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The office responsible for one (category, district) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authority {
    pub id: Uuid,
    pub name: String,
    pub district: String,
    pub contact_email: String,
    #[serde(default)]
    pub contact_phone: Option<String>,
    pub category: Category,
    /// The user account that receives this authority's notifications.
    pub user_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: Uuid,
    pub user_id: Uuid,
    pub issue_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(user_id: Uuid, issue_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            issue_id,
            created_at: Utc::now(),
        }
    }
}

/// Who a notification is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Citizen,
    Authority,
}

impl Audience {
    pub fn is_citizen(self) -> bool {
        matches!(self, Audience::Citizen)
    }

    pub fn from_is_citizen(is_citizen: bool) -> Self {
        if is_citizen {
            Audience::Citizen
        } else {
            Audience::Authority
        }
    }
}

/// Immutable once written, except for `is_read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub is_read: bool,
    pub audience: Audience,
    pub created_at: DateTime<Utc>,
}
