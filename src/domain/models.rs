use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "visibility_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Buddies,
    Public,
}

impl Visibility {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "private" => Some(Visibility::Private),
            "buddies" => Some(Visibility::Buddies),
            "public" => Some(Visibility::Public),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "permission_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    View,
    Borrow,
}

impl PermissionLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "view" => Some(PermissionLevel::View),
            "borrow" => Some(PermissionLevel::Borrow),
            _ => None,
        }
    }
}

/// `Cancelled` is a valid stored value but no transition produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lending_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LendingStatus {
    Pending,
    Active,
    Denied,
    Returned,
    Cancelled,
}

impl LendingStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(LendingStatus::Pending),
            "active" => Some(LendingStatus::Active),
            "denied" => Some(LendingStatus::Denied),
            "returned" => Some(LendingStatus::Returned),
            "cancelled" => Some(LendingStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, LendingStatus::Pending | LendingStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "buddy_request_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BuddyRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "tracker_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TrackerType {
    Airtag,
    Tile,
    GpsCellular,
    GpsSatellite,
    Other,
}

impl TrackerType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "airtag" => Some(TrackerType::Airtag),
            "tile" => Some(TrackerType::Tile),
            "gps_cellular" => Some(TrackerType::GpsCellular),
            "gps_satellite" => Some(TrackerType::GpsSatellite),
            "other" => Some(TrackerType::Other),
            _ => None,
        }
    }
}

/// Which side of a two-party request the caller is asking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDirection {
    Incoming,
    Outgoing,
}

/// The slice of a toolbox the access evaluator needs.
#[derive(Debug, Clone, FromRow)]
pub struct ToolboxAccess {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, FromRow)]
pub struct ToolRef {
    pub id: Uuid,
    pub toolbox_id: Uuid,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LendingRequest {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub requester_id: Uuid,
    pub owner_id: Uuid,
    pub status: LendingStatus,
    pub message: Option<String>,
    pub response_message: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewLendingRequest {
    pub tool_id: Uuid,
    pub requester_id: Uuid,
    pub owner_id: Uuid,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LendingHistory {
    pub id: Uuid,
    /// Cleared when the tool is deleted; the row itself is kept.
    pub tool_id: Option<Uuid>,
    /// Tool name at the time the loan opened.
    pub tool_name: String,
    pub borrower_id: Uuid,
    pub owner_id: Uuid,
    pub lending_request_id: Option<Uuid>,
    pub borrowed_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BuddyRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub target_id: Uuid,
    pub status: BuddyRequestStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LendingRequestView {
    pub id: Uuid,
    pub status: LendingStatus,
    pub message: Option<String>,
    pub response_message: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub tool: ToolSummary,
    pub requester: UserSummary,
    pub owner: UserSummary,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LendingHistoryView {
    pub id: Uuid,
    pub tool_id: Option<Uuid>,
    pub tool_name: String,
    pub lending_request_id: Option<Uuid>,
    pub borrower_id: Uuid,
    pub borrower_username: String,
    pub owner_id: Uuid,
    pub owner_username: String,
    pub borrowed_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuddyRequestView {
    pub id: Uuid,
    pub status: BuddyRequestStatus,
    pub created_at: DateTime<Utc>,
    /// The other party: the requester for incoming, the target for outgoing.
    pub user: UserSummary,
}
