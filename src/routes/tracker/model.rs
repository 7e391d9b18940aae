use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::domain::models::TrackerType;
use crate::utils::Pagination;

pub const LOCATION_HISTORY_PAGE_SIZE: i64 = 50;

const TRACKER_SELECT: &str = "SELECT tt.id, tt.tool_id, t.name AS tool_name, tt.tracker_type, \
     tt.tracker_identifier, tt.tracker_name, tt.last_latitude, tt.last_longitude, \
     tt.last_accuracy, tt.last_seen, tt.is_active, tt.created_at \
     FROM tool_trackers tt INNER JOIN tools t ON t.id = tt.tool_id";

#[derive(Debug, Clone, FromRow)]
pub struct Tracker {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub tool_name: String,
    pub tracker_type: TrackerType,
    pub tracker_identifier: String,
    pub tracker_name: Option<String>,
    pub last_latitude: Option<f64>,
    pub last_longitude: Option<f64>,
    pub last_accuracy: Option<f64>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerResponse {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub tool_name: String,
    pub tracker_type: TrackerType,
    pub tracker_identifier: String,
    pub tracker_name: Option<String>,
    pub location: Option<Location>,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LocationPing {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachTrackerRequest {
    pub tracker_type: Option<String>,
    pub tracker_identifier: Option<String>,
    pub tracker_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LocationReport {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct LocationUpdated {
    pub message: &'static str,
    pub location: Location,
}

impl From<Tracker> for TrackerResponse {
    fn from(t: Tracker) -> Self {
        let location = match (t.last_latitude, t.last_longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
                accuracy: t.last_accuracy,
            }),
            _ => None,
        };
        TrackerResponse {
            id: t.id,
            tool_id: t.tool_id,
            tool_name: t.tool_name,
            tracker_type: t.tracker_type,
            tracker_identifier: t.tracker_identifier,
            tracker_name: t.tracker_name,
            location,
            last_seen: t.last_seen,
            is_active: t.is_active,
            created_at: t.created_at,
        }
    }
}

impl Tracker {
    /// Active trackers on tools `owner` owns, most recently seen first.
    pub async fn list_for_owner(pool: &PgPool, owner: Uuid) -> Result<Vec<Tracker>, sqlx::Error> {
        sqlx::query_as::<_, Tracker>(&format!(
            "{TRACKER_SELECT} INNER JOIN toolboxes tb ON tb.id = t.toolbox_id \
             WHERE tb.user_id = $1 AND tt.is_active = true \
             ORDER BY tt.last_seen DESC NULLS LAST"
        ))
        .bind(owner)
        .fetch_all(pool)
        .await
    }

    pub async fn for_tool(
        pool: &PgPool,
        tool_id: Uuid,
        active_only: bool,
    ) -> Result<Option<Tracker>, sqlx::Error> {
        sqlx::query_as::<_, Tracker>(&format!(
            "{TRACKER_SELECT} WHERE tt.tool_id = $1 AND (tt.is_active OR NOT $2)"
        ))
        .bind(tool_id)
        .bind(active_only)
        .fetch_optional(pool)
        .await
    }

    pub async fn attach(
        pool: &PgPool,
        tool_id: Uuid,
        tracker_type: TrackerType,
        identifier: &str,
        name: Option<String>,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO tool_trackers (tool_id, tracker_type, tracker_identifier, tracker_name) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(tool_id)
        .bind(tracker_type)
        .bind(identifier)
        .bind(name)
        .fetch_one(pool)
        .await
    }

    pub async fn detach(pool: &PgPool, tool_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tool_trackers WHERE tool_id = $1")
            .bind(tool_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Moves the last-known fix and appends to the history in one transaction.
    pub async fn record(&self, pool: &PgPool, location: Location) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            "UPDATE tool_trackers \
             SET last_latitude = $1, last_longitude = $2, last_accuracy = $3, \
                 last_seen = now(), updated_at = now() \
             WHERE id = $4",
        )
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.accuracy)
        .bind(self.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO location_history (tracker_id, latitude, longitude, accuracy) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(self.id)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.accuracy)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    pub async fn history(
        &self,
        pool: &PgPool,
        page: Pagination,
    ) -> Result<(Vec<LocationPing>, i64), sqlx::Error> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM location_history WHERE tracker_id = $1")
                .bind(self.id)
                .fetch_one(pool)
                .await?;

        let pings = sqlx::query_as::<_, LocationPing>(
            "SELECT latitude, longitude, accuracy, recorded_at FROM location_history \
             WHERE tracker_id = $1 ORDER BY recorded_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(self.id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok((pings, total))
    }
}
