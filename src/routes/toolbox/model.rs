use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::domain::models::{PermissionLevel, Visibility};
use crate::utils::{Pagination, PatchBuilder, nullable};

const TOOLBOX_SELECT: &str = "SELECT tb.id, tb.user_id, tb.name, tb.description, tb.visibility, \
     tb.icon, tb.color, tb.created_at, tb.updated_at, \
     (SELECT COUNT(*) FROM tools t WHERE t.toolbox_id = tb.id) AS tool_count \
     FROM toolboxes tb";

/// Mirrors the access evaluator's view rule: owner, public, any grant, or
/// buddies visibility with a buddy edge. `$2` is the (nullable) viewer.
const VIEWABLE_FILTER: &str = "tb.user_id = $1 AND ( \
       tb.user_id = $2 \
       OR tb.visibility = 'public' \
       OR EXISTS (SELECT 1 FROM toolbox_permissions tp \
                  WHERE tp.toolbox_id = tb.id AND tp.user_id = $2) \
       OR (tb.visibility = 'buddies' AND EXISTS (SELECT 1 FROM buddies b \
                  WHERE b.user_id = $2 AND b.buddy_id = tb.user_id)))";

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Toolbox {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub tool_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateToolboxRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolboxPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    /// Unknown values are dropped from the patch.
    pub visibility: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub icon: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub color: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub user_id: Option<String>,
    pub permission_level: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub toolbox_id: Uuid,
    pub user_id: Uuid,
    pub permission_level: PermissionLevel,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl ToolboxPatch {
    pub fn apply<'a>(self, patch: &mut PatchBuilder<'a>) {
        patch
            .set_if("name", self.name.map(|n| n.trim().to_string()))
            .set_if("description", self.description)
            .set_if(
                "visibility",
                self.visibility.as_deref().and_then(Visibility::parse),
            )
            .set_if("icon", self.icon)
            .set_if("color", self.color);
    }
}

impl Toolbox {
    pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Toolbox>, sqlx::Error> {
        sqlx::query_as::<_, Toolbox>(&format!("{TOOLBOX_SELECT} WHERE tb.id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_for_owner(
        pool: &PgPool,
        owner: Uuid,
        page: Pagination,
    ) -> Result<(Vec<Toolbox>, i64), sqlx::Error> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM toolboxes WHERE user_id = $1")
            .bind(owner)
            .fetch_one(pool)
            .await?;

        let rows = sqlx::query_as::<_, Toolbox>(&format!(
            "{TOOLBOX_SELECT} WHERE tb.user_id = $1 \
             ORDER BY tb.created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(owner)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok((rows, total))
    }

    /// `owner`'s toolboxes that `viewer` is allowed to see.
    pub async fn list_viewable(
        pool: &PgPool,
        owner: Uuid,
        viewer: Option<Uuid>,
        page: Pagination,
    ) -> Result<(Vec<Toolbox>, i64), sqlx::Error> {
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM toolboxes tb WHERE {VIEWABLE_FILTER}"
        ))
        .bind(owner)
        .bind(viewer)
        .fetch_one(pool)
        .await?;

        let rows = sqlx::query_as::<_, Toolbox>(&format!(
            "{TOOLBOX_SELECT} WHERE {VIEWABLE_FILTER} \
             ORDER BY tb.created_at DESC LIMIT $3 OFFSET $4"
        ))
        .bind(owner)
        .bind(viewer)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok((rows, total))
    }

    pub async fn create(
        pool: &PgPool,
        owner: Uuid,
        name: String,
        visibility: Visibility,
        req: CreateToolboxRequest,
    ) -> Result<Toolbox, sqlx::Error> {
        sqlx::query_as::<_, Toolbox>(
            "INSERT INTO toolboxes (user_id, name, description, visibility, icon, color) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, user_id, name, description, visibility, icon, color, \
                       0::BIGINT AS tool_count, created_at, updated_at",
        )
        .bind(owner)
        .bind(name)
        .bind(req.description)
        .bind(visibility)
        .bind(req.icon)
        .bind(req.color)
        .fetch_one(pool)
        .await
    }

    pub async fn update(pool: &PgPool, id: Uuid, patch: PatchBuilder<'_>) -> Result<(), sqlx::Error> {
        patch.finish(id).build().execute(pool).await?;
        Ok(())
    }

    /// Deletes the toolbox and its tools unless one of them is out on loan.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let done = sqlx::query(
            "DELETE FROM toolboxes tb WHERE tb.id = $1 AND NOT EXISTS ( \
                 SELECT 1 FROM tools t \
                 INNER JOIN lending_history lh ON lh.tool_id = t.id AND lh.returned_at IS NULL \
                 WHERE t.toolbox_id = tb.id)",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }
}

#[derive(Debug)]
pub enum GrantOutcome {
    Created(Grant),
    Changed(Grant),
    Unchanged,
}

impl Grant {
    pub async fn list(pool: &PgPool, toolbox_id: Uuid) -> Result<Vec<Grant>, sqlx::Error> {
        sqlx::query_as::<_, Grant>(
            "SELECT tp.toolbox_id, tp.user_id, tp.permission_level, tp.created_at, \
                    u.username, u.display_name, u.avatar_url \
             FROM toolbox_permissions tp \
             INNER JOIN users u ON u.id = tp.user_id \
             WHERE tp.toolbox_id = $1 \
             ORDER BY tp.created_at",
        )
        .bind(toolbox_id)
        .fetch_all(pool)
        .await
    }

    /// Inserts the grant or changes its level. An existing grant at the same
    /// level is left untouched and reported as `Unchanged`.
    pub async fn upsert(
        pool: &PgPool,
        toolbox_id: Uuid,
        user_id: Uuid,
        level: PermissionLevel,
    ) -> Result<GrantOutcome, sqlx::Error> {
        let inserted: Option<bool> = sqlx::query_scalar(
            "INSERT INTO toolbox_permissions (toolbox_id, user_id, permission_level) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (toolbox_id, user_id) \
             DO UPDATE SET permission_level = EXCLUDED.permission_level \
             WHERE toolbox_permissions.permission_level <> EXCLUDED.permission_level \
             RETURNING (xmax = 0)",
        )
        .bind(toolbox_id)
        .bind(user_id)
        .bind(level)
        .fetch_optional(pool)
        .await?;
        let Some(inserted) = inserted else {
            return Ok(GrantOutcome::Unchanged);
        };

        let grant = sqlx::query_as::<_, Grant>(
            "SELECT tp.toolbox_id, tp.user_id, tp.permission_level, tp.created_at, \
                    u.username, u.display_name, u.avatar_url \
             FROM toolbox_permissions tp \
             INNER JOIN users u ON u.id = tp.user_id \
             WHERE tp.toolbox_id = $1 AND tp.user_id = $2",
        )
        .bind(toolbox_id)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        Ok(if inserted {
            GrantOutcome::Created(grant)
        } else {
            GrantOutcome::Changed(grant)
        })
    }

    pub async fn revoke(pool: &PgPool, toolbox_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM toolbox_permissions WHERE toolbox_id = $1 AND user_id = $2")
                .bind(toolbox_id)
                .bind(user_id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
