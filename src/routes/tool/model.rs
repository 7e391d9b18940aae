use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::config::Config;
use crate::utils::{Pagination, PatchBuilder, nullable};

pub const MAX_IMAGES: i64 = 3;

const TOOL_COLUMNS: &str = "id, toolbox_id, name, description, category, brand, model, \
     serial_number, purchase_date, purchase_price, notes, is_available, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct Tool {
    pub id: Uuid,
    pub toolbox_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub purchase_price: Option<Decimal>,
    pub notes: Option<String>,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ToolImage {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub object_key: String,
    pub order_index: i16,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub id: Uuid,
    pub url: String,
    pub order_index: i16,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub id: Uuid,
    pub toolbox_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub purchase_price: Option<Decimal>,
    pub notes: Option<String>,
    pub is_available: bool,
    pub images: Vec<ImageResponse>,
    pub has_tracker: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateToolRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    pub purchase_price: Option<Decimal>,
    pub notes: Option<String>,
}

/// Fields an owner may change. Availability is deliberately absent: only
/// lending transitions write it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub brand: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub model: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub serial_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub purchase_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "nullable")]
    pub purchase_price: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "nullable")]
    pub notes: Option<Option<String>>,
    pub toolbox_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddImageRequest {
    pub key: Option<String>,
    pub order_index: Option<i64>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SharedTool {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub borrower_username: String,
    pub borrowed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BorrowedTool {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_username: String,
    pub borrowed_at: DateTime<Utc>,
    pub lending_request_id: Option<Uuid>,
}

/// Public URL of an uploaded object; the bare key when no bucket URL is set.
pub fn image_url(config: &Config, key: &str) -> String {
    match config.image_public_url.as_deref() {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
        None => key.to_string(),
    }
}

/// Slot for a new image: the requested one (clamped to the last slot) when
/// it is free, otherwise the lowest free slot. `None` once every slot is used.
pub fn next_order_index(requested: Option<i64>, existing: &[ToolImage]) -> Option<i16> {
    let taken = |slot: i64| existing.iter().any(|img| i64::from(img.order_index) == slot);

    let requested = requested
        .filter(|i| *i >= 0)
        .map(|i| i.min(MAX_IMAGES - 1))
        .filter(|slot| !taken(*slot));

    requested
        .or_else(|| (0..MAX_IMAGES).find(|slot| !taken(*slot)))
        .map(|slot| slot as i16)
}

impl ToolPatch {
    pub fn apply<'a>(self, patch: &mut PatchBuilder<'a>, toolbox_id: Option<Uuid>) {
        patch
            .set_if("name", self.name.map(|n| n.trim().to_string()))
            .set_if("description", self.description)
            .set_if("category", self.category)
            .set_if("brand", self.brand)
            .set_if("model", self.model)
            .set_if("serial_number", self.serial_number)
            .set_if("purchase_date", self.purchase_date)
            .set_if("purchase_price", self.purchase_price)
            .set_if("notes", self.notes)
            .set_if("toolbox_id", toolbox_id);
    }
}

impl Tool {
    pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Tool>, sqlx::Error> {
        sqlx::query_as::<_, Tool>(&format!("SELECT {TOOL_COLUMNS} FROM tools WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn create(
        pool: &PgPool,
        toolbox_id: Uuid,
        name: String,
        req: CreateToolRequest,
    ) -> Result<Tool, sqlx::Error> {
        sqlx::query_as::<_, Tool>(&format!(
            "INSERT INTO tools (toolbox_id, name, description, category, brand, model, \
             serial_number, purchase_date, purchase_price, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {TOOL_COLUMNS}"
        ))
        .bind(toolbox_id)
        .bind(name)
        .bind(req.description)
        .bind(req.category)
        .bind(req.brand)
        .bind(req.model)
        .bind(req.serial_number)
        .bind(req.purchase_date)
        .bind(req.purchase_price)
        .bind(req.notes)
        .fetch_one(pool)
        .await
    }

    pub async fn list_in_toolbox(
        pool: &PgPool,
        toolbox_id: Uuid,
        page: Pagination,
    ) -> Result<(Vec<Tool>, i64), sqlx::Error> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tools WHERE toolbox_id = $1")
            .bind(toolbox_id)
            .fetch_one(pool)
            .await?;

        let tools = sqlx::query_as::<_, Tool>(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools WHERE toolbox_id = $1 \
             ORDER BY name LIMIT $2 OFFSET $3"
        ))
        .bind(toolbox_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok((tools, total))
    }

    pub async fn update(pool: &PgPool, id: Uuid, patch: PatchBuilder<'_>) -> Result<Tool, sqlx::Error> {
        let mut query = patch.finish(id);
        query.push(format!(" RETURNING {TOOL_COLUMNS}"));
        query.build_query_as::<Tool>().fetch_one(pool).await
    }

    /// Deletes the tool unless it is out on loan. Returns false when a loan
    /// is still open.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let done = sqlx::query(
            "DELETE FROM tools t WHERE t.id = $1 AND NOT EXISTS ( \
                 SELECT 1 FROM lending_history lh \
                 WHERE lh.tool_id = t.id AND lh.returned_at IS NULL)",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Attaches images and the tracker flag in two batched queries.
    pub async fn into_responses(
        tools: Vec<Tool>,
        pool: &PgPool,
        config: &Config,
    ) -> Result<Vec<ToolResponse>, sqlx::Error> {
        let ids: Vec<Uuid> = tools.iter().map(|t| t.id).collect();

        let mut images: HashMap<Uuid, Vec<ImageResponse>> = HashMap::new();
        for img in ToolImage::for_tools(pool, &ids).await? {
            images.entry(img.tool_id).or_default().push(ImageResponse {
                id: img.id,
                url: image_url(config, &img.object_key),
                order_index: img.order_index,
            });
        }

        let tracked: HashSet<Uuid> = sqlx::query_scalar::<_, Uuid>(
            "SELECT tool_id FROM tool_trackers WHERE tool_id = ANY($1) AND is_active = true",
        )
        .bind(&ids)
        .fetch_all(pool)
        .await?
        .into_iter()
        .collect();

        Ok(tools
            .into_iter()
            .map(|t| {
                let has_tracker = tracked.contains(&t.id);
                let images = images.remove(&t.id).unwrap_or_default();
                t.into_response(images, has_tracker)
            })
            .collect())
    }

    pub async fn into_response_one(
        self,
        pool: &PgPool,
        config: &Config,
    ) -> Result<ToolResponse, sqlx::Error> {
        let mut all = Tool::into_responses(vec![self], pool, config).await?;
        all.pop().ok_or(sqlx::Error::RowNotFound)
    }

    pub fn into_response(self, images: Vec<ImageResponse>, has_tracker: bool) -> ToolResponse {
        ToolResponse {
            id: self.id,
            toolbox_id: self.toolbox_id,
            name: self.name,
            description: self.description,
            category: self.category,
            brand: self.brand,
            model: self.model,
            serial_number: self.serial_number,
            purchase_date: self.purchase_date,
            purchase_price: self.purchase_price,
            notes: self.notes,
            is_available: self.is_available,
            images,
            has_tracker,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Tools owned by `owner` that are currently out on loan.
    pub async fn shared_by(pool: &PgPool, owner: Uuid) -> Result<Vec<SharedTool>, sqlx::Error> {
        sqlx::query_as::<_, SharedTool>(
            "SELECT t.id, t.name, t.description, u.username AS borrower_username, lh.borrowed_at \
             FROM tools t \
             INNER JOIN toolboxes tb ON tb.id = t.toolbox_id \
             INNER JOIN lending_history lh ON lh.tool_id = t.id AND lh.returned_at IS NULL \
             INNER JOIN users u ON u.id = lh.borrower_id \
             WHERE tb.user_id = $1 \
             ORDER BY lh.borrowed_at DESC",
        )
        .bind(owner)
        .fetch_all(pool)
        .await
    }

    /// Tools `borrower` currently holds.
    pub async fn borrowed_by(pool: &PgPool, borrower: Uuid) -> Result<Vec<BorrowedTool>, sqlx::Error> {
        sqlx::query_as::<_, BorrowedTool>(
            "SELECT t.id, t.name, t.description, u.username AS owner_username, lh.borrowed_at, \
                    lh.lending_request_id \
             FROM lending_history lh \
             INNER JOIN tools t ON t.id = lh.tool_id \
             INNER JOIN users u ON u.id = lh.owner_id \
             WHERE lh.borrower_id = $1 AND lh.returned_at IS NULL \
             ORDER BY lh.borrowed_at DESC",
        )
        .bind(borrower)
        .fetch_all(pool)
        .await
    }
}

impl ToolImage {
    pub async fn for_tools(pool: &PgPool, tool_ids: &[Uuid]) -> Result<Vec<ToolImage>, sqlx::Error> {
        sqlx::query_as::<_, ToolImage>(
            "SELECT id, tool_id, object_key, order_index, created_at FROM tool_images \
             WHERE tool_id = ANY($1) ORDER BY tool_id, order_index",
        )
        .bind(tool_ids)
        .fetch_all(pool)
        .await
    }

    pub async fn find(pool: &PgPool, tool_id: Uuid, id: Uuid) -> Result<Option<ToolImage>, sqlx::Error> {
        sqlx::query_as::<_, ToolImage>(
            "SELECT id, tool_id, object_key, order_index, created_at FROM tool_images \
             WHERE id = $1 AND tool_id = $2",
        )
        .bind(id)
        .bind(tool_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn insert(
        pool: &PgPool,
        tool_id: Uuid,
        key: &str,
        order_index: i16,
    ) -> Result<ToolImage, sqlx::Error> {
        sqlx::query_as::<_, ToolImage>(
            "INSERT INTO tool_images (tool_id, object_key, order_index) VALUES ($1, $2, $3) \
             RETURNING id, tool_id, object_key, order_index, created_at",
        )
        .bind(tool_id)
        .bind(key)
        .bind(order_index)
        .fetch_one(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM tool_images WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn image(order_index: i16) -> ToolImage {
        ToolImage {
            id: Uuid::new_v4(),
            tool_id: Uuid::nil(),
            object_key: format!("tools/{order_index}.jpg"),
            order_index,
            created_at: Utc::now(),
        }
    }

    #[rstest]
    #[case(None, vec![], Some(0))]
    #[case(None, vec![0], Some(1))]
    #[case(None, vec![0, 1], Some(2))]
    #[case(None, vec![1, 2], Some(0))]
    #[case(None, vec![0, 2], Some(1))]
    #[case(None, vec![2], Some(0))]
    #[case(Some(-1), vec![0], Some(1))]
    #[case(Some(1), vec![], Some(1))]
    #[case(Some(9), vec![], Some(2))]
    #[case(Some(2), vec![2], Some(0))]
    #[case(None, vec![0, 1, 2], None)]
    fn order_index_picks_a_free_slot(
        #[case] requested: Option<i64>,
        #[case] existing: Vec<i16>,
        #[case] expected: Option<i16>,
    ) {
        let existing: Vec<ToolImage> = existing.into_iter().map(image).collect();
        assert_eq!(next_order_index(requested, &existing), expected);
    }

    #[test]
    fn image_url_joins_bucket_base() {
        let mut config = Config::for_tests();
        assert_eq!(image_url(&config, "tools/a.jpg"), "tools/a.jpg");

        config.image_public_url = Some("https://img.example.com/".into());
        assert_eq!(
            image_url(&config, "tools/a.jpg"),
            "https://img.example.com/tools/a.jpg"
        );
    }

    #[test]
    fn patch_has_no_availability_field() {
        let patch: ToolPatch =
            serde_json::from_str(r#"{"isAvailable": false, "notes": null}"#).unwrap();
        assert_eq!(patch.notes, Some(None));

        let mut builder = PatchBuilder::new("tools");
        patch.apply(&mut builder, None);
        let sql = builder.finish(Uuid::nil()).sql().to_string();
        assert!(!sql.contains("is_available"));
        assert!(sql.contains("notes = $1"));
    }
}
