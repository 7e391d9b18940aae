use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::utils::{Pagination, PatchBuilder, nullable};

const PROFILE_SELECT: &str = "SELECT u.id, u.username, u.display_name, u.avatar_url, u.bio, \
     (SELECT COUNT(*) FROM follows f WHERE f.following_id = u.id) AS followers_count, \
     (SELECT COUNT(*) FROM follows f WHERE f.follower_id = u.id) AS following_count \
     FROM users u";

#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
    pub is_following: bool,
    pub is_buddy: bool,
}

impl ProfileRow {
    pub fn into_profile(self, is_following: bool, is_buddy: bool) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            bio: self.bio,
            followers_count: self.followers_count,
            following_count: self.following_count,
            is_following,
            is_buddy,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckUsernameQuery {
    pub username: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct UsernameAvailability {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    #[serde(flatten)]
    pub page: crate::utils::PaginationQuery,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(default, deserialize_with = "nullable")]
    pub display_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub bio: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub avatar_url: Option<Option<String>>,
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FollowResponse {
    pub message: &'static str,
}

/// Alternatives offered when a username is taken.
pub fn username_suggestions(taken: &str, n: u32, year: i32) -> Vec<String> {
    let base = taken.to_lowercase();
    vec![
        format!("{base}_{n}"),
        format!("{base}_tools"),
        format!("{base}_{year}"),
    ]
}

/// `jane.doe+x@example.com` -> `jane_doe_x_<n>`.
pub fn username_from_email(email: &str, n: u32) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let base: String = local
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(40)
        .collect();
    format!("{base}_{n}")
}

/// Small pseudo-random number for username suffixes.
pub fn random_suffix() -> u32 {
    (Uuid::new_v4().as_u128() % 1000) as u32
}

/// `%` and `_` in user input match literally.
pub fn like_pattern(raw: &str) -> String {
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

impl UserPatch {
    pub fn apply<'a>(self, patch: &mut PatchBuilder<'a>, username_changed: bool) {
        patch
            .set_if("display_name", self.display_name)
            .set_if("bio", self.bio)
            .set_if("avatar_url", self.avatar_url)
            .set_if("username", self.username);
        if username_changed {
            patch.touch("username_changed_at = now()");
        }
    }
}

pub struct NewUser<'a> {
    pub external_auth_id: &'a str,
    pub email: &'a str,
    pub username: &'a str,
    pub display_name: &'a str,
    pub avatar_url: Option<&'a str>,
}

pub struct Users;

impl Users {
    pub async fn profile(pool: &PgPool, id: Uuid) -> Result<Option<ProfileRow>, sqlx::Error> {
        sqlx::query_as::<_, ProfileRow>(&format!("{PROFILE_SELECT} WHERE u.id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Case-insensitive, optionally ignoring one user's own row.
    pub async fn username_taken(
        pool: &PgPool,
        username: &str,
        except: Option<Uuid>,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users \
             WHERE LOWER(username) = LOWER($1) AND ($2::uuid IS NULL OR id <> $2))",
        )
        .bind(username)
        .bind(except)
        .fetch_one(pool)
        .await
    }

    pub async fn find_id_by_email(pool: &PgPool, email: &str) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    pub async fn link_external_id(
        pool: &PgPool,
        id: Uuid,
        external_auth_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET external_auth_id = $1, updated_at = now() WHERE id = $2")
            .bind(external_auth_id)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn create(pool: &PgPool, new: NewUser<'_>) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO users (external_auth_id, email, username, display_name, avatar_url) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(new.external_auth_id)
        .bind(new.email)
        .bind(new.username)
        .bind(new.display_name)
        .bind(new.avatar_url)
        .fetch_one(pool)
        .await
    }

    pub async fn update(pool: &PgPool, id: Uuid, patch: PatchBuilder<'_>) -> Result<(), sqlx::Error> {
        patch.finish(id).build().execute(pool).await?;
        Ok(())
    }

    async fn page_of(
        pool: &PgPool,
        count_sql: &str,
        select_sql: String,
        user_id: Uuid,
        page: Pagination,
    ) -> Result<(Vec<ProfileRow>, i64), sqlx::Error> {
        let total: i64 = sqlx::query_scalar(count_sql)
            .bind(user_id)
            .fetch_one(pool)
            .await?;
        let rows = sqlx::query_as::<_, ProfileRow>(&select_sql)
            .bind(user_id)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(pool)
            .await?;
        Ok((rows, total))
    }

    pub async fn buddies(
        pool: &PgPool,
        user_id: Uuid,
        page: Pagination,
    ) -> Result<(Vec<ProfileRow>, i64), sqlx::Error> {
        Self::page_of(
            pool,
            "SELECT COUNT(*) FROM buddies WHERE user_id = $1",
            format!(
                "{PROFILE_SELECT} INNER JOIN buddies b ON b.buddy_id = u.id \
                 WHERE b.user_id = $1 ORDER BY u.username LIMIT $2 OFFSET $3"
            ),
            user_id,
            page,
        )
        .await
    }

    pub async fn followers(
        pool: &PgPool,
        user_id: Uuid,
        page: Pagination,
    ) -> Result<(Vec<ProfileRow>, i64), sqlx::Error> {
        Self::page_of(
            pool,
            "SELECT COUNT(*) FROM follows WHERE following_id = $1",
            format!(
                "{PROFILE_SELECT} INNER JOIN follows fw ON fw.follower_id = u.id \
                 WHERE fw.following_id = $1 ORDER BY fw.created_at DESC LIMIT $2 OFFSET $3"
            ),
            user_id,
            page,
        )
        .await
    }

    pub async fn following(
        pool: &PgPool,
        user_id: Uuid,
        page: Pagination,
    ) -> Result<(Vec<ProfileRow>, i64), sqlx::Error> {
        Self::page_of(
            pool,
            "SELECT COUNT(*) FROM follows WHERE follower_id = $1",
            format!(
                "{PROFILE_SELECT} INNER JOIN follows fw ON fw.following_id = u.id \
                 WHERE fw.follower_id = $1 ORDER BY fw.created_at DESC LIMIT $2 OFFSET $3"
            ),
            user_id,
            page,
        )
        .await
    }

    /// Username or display-name substring match; prefix matches first.
    pub async fn search(
        pool: &PgPool,
        term: &str,
        page: Pagination,
    ) -> Result<(Vec<ProfileRow>, i64), sqlx::Error> {
        let pattern = like_pattern(term);
        let prefix = format!("{}%", &pattern[1..pattern.len() - 1]);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE username ILIKE $1 OR display_name ILIKE $1",
        )
        .bind(&pattern)
        .fetch_one(pool)
        .await?;

        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "{PROFILE_SELECT} WHERE u.username ILIKE $1 OR u.display_name ILIKE $1 \
             ORDER BY CASE WHEN u.username ILIKE $2 THEN 0 ELSE 1 END, u.username \
             LIMIT $3 OFFSET $4"
        ))
        .bind(&pattern)
        .bind(&prefix)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok((rows, total))
    }

    pub async fn is_following(
        pool: &PgPool,
        follower: Uuid,
        following: Uuid,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = $1 AND following_id = $2)",
        )
        .bind(follower)
        .bind(following)
        .fetch_one(pool)
        .await
    }

    /// Idempotent.
    pub async fn follow(pool: &PgPool, follower: Uuid, following: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO follows (follower_id, following_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(follower)
        .bind(following)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn unfollow(pool: &PgPool, follower: Uuid, following: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND following_id = $2")
            .bind(follower)
            .bind(following)
            .execute(pool)
            .await?;
        Ok(())
    }
}
