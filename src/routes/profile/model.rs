use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

const MAX_USERNAME_CHARS: usize = 32;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub user_id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub is_sharing_location: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SharingStatus {
    pub is_sharing: bool,
}

impl UpdateProfileRequest {
    /// 返回去掉首尾空白后的用户名
    pub fn validated_username(&self) -> Result<String, String> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err("用户名不能为空".to_string());
        }
        if username.chars().count() > MAX_USERNAME_CHARS {
            return Err(format!("用户名不能超过{}个字符", MAX_USERNAME_CHARS));
        }
        Ok(username.to_string())
    }
}

impl Profile {
    /// 尚未保存过资料的用户，用户名默认为用户ID
    pub fn placeholder(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            avatar_url: None,
            is_sharing_location: false,
            updated_at: Utc::now(),
        }
    }

    pub async fn find_by_id(pool: &PgPool, user_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(
            r#"
            SELECT user_id, username, avatar_url, is_sharing_location, updated_at
            FROM profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn upsert_details(
        pool: &PgPool,
        user_id: &str,
        username: &str,
        avatar_url: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Profile>(
            r#"
            INSERT INTO profiles (user_id, username, avatar_url, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                username = EXCLUDED.username,
                avatar_url = EXCLUDED.avatar_url,
                updated_at = NOW()
            RETURNING user_id, username, avatar_url, is_sharing_location, updated_at
            "#,
        )
        .bind(user_id)
        .bind(username)
        .bind(avatar_url)
        .fetch_one(pool)
        .await
    }

    pub async fn sharing_flag(pool: &PgPool, user_id: &str) -> Result<bool, sqlx::Error> {
        let flag = sqlx::query_scalar::<_, bool>(
            "SELECT is_sharing_location FROM profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(flag.unwrap_or(false))
    }

    pub async fn set_sharing_flag(
        pool: &PgPool,
        user_id: &str,
        is_sharing: bool,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO profiles (user_id, username, is_sharing_location, updated_at)
            VALUES ($1, $1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                is_sharing_location = EXCLUDED.is_sharing_location,
                updated_at = NOW()
            RETURNING is_sharing_location
            "#,
        )
        .bind(user_id)
        .bind(is_sharing)
        .fetch_one(pool)
        .await
    }
}
