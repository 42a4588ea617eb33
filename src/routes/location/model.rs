use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Coordinate, PeerLocation, PeerProfile};

// 缓存相关常量
const ACTIVE_LOCATIONS_CACHE_PREFIX: &str = "geoshare:loc:active:"; // 活跃位置快照，按版本号区分
const ACTIVE_LOCATIONS_VERSION_KEY: &str = "geoshare:loc:active:version"; // 每次位置写入后递增
const ACTIVE_LOCATIONS_CACHE_EXPIRE: u64 = 5; // 每次变更都会触发所有客户端重新拉取，只需短暂缓存

fn active_cache_key(version: u64) -> String {
    format!("{}v{}", ACTIVE_LOCATIONS_CACHE_PREFIX, version)
}

#[derive(Debug, Deserialize)]
pub struct UpsertLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct ActiveLocationsQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangesQuery {
    pub active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LocationWritten {
    pub location_id: Option<String>,
}

#[derive(Debug, FromRow)]
pub(super) struct UpsertResult {
    pub location_id: String,
    pub inserted: bool,
}

#[derive(Debug, FromRow)]
struct LocationRow {
    location_id: String,
    user_id: String,
    latitude: f64,
    longitude: f64,
    is_active: bool,
    updated_at: DateTime<Utc>,
    username: Option<String>,
    avatar_url: Option<String>,
}

impl From<LocationRow> for PeerLocation {
    fn from(row: LocationRow) -> Self {
        let profile = row.username.map(|username| PeerProfile {
            username,
            avatar_url: row.avatar_url,
        });
        PeerLocation {
            location_id: row.location_id,
            user_id: row.user_id,
            latitude: row.latitude,
            longitude: row.longitude,
            is_active: row.is_active,
            updated_at: row.updated_at,
            profile,
        }
    }
}

/// 递增版本号，旧版本的快照不再被读取
///
/// 并发的读请求可能在写入之前查库、在写入之后回填缓存，
/// 它回填的是旧版本的键，不会覆盖新版本。
pub(crate) async fn invalidate_active_cache(redis: &Arc<RedisClient>) {
    match redis.get_multiplexed_async_connection().await {
        Ok(mut conn) => {
            let bumped: redis::RedisResult<u64> = conn.incr(ACTIVE_LOCATIONS_VERSION_KEY, 1).await;
            if let Err(e) = bumped {
                tracing::warn!("Failed to bump active locations cache version: {}", e);
            }
        }
        Err(e) => tracing::warn!("Redis unavailable, active locations cache not invalidated: {}", e),
    }
}

pub(super) struct LocationRecord;

impl LocationRecord {
    /// 每个用户只有一条位置记录，重复上报时原地更新
    pub async fn upsert(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        user_id: &str,
        coordinate: Coordinate,
        is_active: bool,
    ) -> Result<UpsertResult, sqlx::Error> {
        let result = sqlx::query_as::<_, UpsertResult>(
            r#"
            INSERT INTO locations (location_id, user_id, latitude, longitude, is_active, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            RETURNING location_id, (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(coordinate.latitude)
        .bind(coordinate.longitude)
        .bind(is_active)
        .fetch_one(pool)
        .await?;

        invalidate_active_cache(redis).await;
        Ok(result)
    }

    /// 用户还没有位置记录时返回 None
    pub async fn set_active(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        user_id: &str,
        is_active: bool,
    ) -> Result<Option<String>, sqlx::Error> {
        let location_id = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE locations
            SET is_active = $2, updated_at = NOW()
            WHERE user_id = $1
            RETURNING location_id
            "#,
        )
        .bind(user_id)
        .bind(is_active)
        .fetch_optional(pool)
        .await?;

        invalidate_active_cache(redis).await;
        Ok(location_id)
    }

    pub async fn find_active(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        user_id: Option<&str>,
    ) -> Result<Vec<PeerLocation>, sqlx::Error> {
        // 只缓存不带过滤条件的全量查询；版本号必须在查库之前读取
        let mut cache_key = None;
        if user_id.is_none() {
            if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
                let version: redis::RedisResult<Option<u64>> =
                    conn.get(ACTIVE_LOCATIONS_VERSION_KEY).await;
                let key = match version {
                    Ok(version) => active_cache_key(version.unwrap_or(0)),
                    Err(e) => {
                        tracing::warn!("Failed to read active locations cache version: {}", e);
                        return Self::query_active(pool, user_id).await;
                    }
                };
                let cached: redis::RedisResult<String> = conn.get(&key).await;
                cache_key = Some(key);
                if let Ok(json_str) = cached {
                    if let Ok(locations) = serde_json::from_str::<Vec<PeerLocation>>(&json_str) {
                        tracing::debug!("Get active locations from cache");
                        return Ok(locations);
                    }
                }
            }
        }

        let locations = Self::query_active(pool, user_id).await?;

        if let Some(key) = cache_key {
            if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
                if let Ok(json_str) = serde_json::to_string(&locations) {
                    let _: Result<(), redis::RedisError> = conn
                        .set_ex(&key, json_str, ACTIVE_LOCATIONS_CACHE_EXPIRE)
                        .await;
                    tracing::debug!("Set active locations to cache");
                }
            }
        }

        Ok(locations)
    }

    async fn query_active(
        pool: &PgPool,
        user_id: Option<&str>,
    ) -> Result<Vec<PeerLocation>, sqlx::Error> {
        let rows = sqlx::query_as::<_, LocationRow>(
            r#"
            SELECT
                l.location_id, l.user_id, l.latitude, l.longitude,
                l.is_active, l.updated_at, p.username, p.avatar_url
            FROM locations l
            LEFT JOIN profiles p ON p.user_id = l.user_id
            WHERE l.is_active
                AND ($1::TEXT IS NULL OR l.user_id = $1)
            ORDER BY l.updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(PeerLocation::from).collect())
    }
}
