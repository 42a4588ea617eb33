use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::DirectMessage;

const MAX_CONTENT_CHARS: usize = 2000;
const DEFAULT_HISTORY_LIMIT: i64 = 200;
const MAX_HISTORY_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub receiver_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub peer_id: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationChangesQuery {
    pub peer_id: String,
}

impl SendMessageRequest {
    /// 返回去掉首尾空白后的消息内容
    pub fn validated_content(&self, sender_id: &str) -> Result<String, String> {
        if self.receiver_id.trim().is_empty() {
            return Err("接收者不能为空".to_string());
        }
        if self.receiver_id == sender_id {
            return Err("不能给自己发送消息".to_string());
        }

        let content = self.content.trim();
        if content.is_empty() {
            return Err("消息内容不能为空".to_string());
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(format!("消息内容不能超过{}个字符", MAX_CONTENT_CHARS));
        }
        Ok(content.to_string())
    }
}

impl ConversationQuery {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

pub(super) struct MessageRecord;

impl MessageRecord {
    pub async fn create(
        pool: &PgPool,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<DirectMessage, sqlx::Error> {
        sqlx::query_as::<_, DirectMessage>(
            r#"
            INSERT INTO messages (message_id, sender_id, receiver_id, content, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING message_id, sender_id, receiver_id, content, created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(sender_id)
        .bind(receiver_id)
        .bind(content)
        .fetch_one(pool)
        .await
    }

    /// 两人之间最近的消息，按时间正序
    pub async fn conversation(
        pool: &PgPool,
        user_id: &str,
        peer_id: &str,
        limit: i64,
    ) -> Result<Vec<DirectMessage>, sqlx::Error> {
        sqlx::query_as::<_, DirectMessage>(
            r#"
            SELECT message_id, sender_id, receiver_id, content, created_at
            FROM (
                SELECT message_id, sender_id, receiver_id, content, created_at
                FROM messages
                WHERE (sender_id = $1 AND receiver_id = $2)
                   OR (sender_id = $2 AND receiver_id = $1)
                ORDER BY created_at DESC
                LIMIT $3
            ) recent
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(peer_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
