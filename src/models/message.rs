use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 两个用户之间的私聊消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DirectMessage {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl DirectMessage {
    /// 消息是否属于 a 与 b 之间的会话（不区分方向）
    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}
