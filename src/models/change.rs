use serde::{Deserialize, Serialize};

use super::DirectMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// 订阅端落后、事件被丢弃时发出，接收方应重新拉取全量
    Resync,
}

/// 变更通知，按表区分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum ChangeEvent {
    Locations {
        kind: ChangeKind,
        location_id: String,
        user_id: String,
        is_active: bool,
    },
    Messages {
        kind: ChangeKind,
        message: DirectMessage,
    },
}

/// 位置变更订阅的过滤条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedFilter {
    #[default]
    All,
    ActiveOnly,
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Locations { kind, .. } | ChangeEvent::Messages { kind, .. } => *kind,
        }
    }

    /// 与 Postgres 变更过滤的语义一致：按新行判断
    pub fn matches_locations(&self, filter: FeedFilter) -> bool {
        match self {
            ChangeEvent::Locations {
                kind: ChangeKind::Resync,
                ..
            } => true,
            ChangeEvent::Locations { is_active, .. } => match filter {
                FeedFilter::All => true,
                FeedFilter::ActiveOnly => *is_active,
            },
            ChangeEvent::Messages { .. } => false,
        }
    }

    pub fn matches_conversation(&self, user_id: &str, peer_id: &str) -> bool {
        match self {
            ChangeEvent::Messages {
                kind: ChangeKind::Insert,
                message,
            } => message.involves(user_id, peer_id),
            _ => false,
        }
    }
}
