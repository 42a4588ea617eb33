use std::collections::BTreeMap;

use super::error::SessionError;
use crate::models::{Coordinate, PeerLocation};

/// 登录后的用户上下文，显式传入会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub username: Option<String>,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: None,
        }
    }
}

/// 展示层读取的会话状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub is_sharing: bool,
    pub last_known_position: Option<Coordinate>,
    pub visible_peers: BTreeMap<String, PeerLocation>,
    pub(super) pending_fixes: usize,
}

impl SessionState {
    /// 有定位请求尚未返回
    pub fn loading(&self) -> bool {
        self.pending_fixes > 0
    }
}

/// 一次性提示，展示层以 toast 形式呈现
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    LocationUpdated(Coordinate),
    SharingEnabled,
    SharingDisabled,
    Error(SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Enabled,
    Disabled,
    /// 未登录，或上一次切换还未完成
    Ignored,
}
