use std::collections::BTreeMap;

use crate::models::PeerLocation;

/// 用最新的全量快照替换本地可见的对端集合
///
/// 非活跃记录和本地用户自己的记录都会被剔除，结果以 location_id 为键。
pub fn reconcile(
    snapshot: Vec<PeerLocation>,
    local_user_id: &str,
) -> BTreeMap<String, PeerLocation> {
    snapshot
        .into_iter()
        .filter(|loc| loc.is_active && loc.user_id != local_user_id)
        .map(|loc| (loc.location_id.clone(), loc))
        .collect()
}
