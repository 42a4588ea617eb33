//! 会话依赖的外部协作者
//!
//! 定位来源、位置存储、资料存储与变更订阅都以 trait 表示，
//! 会话本身不关心它们背后是 HTTP、数据库还是测试替身。

use std::future::Future;

use futures_util::stream::BoxStream;

use super::error::{GeolocationError, RemoteError};
use crate::models::{ChangeEvent, Coordinate, FeedFilter, PeerLocation};

pub trait GeolocationSource: Send + Sync + 'static {
    /// 一次性定位，不可取消
    fn current_position(
        &self,
    ) -> impl Future<Output = Result<Coordinate, GeolocationError>> + Send;
}

pub trait LocationStore: Send + Sync + 'static {
    /// 按 user_id 幂等写入
    fn upsert_location(
        &self,
        user_id: &str,
        coordinate: Coordinate,
        is_active: bool,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn update_location_active(
        &self,
        user_id: &str,
        is_active: bool,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// 所有 is_active = true 的记录，附带用户资料
    fn read_active_locations(
        &self,
    ) -> impl Future<Output = Result<Vec<PeerLocation>, RemoteError>> + Send;
}

pub trait ProfileStore: Send + Sync + 'static {
    fn update_sharing_flag(
        &self,
        user_id: &str,
        is_sharing: bool,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// 没有记录时视为 false
    fn read_sharing_flag(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<bool, RemoteError>> + Send;
}

pub trait ChangeFeed: Send + Sync + 'static {
    /// 订阅位置表变更；丢弃返回的流即释放订阅
    fn subscribe_locations(
        &self,
        filter: FeedFilter,
    ) -> impl Future<Output = Result<BoxStream<'static, ChangeEvent>, RemoteError>> + Send;
}
