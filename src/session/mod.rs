//! 位置共享会话
//!
//! 负责本地的共享状态：当前是否在共享、最近一次定位结果，以及可见的其他用户。
//! 远端存储是唯一可信来源，会话只在远端写入成功后才翻转本地标志；
//! 变更订阅的每一条通知都会触发一次全量重新拉取。

mod error;
mod reconcile;
mod state;
mod traits;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::{FutureExt, StreamExt, stream::BoxStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::models::{ChangeEvent, Coordinate, FeedFilter};

pub use error::{GeolocationError, RemoteError, SessionError};
pub use reconcile::reconcile;
pub use state::{AuthContext, Notice, SessionState, ToggleOutcome};
pub use traits::{ChangeFeed, GeolocationSource, LocationStore, ProfileStore};

/// 共享期间的定位间隔，固定值
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// 变更订阅断开后重新订阅的间隔
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(3);

/// 远端协作者的组合约束
pub trait RemoteStore: LocationStore + ProfileStore + ChangeFeed {}

impl<T: LocationStore + ProfileStore + ChangeFeed> RemoteStore for T {}

pub struct SharingSession<G, R> {
    inner: Arc<Inner<G, R>>,
}

impl<G, R> Clone for SharingSession<G, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Default)]
struct Tasks {
    poll: Option<JoinHandle<()>>,
    feed: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        if let Some(handle) = self.poll.take() {
            handle.abort();
        }
        if let Some(handle) = self.feed.take() {
            handle.abort();
        }
    }
}

struct Inner<G, R> {
    geo: G,
    remote: R,
    state: watch::Sender<SessionState>,
    notices: mpsc::UnboundedSender<Notice>,
    context: Mutex<Option<AuthContext>>,
    tasks: Mutex<Tasks>,
    // 关闭共享或销毁会话时递增，用来丢弃过期的定位结果
    generation: AtomicU64,
    toggling: AtomicBool,
    // 位置上传与切换写入串行执行
    writes: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 在途定位计数，被取消时同样会归还
struct PendingFix<'a>(&'a watch::Sender<SessionState>);

impl<'a> PendingFix<'a> {
    fn begin(state: &'a watch::Sender<SessionState>) -> Self {
        state.send_modify(|s| s.pending_fixes += 1);
        Self(state)
    }
}

impl Drop for PendingFix<'_> {
    fn drop(&mut self) {
        self.0
            .send_modify(|s| s.pending_fixes = s.pending_fixes.saturating_sub(1));
    }
}

/// 同一时刻只允许一次切换
struct ToggleGuard<'a>(&'a AtomicBool);

impl<'a> ToggleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ToggleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<G, R> Inner<G, R>
where
    G: GeolocationSource,
    R: RemoteStore,
{
    fn user_id(&self) -> Option<String> {
        lock(&self.context).as_ref().map(|ctx| ctx.user_id.clone())
    }

    fn superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    fn fail(&self, err: SessionError) -> SessionError {
        self.notify(Notice::Error(err.clone()));
        err
    }

    async fn request_location(&self) -> Result<Option<Coordinate>, SessionError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let _pending = PendingFix::begin(&self.state);

        let coordinate = match self.geo.current_position().await {
            Ok(coordinate) => coordinate,
            Err(reason) => {
                tracing::warn!("Geolocation failed: {}", reason);
                return Err(self.fail(SessionError::LocationUnavailable(reason)));
            }
        };

        if self.superseded(generation) {
            tracing::debug!("Discarding fix that resolved after sharing was stopped");
            return Ok(None);
        }

        self.state
            .send_modify(|s| s.last_known_position = Some(coordinate));

        let sharing = self.state.borrow().is_sharing;
        if sharing {
            let _writes = self.writes.lock().await;
            // 等锁期间共享可能已经被关闭
            if self.superseded(generation) {
                tracing::debug!("Discarding upload queued behind a sharing toggle");
                return Ok(None);
            }
            if let Some(user_id) = self.user_id() {
                if let Err(e) = self.remote.upsert_location(&user_id, coordinate, true).await {
                    tracing::error!("Failed to update location: {}", e);
                    return Err(self.fail(SessionError::RemoteWriteFailed(e)));
                }
            }
        }

        self.notify(Notice::LocationUpdated(coordinate));
        Ok(Some(coordinate))
    }

    async fn refresh_peers(&self) -> Result<usize, SessionError> {
        let Some(user_id) = self.user_id() else {
            return Ok(0);
        };

        match self.remote.read_active_locations().await {
            Ok(snapshot) => {
                let peers = reconcile(snapshot, &user_id);
                let count = peers.len();
                self.state.send_modify(|s| s.visible_peers = peers);
                Ok(count)
            }
            Err(e) => {
                // 保留旧快照
                tracing::warn!("Failed to fetch active locations: {}", e);
                Err(self.fail(SessionError::RemoteReadFailed(e)))
            }
        }
    }

    fn start_polling(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(poll_loop(weak));
        if let Some(previous) = lock(&self.tasks).poll.replace(handle) {
            previous.abort();
        }
    }

    fn stop_polling(&self) {
        if let Some(handle) = lock(&self.tasks).poll.take() {
            handle.abort();
        }
    }

    fn start_feed(self: &Arc<Self>, stream: BoxStream<'static, ChangeEvent>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(feed_loop(weak, stream));
        if let Some(previous) = lock(&self.tasks).feed.replace(handle) {
            previous.abort();
        }
    }
}

impl<G, R> Drop for Inner<G, R> {
    fn drop(&mut self) {
        self.tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }
}

async fn poll_loop<G, R>(weak: Weak<Inner<G, R>>)
where
    G: GeolocationSource,
    R: RemoteStore,
{
    let mut ticker = time::interval_at(Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        // 错误已经通知过展示层
        let _ = inner.request_location().await;
        drop(inner);

        ticker.tick().await;
    }
}

async fn feed_loop<G, R>(weak: Weak<Inner<G, R>>, stream: BoxStream<'static, ChangeEvent>)
where
    G: GeolocationSource,
    R: RemoteStore,
{
    // 合并时会在流结束后继续轮询
    let mut stream = stream.fuse();
    loop {
        while let Some(event) = stream.next().await {
            // 已经排队的通知合并成一次重新拉取
            let mut coalesced = 0usize;
            while let Some(Some(_)) = stream.next().now_or_never() {
                coalesced += 1;
            }
            tracing::debug!(
                "Location change {:?} received ({} coalesced), reloading snapshot",
                event.kind(),
                coalesced
            );

            let Some(inner) = weak.upgrade() else {
                return;
            };
            let _ = inner.refresh_peers().await;
        }

        tracing::warn!(
            "Location change feed closed, resubscribing in {:?}",
            RESUBSCRIBE_DELAY
        );
        drop(stream);
        stream = match resubscribe(&weak).await {
            Some(next) => next.fuse(),
            None => return,
        };
    }
}

/// 重新订阅成功后全量拉取一次，补上断开期间的变更
async fn resubscribe<G, R>(weak: &Weak<Inner<G, R>>) -> Option<BoxStream<'static, ChangeEvent>>
where
    G: GeolocationSource,
    R: RemoteStore,
{
    loop {
        time::sleep(RESUBSCRIBE_DELAY).await;
        let inner = weak.upgrade()?;
        match inner.remote.subscribe_locations(FeedFilter::All).await {
            Ok(stream) => {
                tracing::info!("Resubscribed to location changes");
                let _ = inner.refresh_peers().await;
                return Some(stream);
            }
            Err(e) => tracing::warn!("Failed to resubscribe to location changes: {}", e),
        }
    }
}

impl<G, R> SharingSession<G, R>
where
    G: GeolocationSource,
    R: RemoteStore,
{
    pub fn new(geo: G, remote: R) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (state, _) = watch::channel(SessionState::default());
        let (notices, notice_rx) = mpsc::unbounded_channel();

        let session = Self {
            inner: Arc::new(Inner {
                geo,
                remote,
                state,
                notices,
                context: Mutex::new(None),
                tasks: Mutex::new(Tasks::default()),
                generation: AtomicU64::new(0),
                toggling: AtomicBool::new(false),
                writes: tokio::sync::Mutex::new(()),
            }),
        };
        (session, notice_rx)
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn context(&self) -> Option<AuthContext> {
        lock(&self.inner.context).clone()
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.inner.tasks)
            .poll
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.inner.tasks)
            .feed
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// 登录后调用一次：恢复共享状态、加载可见用户并订阅位置变更
    pub async fn start(&self, ctx: AuthContext) {
        self.teardown();
        let user_id = ctx.user_id.clone();
        *lock(&self.inner.context) = Some(ctx);
        let generation = self.inner.generation.load(Ordering::SeqCst);

        // 先订阅再读快照，避免漏掉两者之间的变更
        match self.inner.remote.subscribe_locations(FeedFilter::All).await {
            // 订阅期间会话已被销毁，丢弃这个流
            Ok(_) if self.inner.superseded(generation) => {}
            Ok(stream) => self.inner.start_feed(stream),
            Err(e) => {
                tracing::warn!("Failed to subscribe to location changes: {}", e);
                self.inner.fail(SessionError::RemoteReadFailed(e));
            }
        }
        if self.inner.superseded(generation) {
            tracing::debug!("Session torn down during start");
            return;
        }

        // 读取失败时状态未知：不恢复共享，也不做修复
        let sharing = match self.inner.remote.read_sharing_flag(&user_id).await {
            Ok(flag) => Some(flag),
            Err(e) => {
                tracing::warn!("Failed to read sharing flag for {}: {}", user_id, e);
                self.inner.fail(SessionError::RemoteReadFailed(e));
                None
            }
        };
        if self.inner.superseded(generation) {
            tracing::debug!("Session torn down during start");
            return;
        }

        match self.inner.remote.read_active_locations().await {
            Ok(_) if self.inner.superseded(generation) => {
                tracing::debug!("Session torn down during start");
                return;
            }
            Ok(snapshot) => {
                let stale_self = sharing == Some(false)
                    && snapshot
                        .iter()
                        .any(|loc| loc.user_id == user_id && loc.is_active);
                self.inner
                    .state
                    .send_modify(|s| s.visible_peers = reconcile(snapshot, &user_id));

                if stale_self {
                    // 上次切换只写成功了一半
                    tracing::info!("Deactivating stale location record for {}", user_id);
                    let _writes = self.inner.writes.lock().await;
                    if let Err(e) = self.inner.remote.update_location_active(&user_id, false).await
                    {
                        tracing::warn!("Read-repair of location flag failed: {}", e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Failed to fetch active locations: {}", e);
                self.inner.fail(SessionError::RemoteReadFailed(e));
            }
        }

        if self.inner.superseded(generation) {
            tracing::debug!("Session torn down during start");
            return;
        }

        if sharing == Some(true) {
            self.inner.state.send_modify(|s| s.is_sharing = true);
            self.inner.start_polling();
            tracing::info!("Resumed location sharing for {}", user_id);
        }
    }

    /// 手动获取一次定位；共享中则同时上报
    ///
    /// 结果在共享被关闭之后才返回时会被丢弃，此时返回 `Ok(None)`。
    pub async fn request_location(&self) -> Result<Option<Coordinate>, SessionError> {
        self.inner.request_location().await
    }

    /// 切换共享状态；两次远端写入都成功后才修改本地状态
    pub async fn toggle_sharing(&self) -> Result<ToggleOutcome, SessionError> {
        let Some(user_id) = self.inner.user_id() else {
            return Ok(ToggleOutcome::Ignored);
        };
        let Some(_guard) = ToggleGuard::acquire(&self.inner.toggling) else {
            tracing::debug!("Toggle already in flight, ignoring");
            return Ok(ToggleOutcome::Ignored);
        };
        // 在途的上传先落地，排队的上传在锁释放后会看到新的 generation
        let _writes = self.inner.writes.lock().await;

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let next = !self.inner.state.borrow().is_sharing;

        if let Err(e) = self.inner.remote.update_sharing_flag(&user_id, next).await {
            tracing::error!("Failed to update sharing flag: {}", e);
            return Err(self.inner.fail(SessionError::RemoteWriteFailed(e)));
        }

        // 两次写入不在同一事务中，失败时资料标志已经改变，下次登录时修复
        if let Err(e) = self
            .inner
            .remote
            .update_location_active(&user_id, next)
            .await
        {
            tracing::error!(
                "Sharing flag set to {} but location flag update failed: {}",
                next,
                e
            );
            return Err(self.inner.fail(SessionError::RemoteWriteFailed(e)));
        }

        if self.inner.superseded(generation) {
            return Ok(ToggleOutcome::Ignored);
        }

        if next {
            self.inner.state.send_modify(|s| s.is_sharing = true);
            self.inner.start_polling();
            self.inner.notify(Notice::SharingEnabled);
            tracing::info!("Location sharing enabled for {}", user_id);
            Ok(ToggleOutcome::Enabled)
        } else {
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            self.inner.stop_polling();
            self.inner.state.send_modify(|s| {
                s.is_sharing = false;
                s.last_known_position = None;
            });
            self.inner.notify(Notice::SharingDisabled);
            tracing::info!("Location sharing disabled for {}", user_id);
            Ok(ToggleOutcome::Disabled)
        }
    }

    /// 重新拉取活跃位置，失败时保留原有集合
    pub async fn refresh_peers(&self) -> Result<usize, SessionError> {
        self.inner.refresh_peers().await
    }

    /// 停止定时器并释放订阅，可重复调用
    ///
    /// 只清理本地状态，远端的共享标志保持不变，下次登录会继续共享。
    pub fn teardown(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.tasks).abort_all();
        if lock(&self.inner.context).take().is_some() {
            tracing::debug!("Sharing session torn down");
        }
        self.inner.state.send_if_modified(|s| {
            let changed =
                s.is_sharing || s.last_known_position.is_some() || !s.visible_peers.is_empty();
            s.is_sharing = false;
            s.last_known_position = None;
            s.visible_peers.clear();
            changed
        });
    }
}
