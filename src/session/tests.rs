use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize};

use chrono::Utc;
use futures_util::stream;
use tokio::sync::{Semaphore, broadcast};

use super::*;
use crate::models::{ChangeKind, PeerLocation, PeerProfile};

const ME: &str = "me";

struct FakeGeo {
    results: Mutex<VecDeque<Result<Coordinate, GeolocationError>>>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl FakeGeo {
    fn always_ok() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn scripted(results: Vec<Result<Coordinate, GeolocationError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            ..Self::always_ok()
        }
    }

    /// 每次定位都要等测试放行
    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::always_ok()
        }
    }
}

fn london() -> Coordinate {
    Coordinate::new(51.505, -0.09).unwrap()
}

impl GeolocationSource for Arc<FakeGeo> {
    async fn current_position(&self) -> Result<Coordinate, GeolocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        lock(&self.results).pop_front().unwrap_or(Ok(london()))
    }
}

struct FakeRemote {
    locations: Mutex<HashMap<String, PeerLocation>>,
    flags: Mutex<HashMap<String, bool>>,
    upserts: AtomicUsize,
    fail_profile_write: AtomicBool,
    fail_location_write: AtomicBool,
    fail_reads: AtomicBool,
    fail_flag_read: AtomicBool,
    upsert_gate: Mutex<Option<Arc<Semaphore>>>,
    subscribe_gate: Mutex<Option<Arc<Semaphore>>>,
    feed: broadcast::Sender<ChangeEvent>,
    // 递增时关闭所有已建立的订阅
    connection: watch::Sender<u64>,
}

impl FakeRemote {
    fn new() -> Self {
        let (feed, _) = broadcast::channel(64);
        Self {
            locations: Mutex::new(HashMap::new()),
            flags: Mutex::new(HashMap::new()),
            upserts: AtomicUsize::new(0),
            fail_profile_write: AtomicBool::new(false),
            fail_location_write: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_flag_read: AtomicBool::new(false),
            upsert_gate: Mutex::new(None),
            subscribe_gate: Mutex::new(None),
            feed,
            connection: watch::channel(0).0,
        }
    }

    /// 模拟服务端重启，断开现有订阅
    fn drop_connections(&self) {
        self.connection.send_modify(|c| *c += 1);
    }

    /// 模拟其他用户的写入，并推送变更通知
    fn put_peer(&self, user_id: &str, is_active: bool) {
        let location_id = format!("loc-{}", user_id);
        lock(&self.locations).insert(
            user_id.to_string(),
            PeerLocation {
                location_id: location_id.clone(),
                user_id: user_id.to_string(),
                latitude: 48.8566,
                longitude: 2.3522,
                is_active,
                updated_at: Utc::now(),
                profile: Some(PeerProfile {
                    username: user_id.to_string(),
                    avatar_url: None,
                }),
            },
        );
        let _ = self.feed.send(ChangeEvent::Locations {
            kind: ChangeKind::Update,
            location_id,
            user_id: user_id.to_string(),
            is_active,
        });
    }

    fn location_active(&self, user_id: &str) -> Option<bool> {
        lock(&self.locations).get(user_id).map(|l| l.is_active)
    }

    fn flag(&self, user_id: &str) -> Option<bool> {
        lock(&self.flags).get(user_id).copied()
    }

    fn rejected() -> RemoteError {
        RemoteError::Api {
            code: 5000,
            msg: "rejected".into(),
        }
    }
}

impl LocationStore for Arc<FakeRemote> {
    async fn upsert_location(
        &self,
        user_id: &str,
        coordinate: Coordinate,
        is_active: bool,
    ) -> Result<(), RemoteError> {
        let gate = lock(&self.upsert_gate).clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_location_write.load(Ordering::SeqCst) {
            return Err(FakeRemote::rejected());
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        lock(&self.locations).insert(
            user_id.to_string(),
            PeerLocation {
                location_id: format!("loc-{}", user_id),
                user_id: user_id.to_string(),
                latitude: coordinate.latitude,
                longitude: coordinate.longitude,
                is_active,
                updated_at: Utc::now(),
                profile: None,
            },
        );
        Ok(())
    }

    async fn update_location_active(&self, user_id: &str, is_active: bool) -> Result<(), RemoteError> {
        if self.fail_location_write.load(Ordering::SeqCst) {
            return Err(FakeRemote::rejected());
        }
        if let Some(loc) = lock(&self.locations).get_mut(user_id) {
            loc.is_active = is_active;
        }
        Ok(())
    }

    async fn read_active_locations(&self) -> Result<Vec<PeerLocation>, RemoteError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(FakeRemote::rejected());
        }
        Ok(lock(&self.locations)
            .values()
            .filter(|l| l.is_active)
            .cloned()
            .collect())
    }
}

impl ProfileStore for Arc<FakeRemote> {
    async fn update_sharing_flag(&self, user_id: &str, is_sharing: bool) -> Result<(), RemoteError> {
        // 让出一次，模拟网络往返
        tokio::task::yield_now().await;
        if self.fail_profile_write.load(Ordering::SeqCst) {
            return Err(FakeRemote::rejected());
        }
        lock(&self.flags).insert(user_id.to_string(), is_sharing);
        Ok(())
    }

    async fn read_sharing_flag(&self, user_id: &str) -> Result<bool, RemoteError> {
        if self.fail_flag_read.load(Ordering::SeqCst) {
            return Err(FakeRemote::rejected());
        }
        Ok(self.flag(user_id).unwrap_or(false))
    }
}

impl ChangeFeed for Arc<FakeRemote> {
    async fn subscribe_locations(
        &self,
        _filter: FeedFilter,
    ) -> Result<BoxStream<'static, ChangeEvent>, RemoteError> {
        let rx = self.feed.subscribe();
        let mut connection = self.connection.subscribe();
        let gate = lock(&self.subscribe_gate).clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        Ok(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .take_until(async move {
            let _ = connection.changed().await;
        })
        .boxed())
    }
}

type TestSession = SharingSession<Arc<FakeGeo>, Arc<FakeRemote>>;

fn session_with(
    geo: FakeGeo,
    remote: FakeRemote,
) -> (
    TestSession,
    mpsc::UnboundedReceiver<Notice>,
    Arc<FakeGeo>,
    Arc<FakeRemote>,
) {
    let geo = Arc::new(geo);
    let remote = Arc::new(remote);
    let (session, notices) = SharingSession::new(Arc::clone(&geo), Arc::clone(&remote));
    (session, notices, geo, remote)
}

/// 让已经就绪的后台任务跑完；时钟暂停时不会推进到下一个 tick
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn drain(notices: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        out.push(notice);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn login_without_sharing_flag_starts_idle() {
    let remote = FakeRemote::new();
    remote.put_peer("bob", true);
    remote.put_peer("carol", false);
    let (session, _notices, geo, remote) = session_with(FakeGeo::always_ok(), remote);

    session.start(AuthContext::new(ME)).await;
    settle().await;

    let state = session.state();
    assert!(!state.is_sharing);
    assert!(!session.is_polling());
    assert!(session.is_subscribed());
    assert_eq!(state.visible_peers.len(), 1);
    assert!(state.visible_peers.contains_key("loc-bob"));
    assert_eq!(geo.calls.load(Ordering::SeqCst), 0);
    assert_eq!(remote.feed.receiver_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn login_with_sharing_flag_resumes_polling() {
    let remote = FakeRemote::new();
    lock(&remote.flags).insert(ME.to_string(), true);
    let (session, _notices, geo, remote) = session_with(FakeGeo::always_ok(), remote);

    session.start(AuthContext::new(ME)).await;
    settle().await;

    assert!(session.state().is_sharing);
    assert!(session.is_polling());
    assert_eq!(geo.calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.location_active(ME), Some(true));
}

#[tokio::test(start_paused = true)]
async fn toggle_on_writes_both_flags_and_polls_every_ten_seconds() {
    let (session, mut notices, geo, remote) = session_with(FakeGeo::always_ok(), FakeRemote::new());
    session.start(AuthContext::new(ME)).await;

    let outcome = session.toggle_sharing().await.unwrap();
    assert_eq!(outcome, ToggleOutcome::Enabled);
    assert!(session.state().is_sharing);
    assert!(session.is_polling());
    assert_eq!(remote.flag(ME), Some(true));

    // 立即定位一次
    settle().await;
    assert_eq!(geo.calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.upserts.load(Ordering::SeqCst), 1);
    assert_eq!(remote.location_active(ME), Some(true));
    assert_eq!(session.state().last_known_position, Some(london()));

    time::sleep(Duration::from_secs(9)).await;
    settle().await;
    assert_eq!(geo.calls.load(Ordering::SeqCst), 1);

    time::sleep(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(geo.calls.load(Ordering::SeqCst), 2);

    time::sleep(POLL_INTERVAL).await;
    settle().await;
    assert_eq!(geo.calls.load(Ordering::SeqCst), 3);

    let notices = drain(&mut notices);
    assert!(notices.contains(&Notice::SharingEnabled));
    assert!(notices.contains(&Notice::LocationUpdated(london())));
}

#[tokio::test(start_paused = true)]
async fn toggle_off_stops_timer_and_clears_position() {
    let (session, mut notices, geo, remote) = session_with(FakeGeo::always_ok(), FakeRemote::new());
    session.start(AuthContext::new(ME)).await;
    session.toggle_sharing().await.unwrap();
    settle().await;
    assert!(session.state().last_known_position.is_some());

    let outcome = session.toggle_sharing().await.unwrap();
    assert_eq!(outcome, ToggleOutcome::Disabled);

    let state = session.state();
    assert!(!state.is_sharing);
    assert!(state.last_known_position.is_none());
    assert!(!session.is_polling());
    assert_eq!(remote.flag(ME), Some(false));
    assert_eq!(remote.location_active(ME), Some(false));

    let calls = geo.calls.load(Ordering::SeqCst);
    time::sleep(POLL_INTERVAL * 3).await;
    settle().await;
    assert_eq!(geo.calls.load(Ordering::SeqCst), calls);
    assert!(drain(&mut notices).contains(&Notice::SharingDisabled));
}

#[tokio::test(start_paused = true)]
async fn toggle_before_login_is_ignored() {
    let (session, _notices, _geo, remote) = session_with(FakeGeo::always_ok(), FakeRemote::new());

    assert_eq!(session.toggle_sharing().await.unwrap(), ToggleOutcome::Ignored);
    assert!(!session.is_polling());
    assert_eq!(remote.flag(ME), None);
}

#[tokio::test(start_paused = true)]
async fn failed_profile_write_leaves_sharing_unchanged() {
    let remote = FakeRemote::new();
    remote.fail_profile_write.store(true, Ordering::SeqCst);
    let (session, mut notices, _geo, _remote) = session_with(FakeGeo::always_ok(), remote);
    session.start(AuthContext::new(ME)).await;

    let err = session.toggle_sharing().await.unwrap_err();
    assert!(matches!(err, SessionError::RemoteWriteFailed(_)));
    assert!(!session.state().is_sharing);
    assert!(!session.is_polling());
    assert!(
        drain(&mut notices)
            .iter()
            .any(|n| matches!(n, Notice::Error(SessionError::RemoteWriteFailed(_))))
    );
}

#[tokio::test(start_paused = true)]
async fn failed_location_write_aborts_toggle_and_is_repaired_on_next_login() {
    let remote = FakeRemote::new();
    let (session, _notices, _geo, remote) = session_with(FakeGeo::always_ok(), remote);
    session.start(AuthContext::new(ME)).await;
    session.toggle_sharing().await.unwrap();
    settle().await;
    assert_eq!(remote.location_active(ME), Some(true));

    // 关闭时第二次写入失败：资料标志已是 false，位置仍然活跃
    remote.fail_location_write.store(true, Ordering::SeqCst);
    assert!(session.toggle_sharing().await.is_err());
    assert!(session.state().is_sharing);
    assert!(session.is_polling());
    assert_eq!(remote.flag(ME), Some(false));
    assert_eq!(remote.location_active(ME), Some(true));

    remote.fail_location_write.store(false, Ordering::SeqCst);
    session.teardown();
    session.start(AuthContext::new(ME)).await;
    assert!(!session.state().is_sharing);
    assert_eq!(remote.location_active(ME), Some(false));
}

#[tokio::test(start_paused = true)]
async fn concurrent_toggles_install_a_single_timer() {
    let (session, _notices, _geo, _remote) = session_with(FakeGeo::always_ok(), FakeRemote::new());
    session.start(AuthContext::new(ME)).await;

    let (a, b) = tokio::join!(session.toggle_sharing(), session.toggle_sharing());
    let outcomes = [a.unwrap(), b.unwrap()];
    assert!(outcomes.contains(&ToggleOutcome::Enabled));
    assert!(outcomes.contains(&ToggleOutcome::Ignored));
    assert!(session.state().is_sharing);
    assert!(session.is_polling());
}

#[tokio::test(start_paused = true)]
async fn loading_is_true_only_while_fix_is_in_flight() {
    let gate = Arc::new(Semaphore::new(0));
    let (session, _notices, _geo, _remote) =
        session_with(FakeGeo::gated(Arc::clone(&gate)), FakeRemote::new());
    session.start(AuthContext::new(ME)).await;
    assert!(!session.state().loading());

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.request_location().await }
    });
    settle().await;
    assert!(session.state().loading());

    gate.add_permits(1);
    let fix = pending.await.unwrap().unwrap();
    assert_eq!(fix, Some(london()));
    assert!(!session.state().loading());
}

#[tokio::test(start_paused = true)]
async fn permission_denied_keeps_sharing_and_skips_upsert() {
    let geo = FakeGeo::scripted(vec![Ok(london()), Err(GeolocationError::PermissionDenied)]);
    let (session, mut notices, _geo, remote) = session_with(geo, FakeRemote::new());
    session.start(AuthContext::new(ME)).await;
    session.toggle_sharing().await.unwrap();
    settle().await;
    assert_eq!(remote.upserts.load(Ordering::SeqCst), 1);
    drain(&mut notices);

    let err = session.request_location().await.unwrap_err();
    assert_eq!(
        err,
        SessionError::LocationUnavailable(GeolocationError::PermissionDenied)
    );

    let state = session.state();
    assert!(!state.loading());
    assert!(state.is_sharing);
    assert_eq!(state.last_known_position, Some(london()));
    assert_eq!(remote.upserts.load(Ordering::SeqCst), 1);
    assert_eq!(
        drain(&mut notices),
        vec![Notice::Error(SessionError::LocationUnavailable(
            GeolocationError::PermissionDenied
        ))]
    );
}

#[tokio::test(start_paused = true)]
async fn manual_fix_without_sharing_does_not_upload() {
    let (session, _notices, _geo, remote) = session_with(FakeGeo::always_ok(), FakeRemote::new());
    session.start(AuthContext::new(ME)).await;

    let fix = session.request_location().await.unwrap();
    assert_eq!(fix, Some(london()));
    assert_eq!(session.state().last_known_position, Some(london()));
    assert_eq!(remote.upserts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn fix_resolving_after_sharing_stopped_is_discarded() {
    let gate = Arc::new(Semaphore::new(0));
    let (session, _notices, _geo, remote) =
        session_with(FakeGeo::gated(Arc::clone(&gate)), FakeRemote::new());
    session.start(AuthContext::new(ME)).await;
    session.toggle_sharing().await.unwrap();
    // 放行定时任务的首次定位
    gate.add_permits(1);
    settle().await;
    assert_eq!(remote.upserts.load(Ordering::SeqCst), 1);

    let manual = tokio::spawn({
        let session = session.clone();
        async move { session.request_location().await }
    });
    settle().await;

    session.toggle_sharing().await.unwrap();
    gate.add_permits(1);

    assert_eq!(manual.await.unwrap().unwrap(), None);
    assert_eq!(remote.upserts.load(Ordering::SeqCst), 1);
    assert_eq!(remote.location_active(ME), Some(false));
    assert!(session.state().last_known_position.is_none());
}

#[tokio::test(start_paused = true)]
async fn feed_events_reload_peers_and_drop_deactivated_ones() {
    let remote = FakeRemote::new();
    remote.put_peer("bob", true);
    let (session, _notices, _geo, remote) = session_with(FakeGeo::always_ok(), remote);
    session.start(AuthContext::new(ME)).await;
    assert!(session.state().visible_peers.contains_key("loc-bob"));

    remote.put_peer("carol", true);
    settle().await;
    assert_eq!(session.state().visible_peers.len(), 2);

    remote.put_peer("bob", false);
    settle().await;
    let peers = session.state().visible_peers;
    assert_eq!(peers.len(), 1);
    assert!(!peers.contains_key("loc-bob"));
}

#[tokio::test(start_paused = true)]
async fn own_record_never_becomes_a_visible_peer() {
    let (session, _notices, _geo, remote) = session_with(FakeGeo::always_ok(), FakeRemote::new());
    session.start(AuthContext::new(ME)).await;
    session.toggle_sharing().await.unwrap();
    settle().await;
    assert_eq!(remote.location_active(ME), Some(true));

    remote.put_peer("bob", true);
    settle().await;

    let peers = session.state().visible_peers;
    assert!(peers.values().all(|p| p.user_id != ME));
    assert!(!peers.contains_key("loc-me"));
}

#[tokio::test(start_paused = true)]
async fn failed_reload_keeps_previous_snapshot() {
    let remote = FakeRemote::new();
    remote.put_peer("bob", true);
    let (session, mut notices, _geo, remote) = session_with(FakeGeo::always_ok(), remote);
    session.start(AuthContext::new(ME)).await;

    remote.fail_reads.store(true, Ordering::SeqCst);
    remote.put_peer("carol", true);
    settle().await;

    assert_eq!(session.state().visible_peers.len(), 1);
    assert!(
        drain(&mut notices)
            .iter()
            .any(|n| matches!(n, Notice::Error(SessionError::RemoteReadFailed(_))))
    );
}

#[tokio::test(start_paused = true)]
async fn teardown_is_idempotent_and_releases_everything() {
    let (session, _notices, geo, remote) = session_with(FakeGeo::always_ok(), FakeRemote::new());
    session.start(AuthContext::new(ME)).await;
    session.toggle_sharing().await.unwrap();
    settle().await;

    session.teardown();
    session.teardown();
    settle().await;

    assert!(!session.is_polling());
    assert!(!session.is_subscribed());
    assert!(!session.state().is_sharing);
    assert!(session.context().is_none());
    assert_eq!(remote.feed.receiver_count(), 0);
    // 远端标志保留，下次登录继续共享
    assert_eq!(remote.flag(ME), Some(true));

    let calls = geo.calls.load(Ordering::SeqCst);
    time::sleep(POLL_INTERVAL * 2).await;
    settle().await;
    assert_eq!(geo.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_session_stops_background_tasks() {
    let (session, _notices, geo, remote) = session_with(FakeGeo::always_ok(), FakeRemote::new());
    session.start(AuthContext::new(ME)).await;
    session.toggle_sharing().await.unwrap();
    settle().await;

    drop(session);
    settle().await;
    assert_eq!(remote.feed.receiver_count(), 0);

    let calls = geo.calls.load(Ordering::SeqCst);
    time::sleep(POLL_INTERVAL * 2).await;
    settle().await;
    assert_eq!(geo.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test(start_paused = true)]
async fn unreadable_sharing_flag_does_not_deactivate_location() {
    let (session, mut notices, _geo, remote) = session_with(FakeGeo::always_ok(), FakeRemote::new());
    session.start(AuthContext::new(ME)).await;
    session.toggle_sharing().await.unwrap();
    settle().await;
    assert_eq!(remote.location_active(ME), Some(true));

    session.teardown();
    drain(&mut notices);
    remote.fail_flag_read.store(true, Ordering::SeqCst);
    session.start(AuthContext::new(ME)).await;
    settle().await;

    assert_eq!(remote.flag(ME), Some(true));
    assert_eq!(remote.location_active(ME), Some(true));
    assert!(!session.state().is_sharing);
    assert!(!session.is_polling());
    assert!(
        drain(&mut notices)
            .iter()
            .any(|n| matches!(n, Notice::Error(SessionError::RemoteReadFailed(_))))
    );
}

#[tokio::test(start_paused = true)]
async fn teardown_during_start_leaves_nothing_running() {
    let remote = FakeRemote::new();
    remote.put_peer("bob", true);
    lock(&remote.flags).insert(ME.to_string(), true);
    let gate = Arc::new(Semaphore::new(0));
    *lock(&remote.subscribe_gate) = Some(Arc::clone(&gate));
    let (session, _notices, geo, remote) = session_with(FakeGeo::always_ok(), remote);

    let starting = tokio::spawn({
        let session = session.clone();
        async move { session.start(AuthContext::new(ME)).await }
    });
    settle().await;
    assert_eq!(remote.feed.receiver_count(), 1);

    session.teardown();
    gate.add_permits(1);
    starting.await.unwrap();
    settle().await;

    assert!(!session.is_subscribed());
    assert!(!session.is_polling());
    assert_eq!(remote.feed.receiver_count(), 0);
    assert!(session.state().visible_peers.is_empty());
    assert!(!session.state().is_sharing);

    time::sleep(POLL_INTERVAL * 2).await;
    settle().await;
    assert_eq!(geo.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn toggle_off_waits_for_in_flight_upload() {
    let (session, _notices, _geo, remote) = session_with(FakeGeo::always_ok(), FakeRemote::new());
    session.start(AuthContext::new(ME)).await;
    session.toggle_sharing().await.unwrap();
    settle().await;
    assert_eq!(remote.upserts.load(Ordering::SeqCst), 1);

    // 下一次定时上传卡在网络上
    let gate = Arc::new(Semaphore::new(0));
    *lock(&remote.upsert_gate) = Some(Arc::clone(&gate));
    time::sleep(POLL_INTERVAL).await;
    settle().await;

    let toggling = tokio::spawn({
        let session = session.clone();
        async move { session.toggle_sharing().await }
    });
    settle().await;

    gate.add_permits(1);
    assert_eq!(toggling.await.unwrap().unwrap(), ToggleOutcome::Disabled);
    settle().await;

    assert_eq!(remote.upserts.load(Ordering::SeqCst), 2);
    assert_eq!(remote.flag(ME), Some(false));
    assert_eq!(remote.location_active(ME), Some(false));
    assert!(!session.state().is_sharing);
    assert!(session.state().last_known_position.is_none());
}

#[tokio::test(start_paused = true)]
async fn closed_feed_resubscribes_and_reloads() {
    let remote = FakeRemote::new();
    remote.put_peer("bob", true);
    let (session, _notices, _geo, remote) = session_with(FakeGeo::always_ok(), remote);
    session.start(AuthContext::new(ME)).await;
    settle().await;
    assert_eq!(session.state().visible_peers.len(), 1);

    remote.drop_connections();
    settle().await;
    assert_eq!(remote.feed.receiver_count(), 0);

    // 断开期间的变更没有推送
    remote.put_peer("carol", true);
    settle().await;
    assert_eq!(session.state().visible_peers.len(), 1);
    assert!(session.is_subscribed());

    time::sleep(RESUBSCRIBE_DELAY).await;
    settle().await;
    assert_eq!(remote.feed.receiver_count(), 1);
    assert_eq!(session.state().visible_peers.len(), 2);

    remote.put_peer("bob", false);
    settle().await;
    let peers = session.state().visible_peers;
    assert_eq!(peers.len(), 1);
    assert!(peers.contains_key("loc-carol"));
}
