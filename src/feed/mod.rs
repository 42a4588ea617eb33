//! 变更推送
//!
//! 写入方把 `ChangeEvent` 以 JSON 发布到 Redis 频道，每个服务进程只持有一个
//! 模式订阅，再通过 broadcast 分发给本进程内的所有 SSE 连接。

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use futures_util::{Stream, StreamExt, stream};
use redis::{AsyncCommands, Client as RedisClient};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::{ChangeEvent, ChangeKind};

const CHANNEL_PREFIX: &str = "geoshare:changes:";
const CHANNEL_PATTERN: &str = "geoshare:changes:*";
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub fn channel_for(event: &ChangeEvent) -> String {
    let table = match event {
        ChangeEvent::Locations { .. } => "locations",
        ChangeEvent::Messages { .. } => "messages",
    };
    format!("{}{}", CHANNEL_PREFIX, table)
}

/// 发布变更；失败只记录日志，不影响已经完成的写入
pub async fn publish(redis: &Arc<RedisClient>, event: &ChangeEvent) {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Failed to encode change event: {}", e);
            return;
        }
    };

    match redis.get_multiplexed_async_connection().await {
        Ok(mut conn) => {
            let published: redis::RedisResult<i64> = conn.publish(channel_for(event), payload).await;
            if let Err(e) = published {
                tracing::warn!("Failed to publish change event: {}", e);
            }
        }
        Err(e) => tracing::warn!("Redis unavailable, change event dropped: {}", e),
    }
}

#[derive(Clone)]
pub struct FeedHub {
    sender: broadcast::Sender<ChangeEvent>,
}

impl FeedHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// 把一条 Redis 消息转发给本地订阅者，返回收到的订阅者数量
    pub fn forward(&self, payload: &str) -> usize {
        match serde_json::from_str::<ChangeEvent>(payload) {
            Ok(event) => self.sender.send(event).unwrap_or(0),
            Err(e) => {
                tracing::warn!("Ignoring malformed change event: {}", e);
                0
            }
        }
    }

    /// 后台持续转发 Redis 消息，连接断开后自动重连
    pub fn spawn_relay(&self, redis: Arc<RedisClient>) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                match hub.relay(&redis).await {
                    Ok(()) => tracing::warn!("Change feed subscription ended, reconnecting"),
                    Err(e) => tracing::error!("Change feed subscription failed: {}", e),
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        })
    }

    async fn relay(&self, redis: &RedisClient) -> redis::RedisResult<()> {
        let mut pubsub = redis.get_async_pubsub().await?;
        pubsub.psubscribe(CHANNEL_PATTERN).await?;
        tracing::info!("Subscribed to {}", CHANNEL_PATTERN);

        let mut messages = pubsub.on_message();
        while let Some(msg) = messages.next().await {
            let payload: String = msg.get_payload()?;
            self.forward(&payload);
        }
        Ok(())
    }
}

/// 位置订阅落后时发送的占位事件，客户端收到后重新拉取全量
pub fn resync_event() -> ChangeEvent {
    ChangeEvent::Locations {
        kind: ChangeKind::Resync,
        location_id: String::new(),
        user_id: String::new(),
        is_active: true,
    }
}

/// 把 broadcast 接收端包装成 SSE 事件流
///
/// `filter` 决定哪些事件发送给这个连接；`on_lag` 为 `Some` 时，
/// 丢失事件后补发一次该事件。
pub fn sse_events<F>(
    rx: broadcast::Receiver<ChangeEvent>,
    filter: F,
    on_lag: Option<ChangeEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static
where
    F: Fn(&ChangeEvent) -> bool + Send + 'static,
{
    stream::unfold((rx, filter, on_lag), |(mut rx, filter, on_lag)| async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) if filter(&event) => event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("SSE subscriber lagged, {} events skipped", skipped);
                    match &on_lag {
                        Some(event) => event.clone(),
                        None => continue,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            match Event::default().event("change").json_data(&event) {
                Ok(sse) => return Some((Ok(sse), (rx, filter, on_lag))),
                Err(e) => tracing::error!("Failed to encode SSE event: {}", e),
            }
        }
    })
}
